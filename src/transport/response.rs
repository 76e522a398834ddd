//! Response status checking and bounded body decoding.

use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Limited};
use hyper::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::Body;
use crate::error::{ApiErrorKind, DockerError, Result};

/// Most bytes read from an error or small JSON response (16 KiB).
pub const DEFAULT_RESPONSE_LIMIT: usize = 16 * 1024;

#[derive(Deserialize)]
struct ErrorMessage {
    message: String,
}

/// Pass successful (2xx/3xx) responses through; turn others into errors.
pub async fn check_response(resp: Response<Body>) -> Result<Response<Body>> {
    let status = resp.status();
    if status.is_success() || status.is_redirection() {
        return Ok(resp);
    }
    Err(error_from_response(resp).await)
}

/// Build a [`DockerError::Api`] from an error response.
///
/// The message comes from a JSON `{"message": ...}` body, falling back to
/// the body text, then to the status reason.
pub async fn error_from_response(resp: Response<Body>) -> DockerError {
    let (status, message) = status_and_message(resp).await;
    DockerError::Api {
        kind: ApiErrorKind::from_status(status),
        status,
        message,
    }
}

pub(crate) async fn status_and_message(resp: Response<Body>) -> (u16, String) {
    let status = resp.status();
    let body = read_truncated(resp.into_body(), DEFAULT_RESPONSE_LIMIT).await;
    let message = match serde_json::from_slice::<ErrorMessage>(&body) {
        Ok(err) => err.message,
        Err(_) => {
            let text = String::from_utf8_lossy(&body).trim().to_string();
            if text.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                text
            }
        }
    };
    (status.as_u16(), message)
}

/// Read at most `limit` bytes of a body, ignoring the rest and any error.
async fn read_truncated(mut body: Body, limit: usize) -> Bytes {
    let mut buf = BytesMut::new();
    while buf.len() < limit {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    let take = data.len().min(limit - buf.len());
                    buf.extend_from_slice(&data[..take]);
                }
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "error reading error response body");
                break;
            }
            None => break,
        }
    }
    buf.freeze()
}

/// Check the status and decode a JSON body of at most `limit` bytes.
pub async fn read_json<T: DeserializeOwned>(resp: Response<Body>, limit: usize) -> Result<T> {
    let resp = check_response(resp).await?;
    let body = Limited::new(resp.into_body(), limit)
        .collect()
        .await
        .map_err(|e| {
            DockerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("reading response body: {e}"),
            ))
        })?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::full_body;
    use hyper::StatusCode;

    fn response(status: u16, body: &'static str) -> Response<Body> {
        Response::builder()
            .status(status)
            .body(full_body(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let resp = check_response(response(200, "OK")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_json_error_message() {
        let err = check_response(response(404, r#"{"message":"No such container: abc"}"#))
            .await
            .unwrap_err();
        match err {
            DockerError::Api {
                kind,
                status,
                message,
            } => {
                assert_eq!(kind, ApiErrorKind::NotFound);
                assert_eq!(status, 404);
                assert_eq!(message, "No such container: abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_plain_text_error_message() {
        let err = check_response(response(409, "container is paused\n"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("container is paused"));
    }

    #[tokio::test]
    async fn test_empty_error_uses_reason() {
        let err = check_response(response(503, "")).await.unwrap_err();
        assert!(err.to_string().contains("Service Unavailable"));
        assert_eq!(err.api_kind(), Some(ApiErrorKind::Unavailable));
    }

    #[tokio::test]
    async fn test_error_body_is_truncated() {
        let long = "x".repeat(DEFAULT_RESPONSE_LIMIT * 2);
        let resp = Response::builder()
            .status(500)
            .body(full_body(long))
            .unwrap();
        let (status, message) = status_and_message(resp).await;
        assert_eq!(status, 500);
        assert_eq!(message.len(), DEFAULT_RESPONSE_LIMIT);
    }

    #[tokio::test]
    async fn test_read_json_limit() {
        #[derive(Deserialize)]
        struct Id {
            #[serde(rename = "Id")]
            id: String,
        }

        let id: Id = read_json(response(201, r#"{"Id":"abc"}"#), 1024).await.unwrap();
        assert_eq!(id.id, "abc");

        let err = read_json::<Id>(response(200, r#"{"Id":"abc"}"#), 4)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DockerError::Io(_)));
    }
}
