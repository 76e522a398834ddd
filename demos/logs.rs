//! Logs - print a container's logs with stdout and stderr separated.
//!
//! This example demonstrates:
//! - Requesting logs with tail/follow options
//! - Splitting the multiplexed stream with `Logs::demux`
//! - Reporting how far the copy got when the stream fails
//!
//! # Running
//!
//! ```sh
//! cargo run --example logs -- my-container
//! ```

use dockwire_client::container::LogsConfig;
use dockwire_client::Client;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let container = std::env::args()
        .nth(1)
        .ok_or("usage: logs <container>")?;

    let client = Client::from_env()?;
    let container = client.container(container);

    let info = container.inspect().await?;
    let logs = container
        .logs(LogsConfig::new().tail("100").timestamps(true))
        .await?;

    if info.config.tty {
        // TTY containers log raw bytes
        let mut logs = logs;
        tokio::io::copy(&mut logs, &mut tokio::io::stdout()).await?;
        return Ok(());
    }

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    match logs.demux(&mut stdout, &mut stderr).await {
        Ok(written) => eprintln!("{written} bytes"),
        Err(e) => {
            eprintln!("stopped after {} bytes", e.written);
            return Err(e.into());
        }
    }
    Ok(())
}
