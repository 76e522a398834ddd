//! Exec - run a command in a running container and stream its output.
//!
//! This example demonstrates:
//! - Creating a client from `DOCKER_HOST` / `DOCKER_API_VERSION`
//! - Creating and starting an exec instance with stdin attached
//! - Feeding stdin and copying stdout/stderr to the terminal
//! - Reading the exit code afterwards
//!
//! # Running
//!
//! ```sh
//! docker run -d --name demo alpine sleep 600
//! echo "hello from stdin" | cargo run --example exec -- demo cat
//! ```

use dockwire_client::container::ExecConfig;
use dockwire_client::Client;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let container = args.next().ok_or("usage: exec <container> <cmd>...")?;
    let cmd: Vec<String> = args.collect();

    let client = Client::from_env()?;
    let exec = client
        .container(container)
        .exec(ExecConfig::new(cmd).attach_stdin(true))
        .await?;

    let mut io = exec.start().await?;
    let mut stdout = io.take_stdout().ok_or("stdout not attached")?;
    let mut stderr = io.take_stderr().ok_or("stderr not attached")?;

    // Drain both outputs while stdin is being fed
    let out = tokio::spawn(async move { tokio::io::copy(&mut stdout, &mut tokio::io::stdout()).await });
    let err = tokio::spawn(async move { tokio::io::copy(&mut stderr, &mut tokio::io::stderr()).await });

    io.copy_stdin_from(&mut tokio::io::stdin()).await?;
    io.wait().await?;
    out.await??;
    err.await??;

    let info = exec.inspect().await?;
    eprintln!("exit code: {:?}", info.exit_code);
    Ok(())
}
