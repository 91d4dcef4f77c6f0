//! Send one command and print the classified response
//!
//! Usage:
//!   cargo run --example ping -- [OPTIONS] [COMMAND]
//!
//! Options:
//!   --port PORT       Device path or URL (default: loop://)
//!   --baud RATE       Baud rate (default: 115200)
//!   --ack TEXT        Acknowledgement pattern (default: OK)
//!   --retries N       Extra attempts after a timeout (default: 2)
//!   --timeout MS      Read timeout for this command only
//!   --config FILE     Load connection settings from JSON first
//!   --async-vocab     Use the err/alarm/async keyword set
//!
//! Set RUST_LOG=serialcmd_core=debug to see every write and read.

use anyhow::{bail, Context};
use serialcmd_core::protocol::{Connection, ConnectionConfig, ProtocolError, ResponseVocabulary};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = ConnectionConfig::new("loop://", "OK");
    let mut retries = 2u32;
    let mut timeout = None;
    let mut command = None;

    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| {
            args.get(i + 1)
                .cloned()
                .with_context(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--port" | "-p" => {
                config.port = value(i)?;
                i += 1;
            }
            "--baud" | "-b" => {
                config.baud_rate = value(i)?.parse().context("invalid baud rate")?;
                i += 1;
            }
            "--ack" => {
                config.ack = value(i)?;
                i += 1;
            }
            "--retries" | "-r" => {
                retries = value(i)?.parse().context("invalid retry count")?;
                i += 1;
            }
            "--timeout" | "-t" => {
                let ms: u64 = value(i)?.parse().context("invalid timeout")?;
                timeout = Some(Duration::from_millis(ms));
                i += 1;
            }
            "--config" | "-c" => {
                config = ConnectionConfig::from_file(value(i)?)?;
                i += 1;
            }
            "--async-vocab" => config.vocabulary = ResponseVocabulary::async_response(),
            other if other.starts_with('-') => bail!("unknown option {other}"),
            other => command = Some(other.to_string()),
        }
        i += 1;
    }

    // loop:// echoes, so the default command answers itself
    let command = command.unwrap_or_else(|| format!("PING {}", config.ack));

    let conn = Connection::create(config).await?;
    let outcome = conn.send(&command, retries, timeout).await;
    conn.close().await?;

    match outcome {
        Ok(response) => println!("{}: ok {:?}", conn.name(), response),
        Err(ProtocolError::ErrorResponse { response, .. }) if conn.is_async_notice(&response) => {
            println!("{}: asynchronous error notice {:?}", conn.name(), response)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
