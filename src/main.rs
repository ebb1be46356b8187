//! plc-worker - call a PLC engine over its Unix socket from the shell.
//!
//! Connects to the engine host, initializes the default instance, streams
//! engine stdout/stderr to the terminal, performs one call, and prints its
//! result as JSON.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plc_worker_client::config::ClientConfig;
use plc_worker_client::PlcWorker;

const ENVIRONMENT_HELP: &str = "\
Environment:
  PLC_WORKER_SOCKET            engine host socket
  PLC_WASM_PATH                engine module path sent with init
  PLC_WORKER_DEBUG             start the engine in debug mode
  PLC_WORKER_SILENT            start the engine silenced
  PLC_WORKER_CONNECT_ATTEMPTS  connection attempts before giving up
  RUST_LOG                     log filter (default: plc_worker_client=info)";

#[derive(Parser)]
#[command(name = "plc-worker")]
#[command(about = "Call one operation on a PLC engine host", version)]
#[command(after_help = ENVIRONMENT_HELP)]
struct Cli {
    /// Engine operation to call on the default instance
    #[arg(default_value = "printInfo")]
    method: String,

    /// Arguments, each parsed as JSON or passed as a plain string
    args: Vec<String>,
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run(method: &str, args: Vec<Value>) -> Result<Value> {
    let config = ClientConfig::from_env();
    tracing::info!("Connecting to engine at {}", config.socket_path.display());

    // The engine refuses subscriptions until the default instance exists.
    let worker = PlcWorker::from_config(&config)
        .await
        .with_context(|| format!("Failed to start engine at {}", config.socket_path.display()))?;

    worker
        .on_stdout(|line| println!("{}", line), None)
        .await
        .context("Failed to subscribe to engine stdout")?;
    worker
        .on_stderr(|line| eprintln!("{}", line), None)
        .await
        .context("Failed to subscribe to engine stderr")?;

    let result = worker
        .call(method, args)
        .await
        .with_context(|| format!("{} failed", method));

    if let Err(e) = worker.terminate().await {
        tracing::warn!("Shutdown was not clean: {}", e);
    }

    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "plc_worker_client=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<Value> = cli.args.iter().map(|raw| parse_arg(raw)).collect();

    match run(&cli.method, args).await {
        Ok(Value::Null) => ExitCode::SUCCESS,
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(text) => println!("{}", text),
                Err(_) => println!("{}", result),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_method() {
        let cli = Cli::parse_from(["plc-worker"]);
        assert_eq!(cli.method, "printInfo");
        assert!(cli.args.is_empty());
    }

    #[test]
    fn test_method_and_args() {
        let cli = Cli::parse_from(["plc-worker", "readMemoryArea", "0", "4"]);
        assert_eq!(cli.method, "readMemoryArea");
        assert_eq!(cli.args, vec!["0".to_string(), "4".to_string()]);
    }

    #[test]
    fn test_parse_arg_falls_back_to_string() {
        assert_eq!(parse_arg("42"), json!(42));
        assert_eq!(parse_arg("[1,2]"), json!([1, 2]));
        assert_eq!(parse_arg("u8.const 1"), json!("u8.const 1"));
    }
}
