use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "nurse-cli")]
#[command(about = "Inspect a running netnurse agent", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the last check result
    Status {
        /// Exit non-zero if any check failed
        #[arg(long)]
        strict: bool,
    },
    /// Print readiness
    Ready,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Status { strict } => {
            let res = client.get(format!("{base}/alive")).send().await?;
            let status = res.status();
            if !status.is_success() {
                eprintln!("Error: agent returned status {status} (no check has completed yet?)");
                return Ok(ExitCode::FAILURE);
            }

            let json: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&json["last_check_result"])?);
            if strict && has_errors(&json["last_check_result"]) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Ready => {
            let res = client.get(format!("{base}/ready")).send().await?;
            if res.status().is_success() {
                println!("ready");
            } else {
                println!("not ready ({})", res.status());
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Any check value other than `ok`/`skipped`, or a failed neighbourhood.
fn has_errors(result: &Value) -> bool {
    let Some(fields) = result.as_object() else {
        return true;
    };
    fields
        .iter()
        .filter(|(key, _)| key.as_str() != "neighbourhood" && key.as_str() != "produced_at")
        .any(|(_, value)| !matches!(value.as_str(), Some("ok") | Some("skipped")))
}
