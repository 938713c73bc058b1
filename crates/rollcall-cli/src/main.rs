use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn verify(&self, frames: Vec<(u32, u64, Vec<u8>)>) -> zbus::Result<String>;
    async fn reload_gallery(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a frame burst for attendance verification
    Scan {
        /// Image files in capture order (3 or more)
        files: Vec<PathBuf>,
        /// Capture interval between frames, in milliseconds
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },
    /// Rebuild the gallery snapshot from its file
    Reload,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::system()
        .await
        .context("connect to system bus (is rollcalld running?)")?;
    let proxy = AttendanceProxy::new(&connection).await?;

    match cli.command {
        Commands::Scan { files, interval_ms } => {
            if files.is_empty() {
                anyhow::bail!("no frame files given");
            }
            let mut frames = Vec::with_capacity(files.len());
            for (i, path) in files.iter().enumerate() {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("read frame {}", path.display()))?;
                frames.push((i as u32, i as u64 * interval_ms, bytes));
            }

            let reply = proxy.verify(frames).await?;
            let outcome: serde_json::Value = serde_json::from_str(&reply)?;

            if outcome["admitted"].as_bool() == Some(true) {
                let name = outcome["identity"]["name"]
                    .as_str()
                    .or(outcome["identity_id"].as_str())
                    .unwrap_or("unknown");
                println!("admitted: {name}");
            } else {
                println!(
                    "rejected: {}",
                    outcome["reason"]["kind"].as_str().unwrap_or("unknown")
                );
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Reload => {
            let reply = proxy.reload_gallery().await?;
            println!("{reply}");
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            println!("{reply}");
        }
    }

    Ok(())
}
