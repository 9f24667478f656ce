//! Thin CLI for manually exercising a session: add a torrent by path,
//! start/stop it, and print tracker stats. No resumer or disk wiring.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use zbt_engine::config::Config;
use zbt_engine::session::Session;

#[derive(Parser)]
#[command(name = "zbt", about = "BitTorrent client engine CLI")]
struct Cli {
    /// Path to a TOML config file; defaults are used if omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a .torrent file and begin announcing.
    Add {
        /// Path to the .torrent file.
        torrent: PathBuf,
    },
    /// Start a previously added torrent by id.
    Start { id: String },
    /// Stop a previously added torrent by id.
    Stop { id: String },
    /// Print per-tracker stats for a torrent by id.
    Stats { id: String },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Config::from_toml_str(&raw).context("parsing config file")
        }
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let session = Arc::new(
        Session::new(config)
            .await
            .context("failed to start session")?,
    );

    match cli.command {
        Command::Add { torrent } => {
            let data = std::fs::read(&torrent)
                .with_context(|| format!("reading torrent file {}", torrent.display()))?;
            let (new_peers_tx, mut new_peers_rx) = mpsc::channel(32);
            let handle = session
                .add_torrent(&data, new_peers_tx)
                .await
                .context("adding torrent")?;
            println!("added torrent {} ({})", handle.id, handle.name);

            tokio::spawn(async move {
                while let Some(peers) = new_peers_rx.recv().await {
                    println!("received {} peer(s)", peers.len());
                }
            });

            tokio::signal::ctrl_c().await.ok();
            session.remove_torrent(&handle.id).await;
        }
        Command::Start { id } => {
            let torrent = session.get(&id).context("no such torrent")?;
            torrent.start().await;
            println!("started {id}");
        }
        Command::Stop { id } => {
            let torrent = session.get(&id).context("no such torrent")?;
            torrent.stop().await;
            println!("stopped {id}");
        }
        Command::Stats { id } => {
            let torrent = session.get(&id).context("no such torrent")?;
            for stat in torrent.tracker_stats().await {
                println!(
                    "{} status={:?} seeders={} leechers={} warning={:?} error={:?}",
                    stat.url, stat.status, stat.seeders, stat.leechers, stat.warning, stat.error
                );
            }
        }
    }

    session.close();
    Ok(())
}
