//! purple-xfer command line entry point.

mod app;
mod backend;
mod config;
mod console;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use purple_xfer::XferStatus;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "purple-xfer", version, about = "Send or receive one file over TCP")]
struct Cli {
    /// Configuration file (defaults to the per-user location).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print progress and the final summary as JSON lines on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Offer a file and send it to the first peer that connects.
    Send {
        file: PathBuf,

        /// Port to listen on (0 picks a free one).
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
    },
    /// Connect to a sender and receive the file it offers.
    Recv {
        addr: SocketAddr,

        /// File or directory to save into.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Accept the offer without asking.
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        account = %config.account,
        "starting purple-xfer"
    );

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let outcome = rt.block_on(async {
        match cli.command {
            Command::Send { file, port, bind } => {
                app::run_send(config, file, &bind, port, cli.json).await
            }
            Command::Recv { addr, out, yes } => {
                app::run_recv(config, addr, out, yes, cli.json).await
            }
        }
    })?;

    if cli.json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        eprintln!(
            "{:?}: {}",
            outcome.status,
            purple_xfer::format_size(outcome.bytes)
        );
        if let Some(sha256) = &outcome.sha256 {
            eprintln!("sha256 {sha256}");
        }
    }

    if outcome.status != XferStatus::Done {
        anyhow::bail!("transfer did not complete ({:?})", outcome.status);
    }
    Ok(())
}
