//! lancp - copy one file to another machine on the same LAN.
//!
//! Both operators read a one-word passphrase off their own screen to the
//! other; once both are confirmed the file goes over TLS.

mod input;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lancp_core::config::LancpConfig;
use lancp_core::net::LocalEndpoints;
use lancp_core::{AppEvent, RunContext, RunError, run_receiver, run_sender};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use input::Capturer;

/// A simple tool for transferring files between two machines on the same network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Discovery port (UDP handshake and certificate hand-over)
    #[arg(long)]
    port: Option<u16>,

    /// Port of the TLS listener on the receiving machine
    #[arg(long)]
    tls_port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a file to a machine running `lancp receive`
    Send {
        /// The path to a file to send
        file: PathBuf,
    },
    /// Wait for a sender and save the file it sends
    Receive,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // A run error already names its phase and cause.
            match e.downcast_ref::<RunError>() {
                Some(run_err) => eprintln!("ERROR: {}", run_err),
                None => eprintln!("ERROR: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_level: &str) {
    let log_level: tracing::Level = log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let mut config = LancpConfig::load();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(tls_port) = args.tls_port {
        config.tls_port = tls_port;
    }
    let (port, tls_port) = config.validate()?;

    if let Command::Send { file } = &args.command {
        ensure_readable(file)?;
    }

    let endpoints = LocalEndpoints::lan(port, tls_port)
        .context("failed to determine this machine's LAN address")?;

    let (event_tx, event_rx) = mpsc::channel(100);
    let printer = tokio::spawn(print_events(event_rx));
    let ctx = RunContext::new(config, endpoints, Arc::new(Capturer::stdio()), event_tx);

    // The context (and its event sender) is consumed by the run, which lets
    // the printer drain and finish.
    let result = match args.command {
        Command::Send { file } => {
            tracing::info!("lancp running in send mode...");
            run_sender(ctx, &file).await.map(|_| ())
        }
        Command::Receive => {
            tracing::info!("lancp running in receive mode...");
            run_receiver(ctx).await.map(|_| ())
        }
    };
    let _ = printer.await;

    Ok(result?)
}

fn ensure_readable(file: &Path) -> Result<()> {
    let meta = std::fs::metadata(file)
        .with_context(|| format!("cannot access {}", file.display()))?;
    if !meta.is_file() {
        bail!("{} is not a regular file", file.display());
    }
    std::fs::File::open(file).with_context(|| format!("cannot read {}", file.display()))?;
    Ok(())
}

async fn print_events(mut rx: mpsc::Receiver<AppEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            AppEvent::Status(msg) => println!("{}", msg),
            AppEvent::ShowPassphrase { passphrase } => {
                println!("Passphrase: {}", passphrase);
            }
            AppEvent::PeerVerified { peer } => println!("Verified peer at {}", peer),
            AppEvent::CertificateExchanged { bytes } => {
                println!("Certificate exchanged ({} bytes)", bytes);
            }
            AppEvent::TransferStarted {
                file_name,
                total,
                is_sending,
            } => {
                let verb = if is_sending { "Sending" } else { "Receiving" };
                println!("{}: {} ({} bytes)", verb, file_name, total);
            }
            AppEvent::TransferProgress {
                transferred,
                total,
                progress,
                speed,
                ..
            } => {
                print!(
                    "\r  {:>6.1}%  {}/{} bytes  {}        ",
                    progress, transferred, total, speed
                );
                let _ = stdout.flush();
            }
            AppEvent::TransferCompleted {
                file_name,
                bytes,
                saved_path,
            } => {
                println!();
                match saved_path {
                    Some(path) => {
                        println!("Saved {} ({} bytes) to {}", file_name, bytes, path.display())
                    }
                    None => println!("Sent {} ({} bytes)", file_name, bytes),
                }
            }
        }
    }
}
