//! The `anonftpd` command-line entry point: parses arguments, builds a
//! [`Config`], starts the server, and waits for `SIGINT`/`SIGTERM` (or
//! Ctrl-C on platforms without real signals) to shut it down gracefully.

use anonftpd::{Config, Server};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "A multi-platform anonymous FTP server.", long_about = None)]
struct Args {
    /// Address to bind the control-channel listener to.
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 2121)]
    port: u16,

    /// Directory served as the FTP root.
    #[arg(short = 'd', long, default_value = ".")]
    dir: PathBuf,

    /// Maximum number of concurrent sessions.
    #[arg(long, default_value_t = 32)]
    max_sessions: usize,

    /// Path to a 32-byte pre-shared key file enabling `AUTH XCRYPT`. Absent by default.
    #[arg(long)]
    psk_file: Option<PathBuf>,

    /// Enables safe-mode directory listings (skip per-entry stat under virtual filesystem mounts).
    #[arg(long)]
    safe_mode: bool,

    /// `tracing-subscriber` env-filter directive, e.g. "anonftpd=debug".
    #[arg(long, default_value = "anonftpd=info")]
    log_filter: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&args.log_filter)).init();

    #[cfg(feature = "prometheus")]
    if let Err(e) = anonftpd::metrics::register(prometheus::default_registry()) {
        error!(error = %e, "failed to register prometheus collectors");
    }

    let bind_addr: SocketAddr = match format!("{}:{}", args.bind, args.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("invalid bind address '{}:{}': {e}", args.bind, args.port);
            std::process::exit(2);
        }
    };

    let root = match args.dir.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("cannot resolve root directory {:?}: {e}", args.dir);
            std::process::exit(2);
        }
    };

    let mut builder = Config::builder(bind_addr, root).max_sessions(args.max_sessions).safe_mode(args.safe_mode);

    if let Some(psk_path) = args.psk_file {
        match std::fs::read(&psk_path) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut psk = [0u8; 32];
                psk.copy_from_slice(&bytes);
                builder = builder.psk(psk);
            }
            Ok(bytes) => {
                eprintln!("psk file {:?} must be exactly 32 bytes, got {}", psk_path, bytes.len());
                std::process::exit(2);
            }
            Err(e) => {
                eprintln!("cannot read psk file {:?}: {e}", psk_path);
                std::process::exit(2);
            }
        }
    }

    let config = builder.build();

    let server = match Server::init(config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start server");
            if e.kind() == anonftpd::ErrorKind::SocketBind {
                eprintln!("could not bind {bind_addr}: is the port already in use?");
            }
            std::process::exit(1);
        }
    };

    let local_addr = server.local_addr().expect("listener is bound");
    info!(addr = %local_addr, "anonftpd started");

    let server = std::sync::Arc::new(server);
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_server.stop();
    });

    server.serve().await;
    info!(stats = ?server.stats(), "anonftpd stopped");
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
