//! Entry point for `ctcp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  Standard input is sent to the peer and the peer's stream is written
//! to standard output, so logs go to stderr (set `RUST_LOG` for verbosity).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use ctcp::config::Config;
use ctcp::endpoint::{self, Mode};

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Command,

    /// Bytes we may have in flight beyond the peer's last acknowledgement.
    #[arg(long, global = true, default_value_t = 1440)]
    send_window: u32,

    /// Bytes the peer may send beyond our last delivered byte.
    #[arg(long, global = true, default_value_t = 1440)]
    recv_window: u32,

    /// Timer tick interval in milliseconds.
    #[arg(long, global = true, default_value_t = 40)]
    tick_ms: u64,

    /// Retransmission timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 200)]
    rto_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Run as a server, serving the first client that sends a segment.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
    /// Run as a client, connecting to a remote server.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
    },
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            recv_window: self.recv_window,
            send_window: self.send_window,
            tick: Duration::from_millis(self.tick_ms),
            retransmit_timeout: Duration::from_millis(self.rto_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config();
    config.validate().context("invalid configuration")?;

    let mode = match cli.mode {
        Command::Server { bind } => {
            log::info!("Starting server on {bind}");
            Mode::Server { bind }
        }
        Command::Client { server, bind } => {
            log::info!("Starting client, connecting to {server}");
            Mode::Client { server, bind }
        }
    };

    endpoint::run(mode, config)
        .await
        .context("connection failed")?;
    Ok(())
}
