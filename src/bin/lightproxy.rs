use anyhow::{Result, bail};
use clap::Parser;
use lightproxy::{RelaySettings, Socks5Server};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 connect proxy", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = "127.0.0.1:22333")]
    listen: String,

    /// Bytes read from a target per read call
    #[arg(short, long, default_value_t = lightproxy::relay::DEFAULT_READ_BUFFER)]
    read_buffer: usize,

    /// Give up on a target connect after this many seconds
    #[arg(short, long)]
    connect_timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    if args.read_buffer == 0 {
        bail!("[ERR] read buffer must be at least one byte");
    }

    let settings = RelaySettings {
        read_buffer_size: args.read_buffer,
        connect_timeout: args.connect_timeout.map(Duration::from_secs),
    };

    // Instantiate server
    let mut server = Socks5Server::new(args.listen).with_settings(settings);

    // Run it
    info!("Starting SOCKS5 proxy: {}", server.listen_addr);
    server.run().await
}
