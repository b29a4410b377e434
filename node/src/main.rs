//! Relay bridge node.
//!
//! Sits between a local bitcoind instance and the block relay network,
//! translating blocks and loose transactions between the two wire formats.
//! Both connections are persistent: any protocol violation or socket error
//! tears the affected connection down with a logged reason and the loop
//! dials again. The process only exits on a shutdown signal.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_bridge::BridgeRouter;
use relay_core::Backoff;
use relay_p2p::P2pClient;
use relay_protocol::{FlatCompressor, RelayClient, DEFAULT_RELAY_PORT};
use relay_selector::{select_server, SelectorConfig, TcpProber};

#[derive(Parser, Debug)]
#[command(
    name = "relay-node",
    version,
    about = "Bridges a Bitcoin P2P node onto the block relay network"
)]
struct Args {
    /// Address of the local bitcoind instance.
    bitcoind_address: String,

    /// P2P port of the local bitcoind instance.
    bitcoind_port: u16,

    /// Relay server hostname. Picked by probing the public pool when omitted.
    #[arg(long)]
    server: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let server = match args.server {
        Some(server) => server,
        None => pick_server()
            .await
            .context("relay server selection was interrupted")?,
    };
    info!("using relay server {}", server);

    // Phase one: each client is constructed around its own event sender.
    let (relay_events_tx, relay_events) = mpsc::unbounded_channel();
    let (p2p_events_tx, p2p_events) = mpsc::unbounded_channel();
    let (relay_client, relay_handle) =
        RelayClient::new(Box::new(FlatCompressor::new()), relay_events_tx);
    let (p2p_client, p2p_handle) = P2pClient::new(p2p_events_tx);

    // Phase two: the router is wired once both sides exist.
    let router = BridgeRouter::new(relay_handle, p2p_handle, relay_events, p2p_events);
    tokio::spawn(router.run());

    spawn_relay_loop(relay_client, server);
    spawn_p2p_loop(p2p_client, args.bitcoind_address, args.bitcoind_port);

    wait_for_shutdown().await?;
    info!("shutting down");
    Ok(())
}

/// Runs the latency-based selection against the public pool; ctrl-c aborts
/// the (potentially unbounded) retry loop through the cancellation token.
async fn pick_server() -> Option<String> {
    let config = SelectorConfig::default();
    let prober = Arc::new(TcpProber {
        port: config.port,
        rounds: config.connect_rounds,
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    select_server(config, prober, cancel).await
}

/// Persistent connection loop for the relay side.
fn spawn_relay_loop(client: RelayClient, server: String) {
    tokio::spawn(async move {
        let mut backoff = Backoff::default();
        loop {
            match TcpStream::connect((server.as_str(), DEFAULT_RELAY_PORT)).await {
                Ok(stream) => {
                    info!("connected to relay server {}", server);
                    backoff.reset();
                    let _ = stream.set_nodelay(true);
                    let (reader, writer) = stream.into_split();
                    if let Err(err) = client.run(reader, writer).await {
                        warn!("relay connection closed: {}", err);
                    }
                }
                Err(err) => warn!("failed to connect to relay server {}: {}", server, err),
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    });
}

/// Persistent connection loop for the bitcoind side.
fn spawn_p2p_loop(client: P2pClient, address: String, port: u16) {
    tokio::spawn(async move {
        let mut backoff = Backoff::default();
        loop {
            match TcpStream::connect((address.as_str(), port)).await {
                Ok(stream) => {
                    info!("connected to bitcoind at {}:{}", address, port);
                    backoff.reset();
                    let _ = stream.set_nodelay(true);
                    let peer = stream
                        .peer_addr()
                        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
                    let (reader, writer) = stream.into_split();
                    if let Err(err) = client.run(reader, writer, peer).await {
                        warn!("bitcoind connection closed: {}", err);
                    }
                }
                Err(err) => warn!("failed to connect to bitcoind at {}:{}: {}", address, port, err),
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    });
}

/// Blocks until the operator asks the process to stop.
async fn wait_for_shutdown() -> Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = signal::ctrl_c() => info!("received shutdown signal (ctrl-c)"),
        _ = term.recv() => info!("received shutdown signal (SIGTERM)"),
    }
    Ok(())
}
