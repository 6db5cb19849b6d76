//! Swimlane Daemon - SWIM membership node
//!
//! Usage:
//!   # First node (founds the cluster)
//!   swimlaned --port 11000
//!
//!   # Joining nodes
//!   swimlaned --port 11001 --seeds 10.0.0.1:11000
//!
//!   # With custom timing
//!   swimlaned --port 11002 \
//!     --host 10.0.0.3 \
//!     --seeds 10.0.0.1:11000,10.0.0.2:11001 \
//!     --protocol-period-ms 500 \
//!     --ping-timeout-ms 200 \
//!     --suspect-timeout-ms 2000 \
//!     --indirect-probes 3

use clap::Parser;
use swimlane::{Node, NodeEvent};
use swimlaned::Cli;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing with configured log level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner(&cli);

    if let Err(e) = cli.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = cli.to_config().map_err(anyhow::Error::msg)?;
    let mut node = Node::new(config)?;
    let events = node.subscribe();
    node.start().await?;
    tracing::info!(addr = %node.local_addr()?, "Membership node running");

    let logger = tokio::spawn(log_events(events));

    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received, leaving the cluster...");

    // Wait for the leave announcement with timeout
    let shutdown_timeout = tokio::time::Duration::from_secs(30);
    match tokio::time::timeout(shutdown_timeout, node.stop()).await {
        Ok(Ok(())) => {
            tracing::info!("Node left the cluster gracefully");
        }
        Ok(Err(e)) => {
            tracing::error!("Node error during shutdown: {}", e);
        }
        Err(_) => {
            tracing::warn!(
                "Shutdown timed out after {:?}, forcing exit",
                shutdown_timeout
            );
        }
    }
    logger.abort();

    tracing::info!("Goodbye!");
    Ok(())
}

/// Log every membership event until the node goes away
async fn log_events(mut events: tokio::sync::broadcast::Receiver<NodeEvent>) {
    loop {
        match events.recv().await {
            Ok(NodeEvent::Up(me)) => tracing::info!(port = me.port, "Node up"),
            Ok(NodeEvent::Joined(me)) => {
                tracing::info!(host = ?me.host, port = me.port, "Joined cluster")
            }
            Ok(NodeEvent::PeerUp(member)) => {
                tracing::info!(peer = %member.node, "Peer up")
            }
            Ok(NodeEvent::PeerDown(member)) => {
                tracing::warn!(peer = %member.node, "Peer down")
            }
            Ok(NodeEvent::PeerSuspect(member)) => {
                tracing::warn!(peer = %member.node, incarnation = member.incarnation, "Peer suspect")
            }
            Ok(NodeEvent::PeerAlive(member)) => {
                tracing::info!(peer = %member.node, incarnation = member.incarnation, "Peer alive again")
            }
            Ok(NodeEvent::Ping { target }) => tracing::trace!(peer = %target, "Ping"),
            Ok(NodeEvent::Ack { from }) => tracing::trace!(peer = %from, "Ack"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged")
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

fn print_banner(cli: &Cli) {
    let host = cli.host.as_deref().unwrap_or("auto (learned from peers)");
    let seeds = if cli.seeds.is_empty() {
        "none (founding new cluster)".to_string()
    } else {
        cli.seeds.join(", ")
    };

    eprintln!(
        r#"
 ___          _         _
/ __|_ __ __ (_)_ __   | |__ _ _ _  ___
\__ \ V  V / | | '  \  | / _` | ' \/ -_)
|___/\_/\_/  |_|_|_|_| |_\__,_|_||_\___|

SWIM Group Membership & Failure Detection

  Port:         {}
  Host:         {}
  Seeds:        {}
  Period:       {}ms
  Ping Timeout: {}ms
  Suspect:      {}ms
"#,
        cli.port,
        host,
        seeds,
        cli.protocol_period_ms,
        cli.ping_timeout_ms,
        cli.suspect_timeout_ms
    );
}
