//! CLI argument parsing for the swimlane daemon
//!
//! Every flag has an environment fallback so the daemon can be configured
//! entirely from a container environment.

use clap::Parser;
use std::time::Duration;
use swimlane::{PeerId, SwimConfig};

/// Swimlane - SWIM group membership and failure detection
///
/// Runs one cluster member. Start the first node without seeds; every other
/// node joins through one or more seeds.
#[derive(Parser, Debug)]
#[command(name = "swimlaned")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    // ============ Node Identity ============
    /// UDP port to listen on (0 = pick a free port)
    #[arg(short, long, default_value = "11000", env = "SWIMLANE_PORT")]
    pub port: u16,

    /// Host peers reach this node on. Learned from the first message
    /// addressed to this node when omitted.
    #[arg(long, env = "SWIMLANE_HOST")]
    pub host: Option<String>,

    /// Seed nodes to join through (comma-separated)
    /// Format: 10.0.0.1:11000,10.0.0.2:11000
    #[arg(long, value_delimiter = ',', env = "SWIMLANE_SEEDS")]
    pub seeds: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    // ============ Protocol Timing ============
    /// Protocol period in milliseconds
    #[arg(long, default_value = "1000", env = "SWIMLANE_PROTOCOL_PERIOD_MS")]
    pub protocol_period_ms: u64,

    /// Probe acknowledgment timeout in milliseconds
    #[arg(long, default_value = "500", env = "SWIMLANE_PING_TIMEOUT_MS")]
    pub ping_timeout_ms: u64,

    /// Time a suspect has to refute before it is declared faulty
    #[arg(long, default_value = "1000", env = "SWIMLANE_SUSPECT_TIMEOUT_MS")]
    pub suspect_timeout_ms: u64,

    /// How long faulty records are kept before eviction (defaults to the
    /// suspect timeout)
    #[arg(long, env = "SWIMLANE_FAULTY_RETENTION_MS")]
    pub faulty_retention_ms: Option<u64>,

    // ============ Dissemination ============
    /// Maximum updates piggybacked on one message
    #[arg(long, default_value = "10", env = "SWIMLANE_UPDATES_MAX_SIZE")]
    pub updates_max_size: usize,

    /// Helpers asked to probe an unresponsive peer (0 = disabled)
    #[arg(long, default_value = "0", env = "SWIMLANE_INDIRECT_PROBES")]
    pub indirect_probes: usize,
}

impl Cli {
    /// Parsed seed list
    pub fn seed_peers(&self) -> Result<Vec<PeerId>, String> {
        self.seeds
            .iter()
            .map(|s| {
                s.trim()
                    .parse::<PeerId>()
                    .map_err(|e| format!("invalid seed '{}': {}", s, e))
            })
            .collect()
    }

    /// Convert CLI args to node config
    pub fn to_config(&self) -> Result<SwimConfig, String> {
        let config = SwimConfig {
            port: self.port,
            host: self.host.clone(),
            hosts: self.seed_peers()?,
            protocol_period: Duration::from_millis(self.protocol_period_ms),
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            suspect_timeout: Duration::from_millis(self.suspect_timeout_ms),
            faulty_retention: self.faulty_retention_ms.map(Duration::from_millis),
            updates_max_size: self.updates_max_size,
            indirect_probes: self.indirect_probes,
            ..Default::default()
        };
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.seeds.is_empty() {
            tracing::warn!("No seed nodes specified - this node will found a new cluster");
        }

        let config = self.to_config()?;
        config.validate().map_err(|e| e.to_string())
    }
}
