//! Node configuration
//!
//! Every option has a default, so `SwimConfig::default()` is a valid founder
//! listening on port 11000. Nodes that should join an existing cluster list
//! one or more seeds in `hosts`.

use crate::error::{Result, SwimError};
use crate::member::PeerId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default UDP port
pub const DEFAULT_PORT: u16 = 11000;

/// Largest payload that fits in a single UDP datagram over IPv4
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// SWIM protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwimConfig {
    /// Port to listen on; 0 picks an ephemeral port
    pub port: u16,

    /// Host peers reach us on. Learned from the first peer that contacts us
    /// when unset.
    pub host: Option<String>,

    /// Seed peers contacted on start
    pub hosts: Vec<PeerId>,

    /// Interval between probe rounds
    pub protocol_period: Duration,

    /// How long to wait for an ack before suspecting
    pub ping_timeout: Duration,

    /// How long a suspect has to refute before it is declared faulty
    pub suspect_timeout: Duration,

    /// How long faulty records are kept before eviction.
    /// Defaults to `suspect_timeout`.
    pub faulty_retention: Option<Duration>,

    /// Maximum number of updates piggybacked on one message
    pub updates_max_size: usize,

    /// Helpers asked to probe on our behalf after a missed ack (0 disables)
    pub indirect_probes: usize,

    /// Upper bound on an encoded message
    pub max_message_size: usize,
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: None,
            hosts: Vec::new(),
            protocol_period: Duration::from_secs(1),
            ping_timeout: Duration::from_millis(500),
            suspect_timeout: Duration::from_secs(1),
            faulty_retention: None,
            updates_max_size: 10,
            indirect_probes: 0,
            max_message_size: MAX_UDP_PAYLOAD,
        }
    }
}

impl SwimConfig {
    /// Create configuration builder
    pub fn builder() -> SwimConfigBuilder {
        SwimConfigBuilder::new()
    }

    /// Fast timings on loopback with an ephemeral port
    pub fn local() -> Self {
        Self {
            port: 0,
            host: Some("127.0.0.1".to_string()),
            protocol_period: Duration::from_millis(100),
            ping_timeout: Duration::from_millis(50),
            suspect_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    /// Effective eviction delay for faulty records
    pub fn faulty_retention(&self) -> Duration {
        self.faulty_retention.unwrap_or(self.suspect_timeout)
    }

    /// Address the transport binds to
    pub fn bind_addr(&self) -> String {
        let host = self.host.as_deref().unwrap_or("0.0.0.0");
        PeerId::new(host, self.port).to_string()
    }

    /// Our configured identity, when host and port are both fixed
    pub fn advertised(&self) -> Option<PeerId> {
        match (&self.host, self.port) {
            (Some(host), port) if port != 0 => Some(PeerId::new(host.clone(), port)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("protocol_period", self.protocol_period),
            ("ping_timeout", self.ping_timeout),
            ("suspect_timeout", self.suspect_timeout),
            ("faulty_retention", self.faulty_retention()),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(SwimError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }

        if self.ping_timeout >= self.protocol_period {
            return Err(SwimError::InvalidConfig(format!(
                "ping_timeout ({:?}) must be shorter than protocol_period ({:?})",
                self.ping_timeout, self.protocol_period
            )));
        }

        if self.updates_max_size == 0 {
            return Err(SwimError::InvalidConfig(
                "updates_max_size must be at least 1".to_string(),
            ));
        }

        if self.max_message_size == 0 || self.max_message_size > MAX_UDP_PAYLOAD {
            return Err(SwimError::InvalidConfig(format!(
                "max_message_size must be between 1 and {}",
                MAX_UDP_PAYLOAD
            )));
        }

        if let Some(me) = self.advertised() {
            if self.hosts.contains(&me) {
                return Err(SwimError::InvalidConfig(format!(
                    "seed list contains own address {}",
                    me
                )));
            }
        }

        Ok(())
    }
}

/// Builder for node configuration
#[derive(Debug, Default)]
pub struct SwimConfigBuilder {
    config: SwimConfig,
}

impl SwimConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: SwimConfig) -> Self {
        Self { config }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = Some(host.into());
        self
    }

    pub fn seed(mut self, seed: PeerId) -> Self {
        self.config.hosts.push(seed);
        self
    }

    pub fn seeds(mut self, seeds: impl IntoIterator<Item = PeerId>) -> Self {
        self.config.hosts = seeds.into_iter().collect();
        self
    }

    pub fn protocol_period(mut self, period: Duration) -> Self {
        self.config.protocol_period = period;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    pub fn suspect_timeout(mut self, timeout: Duration) -> Self {
        self.config.suspect_timeout = timeout;
        self
    }

    pub fn faulty_retention(mut self, retention: Duration) -> Self {
        self.config.faulty_retention = Some(retention);
        self
    }

    pub fn updates_max_size(mut self, size: usize) -> Self {
        self.config.updates_max_size = size;
        self
    }

    pub fn indirect_probes(mut self, count: usize) -> Self {
        self.config.indirect_probes = count;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<SwimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
