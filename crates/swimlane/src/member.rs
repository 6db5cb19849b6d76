//! Peer identity and member records

use crate::error::SwimError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Stable identity of a cluster member: the address it is reachable on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId {
    pub host: String,
    pub port: u16,
}

impl PeerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerId {
    type Err = SwimError;

    /// Parse `host:port`, with IPv6 hosts written as `[addr]:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| SwimError::InvalidPeer(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(SwimError::InvalidPeer(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| SwimError::InvalidPeer(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for PeerId {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Liveness state of a remote member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    /// Responding to probes
    Alive,
    /// Missed a probe; will be declared faulty unless it refutes
    Suspect,
    /// Declared failed or departed
    Faulty,
}

impl MemberState {
    /// Precedence between facts carrying the same incarnation
    pub fn rank(&self) -> u8 {
        match self {
            MemberState::Alive => 0,
            MemberState::Suspect => 1,
            MemberState::Faulty => 2,
        }
    }

    /// Whether a member in this state belongs to the visible membership list
    pub fn is_member(&self) -> bool {
        !matches!(self, MemberState::Faulty)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberState::Alive => "alive",
            MemberState::Suspect => "suspect",
            MemberState::Faulty => "faulty",
        };
        f.write_str(s)
    }
}

/// Lifecycle of the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Started, join handshake still pending
    #[default]
    Joining,
    /// Part of the cluster
    Joined,
    /// Stopped after announcing departure
    Left,
}

/// Best-known record about a remote member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub node: PeerId,
    pub state: MemberState,

    /// Incarnation number, only ever raised by `node` itself
    pub incarnation: u64,

    /// Who asserted the current state
    pub set_by: PeerId,

    /// Last time we heard from this member directly
    pub last_contact: Option<Instant>,
}

impl Member {
    /// Update last contact time
    pub fn touch(&mut self) {
        self.last_contact = Some(Instant::now());
    }

    pub fn is_member(&self) -> bool {
        self.state.is_member()
    }
}

/// What the local node knows about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMember {
    /// Unknown until configured or learned from a peer
    pub host: Option<String>,
    pub port: u16,
    pub state: NodeState,
    pub incarnation: u64,
}

impl LocalMember {
    pub fn new(host: Option<String>, port: u16) -> Self {
        Self {
            host,
            port,
            state: NodeState::Joining,
            incarnation: 0,
        }
    }

    /// Our identity as peers see it, once the host is known
    pub fn peer_id(&self) -> Option<PeerId> {
        self.host
            .as_ref()
            .map(|host| PeerId::new(host.clone(), self.port))
    }

    /// Whether `peer` names this node
    pub fn is(&self, peer: &PeerId) -> bool {
        peer.port == self.port && self.host.as_deref() == Some(peer.host.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_parse_and_display() {
        let peer: PeerId = "127.0.0.1:12340".parse().unwrap();
        assert_eq!(peer, PeerId::new("127.0.0.1", 12340));
        assert_eq!(peer.to_string(), "127.0.0.1:12340");

        let v6: PeerId = "[::1]:7000".parse().unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "[::1]:7000");

        let named: PeerId = "node-1.cluster:9000".parse().unwrap();
        assert_eq!(named.host, "node-1.cluster");

        assert!("no-port".parse::<PeerId>().is_err());
        assert!(":9000".parse::<PeerId>().is_err());
        assert!("host:99999".parse::<PeerId>().is_err());
    }

    #[test]
    fn test_peer_id_equality_is_by_host_and_port() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PeerId::new("host1", 1234));
        set.insert(PeerId::new("host1", 1234));
        set.insert(PeerId::new("host1", 5678));
        set.insert(PeerId::new("host2", 1234));

        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_state_rank() {
        assert!(MemberState::Alive.rank() < MemberState::Suspect.rank());
        assert!(MemberState::Suspect.rank() < MemberState::Faulty.rank());
        assert!(MemberState::Suspect.is_member());
        assert!(!MemberState::Faulty.is_member());
    }

    #[test]
    fn test_local_member_identity() {
        let mut local = LocalMember::new(None, 11000);
        assert_eq!(local.state, NodeState::Joining);
        assert!(local.peer_id().is_none());
        assert!(!local.is(&PeerId::new("127.0.0.1", 11000)));

        local.host = Some("127.0.0.1".into());
        assert_eq!(local.peer_id(), Some(PeerId::new("127.0.0.1", 11000)));
        assert!(local.is(&PeerId::new("127.0.0.1", 11000)));
        assert!(!local.is(&PeerId::new("127.0.0.1", 11001)));
    }
}
