//! Protocol messages
//!
//! Every message names its sender, the destination as the sender knows it,
//! the sender's incarnation, and a batch of piggybacked updates. The variant
//! order of [`MessageKind`] is the wire discriminator and matches
//! [`MessageType`].

use crate::member::PeerId;
use crate::update::Update;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Message type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Join = 0,
    JoinAck = 1,
    Ping = 2,
    Ack = 3,
    PingReq = 4,
    Gossip = 5,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Join => "join",
            MessageType::JoinAck => "join-ack",
            MessageType::Ping => "ping",
            MessageType::Ack => "ack",
            MessageType::PingReq => "ping-req",
            MessageType::Gossip => "gossip",
        };
        f.write_str(s)
    }
}

/// Type-specific payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Ask a seed to admit us
    Join,
    /// Admission, carrying how the seed sees the joiner
    JoinAck { joiner: PeerId },
    /// Direct liveness probe
    Ping { seq: u64 },
    /// Answer to a ping, echoing its sequence number
    Ack { seq: u64 },
    /// Ask the recipient to probe `target` for us
    PingReq { seq: u64, target: PeerId },
    /// Updates only; used to announce departure
    Gossip,
}

impl MessageKind {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageKind::Join => MessageType::Join,
            MessageKind::JoinAck { .. } => MessageType::JoinAck,
            MessageKind::Ping { .. } => MessageType::Ping,
            MessageKind::Ack { .. } => MessageType::Ack,
            MessageKind::PingReq { .. } => MessageType::PingReq,
            MessageKind::Gossip => MessageType::Gossip,
        }
    }
}

/// Sender as it describes itself. A sender that has not yet learned its own
/// host leaves it out; receivers fill it in from the datagram source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub host: Option<String>,
    pub port: u16,
}

impl Sender {
    /// Identity of the sender given the address the datagram came from
    pub fn resolve(&self, source: SocketAddr) -> PeerId {
        match &self.host {
            Some(host) => PeerId::new(host.clone(), self.port),
            None => PeerId::new(source.ip().to_string(), self.port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: Sender,
    pub destination: PeerId,
    pub incarnation: u64,
    pub updates: Vec<Update>,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        self.kind.message_type()
    }
}
