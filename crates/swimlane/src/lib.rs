//! # Swimlane
//!
//! Group membership and failure detection for clusters of peers, built on the
//! SWIM protocol:
//! - **Probing**: one randomized ping per protocol period, with optional
//!   indirect probes through helpers
//! - **Suspicion**: unanswered probes mark a peer suspect; it becomes faulty
//!   unless it refutes within `suspect_timeout`
//! - **Gossip**: membership updates ride on protocol messages instead of
//!   being broadcast
//! - **Self-discovery**: a node needs only its port; it learns the host
//!   peers reach it on from the first message addressed to it
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Node (handle)                        │
//! │      start / stop / abort / whoami / members / ...       │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │ commands
//! ┌───────────────────────────▼──────────────────────────────┐
//! │                    Engine (one task)                     │
//! ├──────────────┬──────────────┬──────────────┬─────────────┤
//! │ MemberTable  │  Resolver    │ Dissemination│  Failure    │
//! │ best record  │ incarnation  │ FIFO update  │  Detector   │
//! │ per peer     │ precedence   │ batches      │  timers     │
//! ├──────────────┴──────────────┴──────────────┴─────────────┤
//! │           Codec (postcard)  ·  Transport (UDP)           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use swimlane::{Node, NodeEvent, PeerId, SwimConfig};
//!
//! // First node founds the cluster
//! let mut seed = Node::new(SwimConfig::builder().port(11000).build()?)?;
//! seed.start().await?;
//!
//! // Others join through it
//! let config = SwimConfig::builder()
//!     .port(11001)
//!     .seed("10.0.0.1:11000".parse::<PeerId>()?)
//!     .build()?;
//! let mut node = Node::new(config)?;
//! let mut events = node.subscribe();
//! node.start().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let NodeEvent::PeerDown(member) = event {
//!         println!("{} is gone", member.node);
//!     }
//! }
//! ```

pub mod codec;
pub mod config;
pub mod detector;
pub mod dissemination;
mod engine;
pub mod error;
pub mod event;
pub mod member;
pub mod members;
pub mod message;
pub mod node;
pub mod observability;
pub mod resolver;
pub mod transport;
pub mod update;

// Re-export main types
pub use codec::{Codec, PostcardCodec};
pub use config::{SwimConfig, SwimConfigBuilder, DEFAULT_PORT, MAX_UDP_PAYLOAD};
pub use error::{Result, SwimError};
pub use event::{MembershipListener, NodeEvent};
pub use member::{LocalMember, Member, MemberState, NodeState, PeerId};
pub use members::MemberTable;
pub use message::{Message, MessageKind, MessageType, Sender};
pub use node::{Node, NodeBuilder};
pub use observability::{NetworkMetrics, SwimMetrics};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};
pub use update::{Update, UpdateStore};

/// Re-export common types
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::event::*;
    pub use crate::member::*;
    pub use crate::node::*;
}
