//! Node handle
//!
//! A [`Node`] is a cheap handle to one protocol engine. `start` binds the
//! transport and spawns the engine task; every query is a message to that
//! task, answered over a oneshot channel.

use crate::codec::{Codec, PostcardCodec};
use crate::config::SwimConfig;
use crate::engine::{Command, Engine};
use crate::error::{Result, SwimError};
use crate::event::{MembershipListener, NodeEvent, Observers};
use crate::member::{LocalMember, Member, PeerId};
use crate::transport::{Transport, UdpTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Queued commands per node
const COMMAND_CHANNEL_CAPACITY: usize = 64;

struct Running {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// One cluster member
pub struct Node {
    config: SwimConfig,
    observers: Observers,
    transport: Option<Arc<dyn Transport>>,
    codec: Arc<dyn Codec>,
    running: Option<Running>,
}

impl Node {
    /// Node with default collaborators: UDP transport, postcard codec
    pub fn new(config: SwimConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: SwimConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    pub fn config(&self) -> &SwimConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Subscribe to node events. Subscribing before `start` sees `Up`.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.observers.subscribe()
    }

    /// Bind the transport, contact seeds and start the protocol
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(SwimError::AlreadyRunning);
        }
        self.config.validate()?;

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(UdpTransport::bind(&self.config.bind_addr()).await?),
        };
        let local_addr = transport.local_addr()?;
        let local = LocalMember::new(self.config.host.clone(), local_addr.port());

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let engine = Engine::new(
            self.config.clone(),
            local,
            transport,
            self.codec.clone(),
            self.observers.clone(),
            rx,
        );
        let task = tokio::spawn(engine.run());

        info!(addr = %local_addr, "Node started");
        self.running = Some(Running {
            commands: tx,
            task,
            local_addr,
        });
        Ok(())
    }

    /// Announce departure to every peer and stop
    pub async fn stop(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(SwimError::NotRunning)?;

        let (tx, rx) = oneshot::channel();
        if running.commands.send(Command::Leave(tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = running.task.await {
            debug!(error = %e, "Protocol task ended abnormally");
        }
        info!(addr = %running.local_addr, "Node stopped");
        Ok(())
    }

    /// Stop immediately without telling anyone, as if the process died
    pub fn abort(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(SwimError::NotRunning)?;
        running.task.abort();
        info!(addr = %running.local_addr, "Node aborted");
        Ok(())
    }

    /// Address the transport is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.running
            .as_ref()
            .map(|r| r.local_addr)
            .ok_or(SwimError::NotRunning)
    }

    // ==================== Queries ====================

    /// What this node knows about itself
    pub async fn whoami(&self) -> Result<LocalMember> {
        self.request(Command::WhoAmI).await
    }

    /// Visible membership list: this node (once its host is known) followed by
    /// every non-faulty peer in first-seen order
    pub async fn members(&self) -> Result<Vec<PeerId>> {
        self.request(Command::Members).await
    }

    /// Records of every visible peer
    pub async fn membership_snapshot(&self) -> Result<Vec<Member>> {
        self.request(Command::Snapshot).await
    }

    /// Record for one peer, including faulty records not yet evicted
    pub async fn member(&self, peer: &PeerId) -> Result<Option<Member>> {
        let peer = peer.clone();
        self.request(|reply| Command::Member(peer, reply)).await
    }

    /// Updates queued for dissemination
    pub async fn pending_update_count(&self) -> Result<usize> {
        self.request(Command::PendingUpdates).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let running = self.running.as_ref().ok_or(SwimError::NotRunning)?;
        let (tx, rx) = oneshot::channel();
        running.commands.send(make(tx)).await?;
        Ok(rx.await?)
    }
}

/// Builder for a node with custom collaborators
pub struct NodeBuilder {
    config: SwimConfig,
    listeners: Vec<Arc<dyn MembershipListener>>,
    transport: Option<Arc<dyn Transport>>,
    codec: Option<Arc<dyn Codec>>,
}

impl NodeBuilder {
    pub fn new(config: SwimConfig) -> Self {
        Self {
            config,
            listeners: Vec::new(),
            transport: None,
            codec: None,
        }
    }

    /// Register an observer called synchronously from the protocol loop
    pub fn listener(mut self, listener: Arc<dyn MembershipListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Use `transport` instead of binding a UDP socket
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    pub fn build(self) -> Result<Node> {
        self.config.validate()?;
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(PostcardCodec::new(self.config.max_message_size)));

        Ok(Node {
            observers: Observers::new(self.listeners),
            transport: self.transport,
            codec,
            running: None,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::NodeState;
    use crate::transport::MemoryNetwork;

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let network = MemoryNetwork::new();
        let mut node = Node::builder(SwimConfig::local())
            .transport(network.bind(0).unwrap())
            .build()
            .unwrap();

        assert!(matches!(node.whoami().await, Err(SwimError::NotRunning)));
        assert!(matches!(node.stop().await, Err(SwimError::NotRunning)));
        assert!(matches!(node.abort(), Err(SwimError::NotRunning)));
        assert!(node.local_addr().is_err());

        node.start().await.unwrap();
        assert!(matches!(node.start().await, Err(SwimError::AlreadyRunning)));

        node.stop().await.unwrap();
        assert!(!node.is_running());
        assert!(matches!(node.members().await, Err(SwimError::NotRunning)));
    }

    #[tokio::test]
    async fn test_founder_is_joined_with_self_as_only_member() {
        let network = MemoryNetwork::new();
        let mut node = Node::builder(SwimConfig::local())
            .transport(network.bind(0).unwrap())
            .build()
            .unwrap();
        let mut events = node.subscribe();

        node.start().await.unwrap();
        let port = node.local_addr().unwrap().port();

        assert!(matches!(events.recv().await.unwrap(), NodeEvent::Up(_)));
        assert!(matches!(events.recv().await.unwrap(), NodeEvent::Joined(_)));

        let me = node.whoami().await.unwrap();
        assert_eq!(me.state, NodeState::Joined);
        assert_eq!(me.port, port);
        assert_eq!(me.incarnation, 0);
        assert_eq!(
            node.members().await.unwrap(),
            vec![PeerId::new("127.0.0.1", port)]
        );
        assert!(node.membership_snapshot().await.unwrap().is_empty());
        assert_eq!(node.pending_update_count().await.unwrap(), 0);

        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_by_builder() {
        let config = SwimConfig {
            updates_max_size: 0,
            ..SwimConfig::local()
        };
        assert!(matches!(
            Node::new(config),
            Err(SwimError::InvalidConfig(_))
        ));
    }
}
