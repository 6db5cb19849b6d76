//! Node events and observers
//!
//! Events are delivered two ways: synchronously to every registered
//! [`MembershipListener`] from inside the engine task, and asynchronously to
//! any number of `broadcast` subscribers obtained from `Node::subscribe`.
//! Listeners must not block; they run on the protocol loop.

use crate::member::{LocalMember, Member, PeerId};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// The node is listening
    Up(LocalMember),
    /// The join handshake completed, or the node founded a cluster
    Joined(LocalMember),
    /// We pinged a peer as part of a probe
    Ping { target: PeerId },
    /// An ack for one of our probes arrived
    Ack { from: PeerId },
    /// A peer entered the membership list
    PeerUp(Member),
    /// A peer left the membership list, by failure or departure
    PeerDown(Member),
    /// A peer is suspected of having failed
    PeerSuspect(Member),
    /// A suspected peer refuted the suspicion
    PeerAlive(Member),
}

/// Observer for node events. Every method defaults to doing nothing.
pub trait MembershipListener: Send + Sync {
    fn on_up(&self, _local: &LocalMember) {}
    fn on_joined(&self, _local: &LocalMember) {}
    fn on_ping(&self, _target: &PeerId) {}
    fn on_ack(&self, _from: &PeerId) {}
    fn on_peer_up(&self, _member: &Member) {}
    fn on_peer_down(&self, _member: &Member) {}
    fn on_peer_suspect(&self, _member: &Member) {}
    fn on_peer_alive(&self, _member: &Member) {}
}

/// Registered listeners plus the broadcast fan-out
#[derive(Clone)]
pub(crate) struct Observers {
    listeners: Vec<Arc<dyn MembershipListener>>,
    tx: broadcast::Sender<NodeEvent>,
}

impl Observers {
    pub(crate) fn new(listeners: Vec<Arc<dyn MembershipListener>>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { listeners, tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        for listener in &self.listeners {
            match &event {
                NodeEvent::Up(local) => listener.on_up(local),
                NodeEvent::Joined(local) => listener.on_joined(local),
                NodeEvent::Ping { target } => listener.on_ping(target),
                NodeEvent::Ack { from } => listener.on_ack(from),
                NodeEvent::PeerUp(member) => listener.on_peer_up(member),
                NodeEvent::PeerDown(member) => listener.on_peer_down(member),
                NodeEvent::PeerSuspect(member) => listener.on_peer_suspect(member),
                NodeEvent::PeerAlive(member) => listener.on_peer_alive(member),
            }
        }
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::MemberState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        up: AtomicUsize,
        down: AtomicUsize,
    }

    impl MembershipListener for Counter {
        fn on_peer_up(&self, _member: &Member) {
            self.up.fetch_add(1, Ordering::SeqCst);
        }

        fn on_peer_down(&self, _member: &Member) {
            self.down.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn member(state: MemberState) -> Member {
        Member {
            node: PeerId::new("127.0.0.1", 1),
            state,
            incarnation: 0,
            set_by: PeerId::new("127.0.0.1", 1),
            last_contact: None,
        }
    }

    #[tokio::test]
    async fn test_listeners_and_subscribers_see_events() {
        let counter = Arc::new(Counter::default());
        let observers = Observers::new(vec![counter.clone() as Arc<dyn MembershipListener>]);
        let mut rx = observers.subscribe();

        observers.emit(NodeEvent::PeerUp(member(MemberState::Alive)));
        observers.emit(NodeEvent::Ping {
            target: PeerId::new("127.0.0.1", 1),
        });
        observers.emit(NodeEvent::PeerDown(member(MemberState::Faulty)));

        assert_eq!(counter.up.load(Ordering::SeqCst), 1);
        assert_eq!(counter.down.load(Ordering::SeqCst), 1);

        assert!(matches!(rx.recv().await.unwrap(), NodeEvent::PeerUp(_)));
        assert!(matches!(rx.recv().await.unwrap(), NodeEvent::Ping { .. }));
        assert!(matches!(rx.recv().await.unwrap(), NodeEvent::PeerDown(_)));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let observers = Observers::new(Vec::new());
        observers.emit(NodeEvent::Ack {
            from: PeerId::new("127.0.0.1", 1),
        });
    }
}
