//! Protocol event loop
//!
//! One task per node owns every piece of protocol state: the local record,
//! the member table, the dissemination queue and the failure detector. The
//! loop multiplexes four sources:
//!
//! ```text
//!   protocol period tick ──► probe (or retry JOIN while joining)
//!   detector timers      ──► suspect / declare faulty / evict
//!   inbound datagrams    ──► first-hand contact, updates, replies
//!   node commands        ──► queries, graceful leave
//! ```
//!
//! Nothing is shared with other tasks, so no locks guard protocol state.

use crate::codec::Codec;
use crate::config::SwimConfig;
use crate::detector::{FailureDetector, Relay, Timeout};
use crate::dissemination::Dissemination;
use crate::event::{NodeEvent, Observers};
use crate::member::{LocalMember, Member, MemberState, NodeState, PeerId};
use crate::members::MemberTable;
use crate::message::{Message, MessageKind, MessageType, Sender};
use crate::observability::{NetworkMetrics, SwimMetrics};
use crate::resolver::{Outcome, UpdateProcessor};
use crate::transport::Transport;
use crate::update::Update;
use std::future::poll_fn;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Back-off after a failed receive
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Requests from the `Node` handle
pub(crate) enum Command {
    WhoAmI(oneshot::Sender<LocalMember>),
    Members(oneshot::Sender<Vec<PeerId>>),
    Snapshot(oneshot::Sender<Vec<Member>>),
    Member(PeerId, oneshot::Sender<Option<Member>>),
    PendingUpdates(oneshot::Sender<usize>),
    Leave(oneshot::Sender<()>),
}

pub(crate) struct Engine {
    config: SwimConfig,
    local: LocalMember,
    table: MemberTable,
    dissemination: Dissemination,
    detector: FailureDetector,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    observers: Observers,
    commands: mpsc::Receiver<Command>,
}

impl Engine {
    pub(crate) fn new(
        config: SwimConfig,
        local: LocalMember,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        observers: Observers,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            dissemination: Dissemination::new(config.updates_max_size),
            detector: FailureDetector::new(&config),
            table: MemberTable::new(),
            config,
            local,
            transport,
            codec,
            observers,
            commands,
        }
    }

    pub(crate) async fn run(mut self) {
        self.startup().await;

        let period = self.config.protocol_period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let has_timers = self.detector.has_timers();

            tokio::select! {
                _ = ticker.tick() => {
                    self.on_tick().await;
                }

                Some(timeout) = poll_fn(|cx| self.detector.poll_expired(cx)), if has_timers => {
                    self.on_timeout(timeout).await;
                }

                received = self.transport.recv() => match received {
                    Ok((bytes, from)) => self.on_datagram(&bytes, from).await,
                    Err(e) if e.is_shutdown() => {
                        warn!(error = %e, "Transport closed, stopping");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Receive failed");
                        tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(Command::Leave(reply)) => {
                        self.leave().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("Node handle dropped, stopping");
                        break;
                    }
                },
            }
        }

        self.detector.clear();
        debug!(port = self.local.port, "Protocol loop stopped");
    }

    // ==================== Lifecycle ====================

    async fn startup(&mut self) {
        info!(
            host = ?self.local.host,
            port = self.local.port,
            seeds = self.config.hosts.len(),
            "Node up"
        );
        self.observers.emit(NodeEvent::Up(self.local.clone()));

        if self.config.hosts.is_empty() {
            self.local.state = NodeState::Joined;
            info!("No seeds configured, founding a new cluster");
            self.observers.emit(NodeEvent::Joined(self.local.clone()));
        } else {
            self.send_joins().await;
        }
    }

    /// Announce departure directly to every peer, then go quiet
    async fn leave(&mut self) {
        self.local.state = NodeState::Left;
        self.detector.clear();

        let Some(me) = self.local.peer_id() else {
            debug!("Leaving before anyone knew us");
            return;
        };
        let farewell = Update::faulty(me.clone(), me, self.local.incarnation);
        let peers: Vec<PeerId> = self.table.visible().map(|m| m.node.clone()).collect();

        info!(
            peers = peers.len(),
            incarnation = self.local.incarnation,
            "Leaving cluster"
        );
        for peer in peers {
            let message = self.message(MessageKind::Gossip, &peer, vec![farewell.clone()]);
            self.transmit(&message, &peer).await;
        }
    }

    // ==================== Protocol Period ====================

    async fn on_tick(&mut self) {
        match self.local.state {
            NodeState::Joining => {
                debug!("Still joining, retrying seeds");
                self.send_joins().await;
                self.probe().await;
            }
            NodeState::Joined => self.probe().await,
            NodeState::Left => {}
        }
        self.record_gauges();
    }

    async fn send_joins(&mut self) {
        for seed in self.config.hosts.clone() {
            let message = self.message(MessageKind::Join, &seed, Vec::new());
            self.transmit(&message, &seed).await;
        }
    }

    async fn probe(&mut self) {
        let Some(target) = self.detector.select_target(&self.table) else {
            return;
        };
        let seq = self.detector.start_probe(target.clone());
        SwimMetrics::increment_probes();
        trace!(peer = %target, seq, "Probing");
        self.send(MessageKind::Ping { seq }, &target).await;
        self.observers.emit(NodeEvent::Ping { target });
    }

    // ==================== Timers ====================

    async fn on_timeout(&mut self, timeout: Timeout) {
        match timeout {
            Timeout::Ack { seq, target } => {
                SwimMetrics::increment_probe_timeouts();
                if self.config.indirect_probes > 0 {
                    let helpers =
                        self.detector
                            .select_helpers(&self.table, &target, self.config.indirect_probes);
                    if !helpers.is_empty() {
                        debug!(peer = %target, helpers = helpers.len(), "No ack, probing indirectly");
                        SwimMetrics::increment_indirect_probes(helpers.len());
                        self.detector.start_indirect(seq, target.clone());
                        for helper in helpers {
                            let kind = MessageKind::PingReq {
                                seq,
                                target: target.clone(),
                            };
                            self.send(kind, &helper).await;
                        }
                        return;
                    }
                }
                self.suspect(target);
            }
            Timeout::Indirect { target, .. } => self.suspect(target),
            Timeout::Suspicion { peer } => self.declare_faulty(peer),
            Timeout::Eviction { peer } => {
                if self.table.get(&peer).is_some_and(|m| m.state == MemberState::Faulty) {
                    self.table.evict(&peer);
                    SwimMetrics::increment_evictions();
                    debug!(peer = %peer, "Evicted faulty member");
                }
            }
            Timeout::Relay { relay, .. } => {
                trace!(
                    target = %relay.target,
                    requester = %relay.requester,
                    "Relayed probe went unanswered"
                );
            }
        }
        self.record_gauges();
    }

    /// Probe went unanswered: raise a local suspicion
    fn suspect(&mut self, peer: PeerId) {
        let Some(me) = self.local.peer_id() else {
            return;
        };
        let Some(member) = self.table.get(&peer) else {
            return;
        };
        if member.state != MemberState::Alive {
            return;
        }
        debug!(peer = %peer, incarnation = member.incarnation, "Probe failed, suspecting");
        let update = Update::suspect(peer, me, member.incarnation);
        self.apply(vec![update]);
    }

    /// Suspicion expired without refutation
    fn declare_faulty(&mut self, peer: PeerId) {
        let Some(me) = self.local.peer_id() else {
            return;
        };
        let Some(member) = self.table.get(&peer) else {
            return;
        };
        if member.state != MemberState::Suspect {
            return;
        }
        info!(peer = %peer, incarnation = member.incarnation, "Suspicion expired, declaring faulty");
        let update = Update::faulty(peer, me, member.incarnation);
        self.apply(vec![update]);
    }

    // ==================== Inbound ====================

    async fn on_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        let message = match self.codec.decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                NetworkMetrics::increment_decode_errors();
                warn!(%from, error = %e, "Dropping undecodable datagram");
                return;
            }
        };
        NetworkMetrics::increment_received(message.message_type(), bytes.len());

        if self.local.state == NodeState::Left {
            return;
        }

        self.discover_host(&message);
        let sender = message.sender.resolve(from);
        if self.local.is(&sender) {
            trace!("Ignoring message from self");
            return;
        }
        trace!(
            kind = %message.message_type(),
            from = %sender,
            updates = message.updates.len(),
            "Received message"
        );

        if message.kind == MessageKind::Join {
            self.admit(&sender);
        }

        // First-hand contact, applied ahead of anything piggybacked
        self.apply(vec![Update::alive(
            sender.clone(),
            sender.clone(),
            message.incarnation,
        )]);
        self.table.touch(&sender);
        self.apply(message.updates);

        match message.kind {
            MessageKind::Join => {
                info!(peer = %sender, "Admitting joiner");
                self.send_join_ack(&sender).await;
            }
            MessageKind::JoinAck { .. } => {
                if self.local.state == NodeState::Joining {
                    self.local.state = NodeState::Joined;
                    info!(
                        seed = %sender,
                        members = self.table.visible_len(),
                        "Joined cluster"
                    );
                    self.observers.emit(NodeEvent::Joined(self.local.clone()));
                }
            }
            MessageKind::Ping { seq } => {
                self.send(MessageKind::Ack { seq }, &sender).await;
            }
            MessageKind::Ack { seq } => self.on_ack(seq, &sender).await,
            MessageKind::PingReq { seq, target } => {
                let relay_seq = self.detector.start_relay(Relay {
                    requester: sender.clone(),
                    requester_seq: seq,
                    target: target.clone(),
                });
                trace!(target = %target, requester = %sender, "Probing on behalf of peer");
                self.send(MessageKind::Ping { seq: relay_seq }, &target).await;
            }
            MessageKind::Gossip => {}
        }
        self.record_gauges();
    }

    async fn on_ack(&mut self, seq: u64, sender: &PeerId) {
        if let Some(target) = self.detector.complete_probe(seq) {
            trace!(peer = %target, seq, "Probe acknowledged");
            self.observers.emit(NodeEvent::Ack { from: target });
        } else if let Some(relay) = self.detector.complete_relay(seq) {
            trace!(target = %relay.target, requester = %relay.requester, "Relaying ack");
            let kind = MessageKind::Ack {
                seq: relay.requester_seq,
            };
            self.send(kind, &relay.requester).await;
        } else {
            trace!(peer = %sender, seq, "Late or unknown ack");
        }
    }

    /// Learn our own host from how a peer addressed us
    fn discover_host(&mut self, message: &Message) {
        if self.local.host.is_some() {
            return;
        }
        let observed = match &message.kind {
            MessageKind::JoinAck { joiner } => joiner,
            _ => &message.destination,
        };
        if observed.port != self.local.port {
            return;
        }
        info!(host = %observed.host, port = self.local.port, "Discovered own host");
        self.local.host = Some(observed.host.clone());
    }

    /// A JOIN from a peer we hold as faulty is a restart: forget the old record
    fn admit(&mut self, joiner: &PeerId) {
        if self.table.get(joiner).is_some_and(|m| m.state == MemberState::Faulty) {
            debug!(peer = %joiner, "Faulty member rejoining");
            self.detector.cancel_eviction(joiner);
            self.table.evict(joiner);
        }
    }

    /// Reply to a joiner with our full view: ourselves, every record except
    /// the joiner's, then one dissemination batch. The view is split across
    /// as many JoinAcks as needed to stay within the message size limit.
    async fn send_join_ack(&mut self, joiner: &PeerId) {
        let mut updates: Vec<Update> = Vec::with_capacity(self.table.len() + 1);
        if let Some(me) = self.local.peer_id() {
            updates.push(Update::alive(me.clone(), me, self.local.incarnation));
        }
        updates.extend(
            self.table
                .iter()
                .filter(|m| &m.node != joiner)
                .map(Update::from),
        );
        updates.extend(self.dissemination.batch_for(None));

        let kind = MessageKind::JoinAck {
            joiner: joiner.clone(),
        };
        let mut message = self.message(kind, joiner, Vec::new());
        let mut encoded: Option<Vec<u8>> = None;
        let mut sent = 0usize;

        for update in updates {
            message.updates.push(update);
            match self.codec.encode(&message) {
                Ok(bytes) => encoded = Some(bytes),
                Err(_) if message.updates.len() > 1 => {
                    // Flush what fit and start the next message with this update
                    if let Some(bytes) = encoded.take() {
                        self.send_bytes(MessageType::JoinAck, &bytes, joiner).await;
                        sent += 1;
                    }
                    let overflow = message.updates.split_off(message.updates.len() - 1);
                    message.updates = overflow;
                    match self.codec.encode(&message) {
                        Ok(bytes) => encoded = Some(bytes),
                        Err(e) => {
                            warn!(peer = %joiner, error = %e, "Update does not fit in a JoinAck, skipping");
                            message.updates.clear();
                        }
                    }
                }
                Err(e) => {
                    warn!(peer = %joiner, error = %e, "Update does not fit in a JoinAck, skipping");
                    message.updates.clear();
                }
            }
        }

        if let Some(bytes) = encoded {
            self.send_bytes(MessageType::JoinAck, &bytes, joiner).await;
            sent += 1;
        }
        if sent == 0 {
            message.updates.clear();
            self.transmit(&message, joiner).await;
            sent = 1;
        }
        debug!(peer = %joiner, messages = sent, "Sent join acknowledgment");
    }

    // ==================== Updates ====================

    fn apply(&mut self, updates: Vec<Update>) {
        if updates.is_empty() {
            return;
        }
        let outcomes =
            UpdateProcessor::new(&mut self.local, &mut self.table, &mut self.dissemination)
                .process_updates(updates);
        for outcome in outcomes {
            self.react(outcome);
        }
    }

    /// Timers and events that follow an accepted update
    fn react(&mut self, outcome: Outcome) {
        let peer_up = outcome.is_peer_up();
        let peer_down = outcome.is_peer_down();

        match outcome {
            Outcome::Refuted { incarnation } => {
                SwimMetrics::increment_refutations();
                SwimMetrics::set_incarnation(incarnation);
            }
            Outcome::Discovered { peer, state, .. } => {
                SwimMetrics::increment_transitions(state);
                match state {
                    MemberState::Alive => {}
                    MemberState::Suspect => self.detector.start_suspicion(peer.clone()),
                    MemberState::Faulty => self.detector.schedule_eviction(peer.clone()),
                }
                if peer_up {
                    self.emit_member(&peer, NodeEvent::PeerUp);
                }
            }
            Outcome::Changed {
                peer,
                from,
                to,
                from_incarnation,
                incarnation,
            } => {
                if from != to {
                    SwimMetrics::increment_transitions(to);
                }

                match to {
                    MemberState::Faulty => {
                        self.detector.cancel_suspicion(&peer);
                        self.detector.schedule_eviction(peer.clone());
                    }
                    MemberState::Suspect => {
                        if from == MemberState::Faulty {
                            self.detector.cancel_eviction(&peer);
                        }
                        let renewed = incarnation > from_incarnation;
                        if from != MemberState::Suspect
                            || renewed
                            || !self.detector.is_suspecting(&peer)
                        {
                            self.detector.start_suspicion(peer.clone());
                        }
                        if from == MemberState::Alive {
                            debug!(peer = %peer, incarnation, "Member suspected");
                            self.emit_member(&peer, NodeEvent::PeerSuspect);
                        }
                    }
                    MemberState::Alive => match from {
                        MemberState::Faulty => {
                            self.detector.cancel_eviction(&peer);
                        }
                        MemberState::Suspect => {
                            self.detector.cancel_suspicion(&peer);
                            debug!(peer = %peer, incarnation, "Suspicion refuted");
                            self.emit_member(&peer, NodeEvent::PeerAlive);
                        }
                        MemberState::Alive => {}
                    },
                }

                if peer_up {
                    self.emit_member(&peer, NodeEvent::PeerUp);
                }
                if peer_down {
                    info!(peer = %peer, incarnation, "Member is down");
                    self.emit_member(&peer, NodeEvent::PeerDown);
                }
            }
        }
    }

    fn emit_member(&self, peer: &PeerId, event: fn(Member) -> NodeEvent) {
        if let Some(member) = self.table.get(peer) {
            self.observers.emit(event(member.clone()));
        }
    }

    // ==================== Outbound ====================

    fn message(&self, kind: MessageKind, to: &PeerId, updates: Vec<Update>) -> Message {
        Message {
            kind,
            sender: Sender {
                host: self.local.host.clone(),
                port: self.local.port,
            },
            destination: to.clone(),
            incarnation: self.local.incarnation,
            updates,
        }
    }

    /// Send with one batch of piggybacked updates, plus the recipient's own
    /// record when we hold it as suspect or faulty
    async fn send(&mut self, kind: MessageKind, to: &PeerId) {
        let accusation = self
            .table
            .get(to)
            .filter(|m| m.state != MemberState::Alive)
            .map(Update::from);
        let updates = self.dissemination.batch_for(accusation);
        let message = self.message(kind, to, updates);
        self.transmit(&message, to).await;
    }

    /// Encode and send; failures are logged and otherwise ignored
    async fn transmit(&self, message: &Message, to: &PeerId) {
        match self.codec.encode(message) {
            Ok(bytes) => self.send_bytes(message.message_type(), &bytes, to).await,
            Err(e) => {
                warn!(peer = %to, kind = %message.message_type(), error = %e, "Failed to encode message");
            }
        }
    }

    async fn send_bytes(&self, kind: MessageType, bytes: &[u8], to: &PeerId) {
        match self.transport.send(bytes, to).await {
            Ok(()) => NetworkMetrics::increment_sent(kind, bytes.len()),
            Err(e) => {
                NetworkMetrics::increment_send_errors();
                if e.is_retriable() {
                    debug!(peer = %to, %kind, error = %e, "Send failed");
                } else {
                    warn!(peer = %to, %kind, error = %e, "Send failed");
                }
            }
        }
    }

    // ==================== Commands ====================

    fn on_command(&mut self, command: Command) {
        match command {
            Command::WhoAmI(reply) => {
                let _ = reply.send(self.local.clone());
            }
            Command::Members(reply) => {
                let mut members = Vec::with_capacity(self.table.len() + 1);
                members.extend(self.local.peer_id());
                members.extend(self.table.visible().map(|m| m.node.clone()));
                let _ = reply.send(members);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.table.snapshot());
            }
            Command::Member(peer, reply) => {
                let _ = reply.send(self.table.get(&peer).cloned());
            }
            Command::PendingUpdates(reply) => {
                let _ = reply.send(self.dissemination.pending());
            }
            Command::Leave(reply) => {
                // Handled by the loop
                let _ = reply.send(());
            }
        }
    }

    fn record_gauges(&self) {
        SwimMetrics::set_member_count(self.table.visible_len() + 1);
        SwimMetrics::set_pending_updates(self.dissemination.pending());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PostcardCodec;
    use crate::transport::{MemoryNetwork, MemoryTransport};
    use std::collections::HashSet;

    use tokio::sync::broadcast;

    struct Harness {
        engine: Engine,
        network: MemoryNetwork,
        peer: MemoryTransport,
        peer_id: PeerId,
        codec: PostcardCodec,
        events: broadcast::Receiver<NodeEvent>,
        _commands: mpsc::Sender<Command>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(SwimConfig::local())
        }

        fn with_config(config: SwimConfig) -> Self {
            let network = MemoryNetwork::new();
            let transport = network.bind(0).unwrap();
            let port = transport.local_addr().unwrap().port();
            let peer = network.bind(0).unwrap();
            let peer_id = PeerId::from(peer.local_addr().unwrap());

            let local = LocalMember::new(Some("127.0.0.1".into()), port);
            let codec = PostcardCodec::new(config.max_message_size);
            let observers = Observers::new(Vec::new());
            let events = observers.subscribe();
            let (tx, rx) = mpsc::channel(8);
            let engine = Engine::new(
                config,
                local,
                Arc::new(transport),
                Arc::new(codec.clone()),
                observers,
                rx,
            );
            Self {
                engine,
                network,
                peer,
                peer_id,
                codec: PostcardCodec::default(),
                events,
                _commands: tx,
            }
        }

        fn me(&self) -> PeerId {
            self.engine.local.peer_id().unwrap()
        }

        async fn deliver(&mut self, kind: MessageKind, incarnation: u64, updates: Vec<Update>) {
            let message = Message {
                kind,
                sender: Sender {
                    host: None,
                    port: self.peer_id.port,
                },
                destination: self.me(),
                incarnation,
                updates,
            };
            let bytes = self.codec.encode(&message).unwrap();
            let from = self.peer.local_addr().unwrap();
            self.engine.on_datagram(&bytes, from).await;
        }

        async fn reply(&self) -> Message {
            let (bytes, _) = self.peer.recv().await.unwrap();
            self.codec.decode(&bytes).unwrap()
        }

        /// Every datagram already queued for the peer, with its encoded size
        async fn drain(&self) -> Vec<(usize, Message)> {
            let mut replies = Vec::new();
            while let Ok(Ok((bytes, _))) =
                tokio::time::timeout(Duration::from_millis(20), self.peer.recv()).await
            {
                replies.push((bytes.len(), self.codec.decode(&bytes).unwrap()));
            }
            replies
        }

        fn emitted(&mut self) -> Vec<NodeEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    #[tokio::test]
    async fn test_ping_is_acked_and_sender_learned() {
        let mut h = Harness::new();
        h.deliver(MessageKind::Ping { seq: 5 }, 2, Vec::new()).await;

        let reply = h.reply().await;
        assert_eq!(reply.kind, MessageKind::Ack { seq: 5 });
        assert_eq!(reply.destination, h.peer_id);

        let member = h.engine.table.get(&h.peer_id).unwrap();
        assert_eq!(member.state, MemberState::Alive);
        assert_eq!(member.incarnation, 2);
        assert!(member.last_contact.is_some());
    }

    #[tokio::test]
    async fn test_ack_carries_accusation_for_faulty_sender() {
        let mut h = Harness::new();
        let me = h.me();
        h.engine.apply(vec![Update::faulty(h.peer_id.clone(), me, 3)]);
        h.engine.dissemination.batch_for(None);

        h.deliver(MessageKind::Ping { seq: 1 }, 0, Vec::new()).await;
        let reply = h.reply().await;
        assert_eq!(reply.updates[0], Update::faulty(h.peer_id.clone(), h.me(), 3));
    }

    #[tokio::test]
    async fn test_suspicion_about_self_is_refuted_in_next_message() {
        let mut h = Harness::new();
        let accusation = Update::suspect(h.me(), h.peer_id.clone(), 0);
        h.deliver(MessageKind::Ping { seq: 1 }, 0, vec![accusation]).await;

        assert_eq!(h.engine.local.incarnation, 1);
        let reply = h.reply().await;
        assert_eq!(reply.incarnation, 1);
        assert!(reply.updates.contains(&Update::alive(h.me(), h.me(), 1)));
    }

    #[tokio::test]
    async fn test_undecodable_datagram_is_dropped() {
        let mut h = Harness::new();
        let from = h.peer.local_addr().unwrap();
        h.engine.on_datagram(&[0xff, 0xff, 0xff], from).await;
        assert!(h.engine.table.is_empty());
    }

    #[tokio::test]
    async fn test_join_from_faulty_member_replaces_record() {
        let mut h = Harness::new();
        let me = h.me();
        h.engine.apply(vec![Update::faulty(h.peer_id.clone(), me, 4)]);

        h.deliver(MessageKind::Join, 0, Vec::new()).await;

        let member = h.engine.table.get(&h.peer_id).unwrap();
        assert_eq!(member.state, MemberState::Alive);
        assert_eq!(member.incarnation, 0);

        let reply = h.reply().await;
        assert_eq!(
            reply.kind,
            MessageKind::JoinAck {
                joiner: h.peer_id.clone()
            }
        );
        assert_eq!(reply.updates[0], Update::alive(h.me(), h.me(), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_ack_leads_to_suspicion_then_faulty() {
        let mut h = Harness::new();
        h.deliver(MessageKind::Gossip, 0, Vec::new()).await;

        h.engine.probe().await;
        assert!(matches!(h.reply().await.kind, MessageKind::Ping { .. }));

        let timeout = h.engine.detector.next_timeout().await.unwrap();
        assert!(matches!(timeout, Timeout::Ack { .. }));
        h.engine.on_timeout(timeout).await;
        assert_eq!(
            h.engine.table.get(&h.peer_id).unwrap().state,
            MemberState::Suspect
        );

        let timeout = h.engine.detector.next_timeout().await.unwrap();
        assert_eq!(
            timeout,
            Timeout::Suspicion {
                peer: h.peer_id.clone()
            }
        );
        h.engine.on_timeout(timeout).await;
        assert_eq!(
            h.engine.table.get(&h.peer_id).unwrap().state,
            MemberState::Faulty
        );
        assert_eq!(h.engine.table.visible_len(), 0);

        // Retention ends with eviction
        let timeout = h.engine.detector.next_timeout().await.unwrap();
        h.engine.on_timeout(timeout).await;
        assert!(h.engine.table.get(&h.peer_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refutation_cancels_suspicion_timer() {
        let mut h = Harness::new();
        let me = h.me();
        h.deliver(MessageKind::Gossip, 0, Vec::new()).await;
        h.engine.apply(vec![Update::suspect(h.peer_id.clone(), me, 0)]);
        assert!(h.engine.detector.is_suspecting(&h.peer_id));

        let refutation = Update::alive(h.peer_id.clone(), h.peer_id.clone(), 1);
        h.deliver(MessageKind::Gossip, 1, vec![refutation]).await;

        assert!(!h.engine.detector.is_suspecting(&h.peer_id));
        assert_eq!(
            h.engine.table.get(&h.peer_id).unwrap().state,
            MemberState::Alive
        );
        h.emitted();

        // Nothing fires once the original suspicion deadline has passed
        let suspect_timeout = h.engine.config.suspect_timeout;
        tokio::time::advance(suspect_timeout * 2).await;
        let fired = tokio::time::timeout(
            Duration::from_millis(10),
            h.engine.detector.next_timeout(),
        )
        .await;
        assert!(!matches!(fired, Ok(Some(Timeout::Suspicion { .. }))));
        if let Ok(Some(timeout)) = fired {
            h.engine.on_timeout(timeout).await;
        }

        let member = h.engine.table.get(&h.peer_id).unwrap();
        assert_eq!(member.state, MemberState::Alive);
        assert_eq!(member.incarnation, 1);
        assert_eq!(h.engine.table.visible_len(), 1);
        assert!(h.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_join_ack_is_split_to_fit_message_size() {
        let config = SwimConfig {
            max_message_size: 200,
            ..SwimConfig::local()
        };
        let mut h = Harness::with_config(config);
        let me = h.me();
        let others: Vec<Update> = (1..=12)
            .map(|port| Update::alive(PeerId::new("127.0.0.1", port), me.clone(), 0))
            .collect();
        h.engine.apply(others);

        h.deliver(MessageKind::Join, 0, Vec::new()).await;
        let replies = h.drain().await;

        assert!(replies.len() > 1, "expected several JoinAcks, got {}", replies.len());
        for (size, reply) in &replies {
            assert!(*size <= 200, "JoinAck of {} bytes", size);
            assert_eq!(
                reply.kind,
                MessageKind::JoinAck {
                    joiner: h.peer_id.clone()
                }
            );
        }
        assert_eq!(replies[0].1.updates[0], Update::alive(me.clone(), me, 0));

        let carried: HashSet<PeerId> = replies
            .iter()
            .flat_map(|(_, reply)| reply.updates.iter().map(|u| u.node.clone()))
            .collect();
        for port in 1..=12 {
            assert!(carried.contains(&PeerId::new("127.0.0.1", port)), "port {} missing", port);
        }
    }

    #[tokio::test]
    async fn test_small_table_fits_one_join_ack() {
        let mut h = Harness::new();
        h.deliver(MessageKind::Join, 0, Vec::new()).await;

        let replies = h.drain().await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1.updates[0], Update::alive(h.me(), h.me(), 0));
    }

    #[tokio::test]
    async fn test_ping_event_names_target() {
        let mut h = Harness::new();
        h.deliver(MessageKind::Gossip, 0, Vec::new()).await;
        h.emitted();

        h.engine.probe().await;
        assert!(matches!(h.reply().await.kind, MessageKind::Ping { .. }));
        assert_eq!(
            h.emitted(),
            vec![NodeEvent::Ping {
                target: h.peer_id.clone()
            }]
        );

        // Answering a peer's ping raises nothing
        h.deliver(MessageKind::Ping { seq: 9 }, 0, Vec::new()).await;
        assert_eq!(h.reply().await.kind, MessageKind::Ack { seq: 9 });
        assert!(h.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_loop_stops_when_transport_closes() {
        let h = Harness::new();
        let me = h.me();
        let Harness {
            engine,
            network,
            _commands,
            ..
        } = h;

        assert!(network.disconnect(&me));
        tokio::time::timeout(Duration::from_secs(5), engine.run())
            .await
            .expect("protocol loop kept running on a closed transport");
    }

    #[tokio::test]
    async fn test_host_discovered_from_destination() {
        let network = MemoryNetwork::new();
        let transport = network.bind(0).unwrap();
        let port = transport.local_addr().unwrap().port();
        let peer = network.bind(0).unwrap();
        let (_tx, rx) = mpsc::channel(8);
        let mut engine = Engine::new(
            SwimConfig::local(),
            LocalMember::new(None, port),
            Arc::new(transport),
            Arc::new(PostcardCodec::default()),
            Observers::new(Vec::new()),
            rx,
        );

        let message = Message {
            kind: MessageKind::Join,
            sender: Sender {
                host: None,
                port: peer.local_addr().unwrap().port(),
            },
            destination: PeerId::new("127.0.0.1", port),
            incarnation: 0,
            updates: Vec::new(),
        };
        let bytes = PostcardCodec::default().encode(&message).unwrap();
        engine.on_datagram(&bytes, peer.local_addr().unwrap()).await;

        assert_eq!(engine.local.host.as_deref(), Some("127.0.0.1"));
    }
}
