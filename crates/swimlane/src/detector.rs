//! Failure detector: probe target selection and protocol timers
//!
//! All timers live in one `DelayQueue` owned by the detector and polled by the
//! engine loop. Each timer kind also has a bookkeeping map keyed by sequence
//! number or peer, and a timer only produces a [`Timeout`] while its map entry
//! still exists. Cancelling removes both, so a cancelled timer never fires.

use crate::config::SwimConfig;
use crate::member::PeerId;
use crate::members::MemberTable;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::future::poll_fn;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio_util::time::delay_queue::{DelayQueue, Key};
use tracing::trace;

/// Timer entries stored in the delay queue
#[derive(Debug, Clone, PartialEq, Eq)]
enum Timer {
    Ack { seq: u64 },
    Indirect { seq: u64 },
    Suspicion { peer: PeerId },
    Eviction { peer: PeerId },
    Relay { seq: u64 },
}

/// An expired timer whose bookkeeping was still live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timeout {
    /// No direct ack within `ping_timeout`
    Ack { seq: u64, target: PeerId },
    /// No ack through helpers either
    Indirect { seq: u64, target: PeerId },
    /// A suspect failed to refute in time
    Suspicion { peer: PeerId },
    /// A faulty record reached the end of its retention
    Eviction { peer: PeerId },
    /// A probe we ran for another node went unanswered
    Relay { seq: u64, relay: Relay },
}

/// A probe we run on behalf of a `PingReq` sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
    pub requester: PeerId,
    pub requester_seq: u64,
    pub target: PeerId,
}

#[derive(Debug)]
struct Probe {
    target: PeerId,
    key: Key,
}

#[derive(Debug)]
struct PendingRelay {
    relay: Relay,
    key: Key,
}

#[derive(Debug)]
pub struct FailureDetector {
    timers: DelayQueue<Timer>,
    probes: HashMap<u64, Probe>,
    suspicions: HashMap<PeerId, Key>,
    evictions: HashMap<PeerId, Key>,
    relays: HashMap<u64, PendingRelay>,
    next_seq: u64,

    /// Shuffled probe order, walked round-robin
    probe_list: Vec<PeerId>,
    probe_index: usize,

    ping_timeout: Duration,
    suspect_timeout: Duration,
    faulty_retention: Duration,
}

impl FailureDetector {
    pub fn new(config: &SwimConfig) -> Self {
        Self {
            timers: DelayQueue::new(),
            probes: HashMap::new(),
            suspicions: HashMap::new(),
            evictions: HashMap::new(),
            relays: HashMap::new(),
            next_seq: 0,
            probe_list: Vec::new(),
            probe_index: 0,
            ping_timeout: config.ping_timeout,
            suspect_timeout: config.suspect_timeout,
            faulty_retention: config.faulty_retention(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq = self.next_seq.wrapping_add(1);
        self.next_seq
    }

    // ==================== Probe Selection ====================

    /// Next peer to probe: round-robin over a shuffled list of visible peers,
    /// skipping peers with a probe already in flight. The list is rebuilt and
    /// reshuffled each time the cursor wraps.
    pub fn select_target(&mut self, table: &MemberTable) -> Option<PeerId> {
        for _ in 0..2 {
            while self.probe_index < self.probe_list.len() {
                let candidate = &self.probe_list[self.probe_index];
                self.probe_index += 1;

                let visible = table.get(candidate).is_some_and(|m| m.is_member());
                if visible && !self.is_probing(candidate) {
                    return Some(candidate.clone());
                }
            }

            self.reset_probe_list(table);
            if self.probe_list.is_empty() {
                return None;
            }
        }
        None
    }

    fn reset_probe_list(&mut self, table: &MemberTable) {
        self.probe_list = table.visible().map(|m| m.node.clone()).collect();
        self.probe_list.shuffle(&mut rand::thread_rng());
        self.probe_index = 0;
        trace!(peers = self.probe_list.len(), "Reshuffled probe order");
    }

    /// Up to `count` random visible peers other than `target`
    pub fn select_helpers(&self, table: &MemberTable, target: &PeerId, count: usize) -> Vec<PeerId> {
        let candidates: Vec<&PeerId> = table
            .visible()
            .map(|m| &m.node)
            .filter(|p| *p != target)
            .collect();
        candidates
            .choose_multiple(&mut rand::thread_rng(), count)
            .map(|p| (*p).clone())
            .collect()
    }

    // ==================== Probes ====================

    /// Track a direct probe of `target`, returning its sequence number
    pub fn start_probe(&mut self, target: PeerId) -> u64 {
        let seq = self.next_seq();
        let key = self.timers.insert(Timer::Ack { seq }, self.ping_timeout);
        self.probes.insert(seq, Probe { target, key });
        seq
    }

    /// Keep waiting for `target` while helpers probe it
    pub fn start_indirect(&mut self, seq: u64, target: PeerId) {
        if let Some(previous) = self.probes.remove(&seq) {
            self.timers.remove(&previous.key);
        }
        let key = self.timers.insert(Timer::Indirect { seq }, self.ping_timeout);
        self.probes.insert(seq, Probe { target, key });
    }

    /// Complete a probe on ack, returning the probed peer
    pub fn complete_probe(&mut self, seq: u64) -> Option<PeerId> {
        let probe = self.probes.remove(&seq)?;
        self.timers.remove(&probe.key);
        Some(probe.target)
    }

    pub fn is_probing(&self, peer: &PeerId) -> bool {
        self.probes.values().any(|p| &p.target == peer)
    }

    // ==================== Relays ====================

    /// Track a probe sent for another node, returning our own sequence number
    pub fn start_relay(&mut self, relay: Relay) -> u64 {
        let seq = self.next_seq();
        let key = self.timers.insert(Timer::Relay { seq }, self.ping_timeout);
        self.relays.insert(seq, PendingRelay { relay, key });
        seq
    }

    pub fn complete_relay(&mut self, seq: u64) -> Option<Relay> {
        let pending = self.relays.remove(&seq)?;
        self.timers.remove(&pending.key);
        Some(pending.relay)
    }

    // ==================== Suspicion ====================

    /// Start (or restart) the suspicion timer for `peer`
    pub fn start_suspicion(&mut self, peer: PeerId) {
        self.cancel_suspicion(&peer);
        let key = self
            .timers
            .insert(Timer::Suspicion { peer: peer.clone() }, self.suspect_timeout);
        self.suspicions.insert(peer, key);
    }

    pub fn cancel_suspicion(&mut self, peer: &PeerId) -> bool {
        match self.suspicions.remove(peer) {
            Some(key) => {
                self.timers.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn is_suspecting(&self, peer: &PeerId) -> bool {
        self.suspicions.contains_key(peer)
    }

    // ==================== Eviction ====================

    /// Schedule removal of a faulty record
    pub fn schedule_eviction(&mut self, peer: PeerId) {
        self.cancel_eviction(&peer);
        let key = self
            .timers
            .insert(Timer::Eviction { peer: peer.clone() }, self.faulty_retention);
        self.evictions.insert(peer, key);
    }

    pub fn cancel_eviction(&mut self, peer: &PeerId) -> bool {
        match self.evictions.remove(peer) {
            Some(key) => {
                self.timers.remove(&key);
                true
            }
            None => false,
        }
    }

    // ==================== Expiry ====================

    /// Whether any timer is pending. `poll_expired` resolves to `None`
    /// immediately when this is false.
    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    #[cfg(test)]
    fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Poll for the next live timeout
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<Timeout>> {
        loop {
            let Some(expired) = ready!(self.timers.poll_expired(cx)) else {
                return Poll::Ready(None);
            };
            let key = expired.key();
            if let Some(timeout) = self.take(expired.into_inner(), key) {
                return Poll::Ready(Some(timeout));
            }
        }
    }

    /// Wait for the next live timeout
    pub async fn next_timeout(&mut self) -> Option<Timeout> {
        poll_fn(|cx| self.poll_expired(cx)).await
    }

    /// Clear the bookkeeping for an expired timer, if it is still ours
    fn take(&mut self, timer: Timer, key: Key) -> Option<Timeout> {
        match timer {
            Timer::Ack { seq } => self
                .take_probe(seq, key)
                .map(|target| Timeout::Ack { seq, target }),
            Timer::Indirect { seq } => self
                .take_probe(seq, key)
                .map(|target| Timeout::Indirect { seq, target }),
            Timer::Suspicion { peer } => {
                if self.suspicions.get(&peer) != Some(&key) {
                    return None;
                }
                self.suspicions.remove(&peer);
                Some(Timeout::Suspicion { peer })
            }
            Timer::Eviction { peer } => {
                if self.evictions.get(&peer) != Some(&key) {
                    return None;
                }
                self.evictions.remove(&peer);
                Some(Timeout::Eviction { peer })
            }
            Timer::Relay { seq } => {
                if self.relays.get(&seq).map(|r| r.key) != Some(key) {
                    return None;
                }
                let pending = self.relays.remove(&seq)?;
                Some(Timeout::Relay {
                    seq,
                    relay: pending.relay,
                })
            }
        }
    }

    fn take_probe(&mut self, seq: u64, key: Key) -> Option<PeerId> {
        if self.probes.get(&seq).map(|p| p.key) != Some(key) {
            return None;
        }
        self.probes.remove(&seq).map(|p| p.target)
    }

    /// Drop every pending timer
    pub fn clear(&mut self) {
        self.timers.clear();
        self.probes.clear();
        self.suspicions.clear();
        self.evictions.clear();
        self.relays.clear();
        self.probe_list.clear();
        self.probe_index = 0;
    }
}
