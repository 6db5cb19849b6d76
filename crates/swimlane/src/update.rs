//! Membership updates and the queue they wait in before being gossiped

use crate::member::{Member, MemberState, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// An immutable fact about a member's state at some incarnation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub node: PeerId,
    pub set_by: PeerId,
    pub state: MemberState,
    pub incarnation: u64,
}

impl Update {
    pub fn new(node: PeerId, set_by: PeerId, state: MemberState, incarnation: u64) -> Self {
        Self {
            node,
            set_by,
            state,
            incarnation,
        }
    }

    pub fn alive(node: PeerId, set_by: PeerId, incarnation: u64) -> Self {
        Self::new(node, set_by, MemberState::Alive, incarnation)
    }

    pub fn suspect(node: PeerId, set_by: PeerId, incarnation: u64) -> Self {
        Self::new(node, set_by, MemberState::Suspect, incarnation)
    }

    pub fn faulty(node: PeerId, set_by: PeerId, incarnation: u64) -> Self {
        Self::new(node, set_by, MemberState::Faulty, incarnation)
    }

    /// Precedence key: higher incarnation first, then state rank
    pub fn precedence(&self) -> (u64, u8) {
        (self.incarnation, self.state.rank())
    }
}

impl From<&Member> for Update {
    fn from(member: &Member) -> Self {
        Self {
            node: member.node.clone(),
            set_by: member.set_by.clone(),
            state: member.state,
            incarnation: member.incarnation,
        }
    }
}

/// FIFO of updates awaiting dissemination.
///
/// Enqueue never deduplicates; `get_updates` hands out the oldest entries in
/// batches of at most `updates_max_size`.
#[derive(Debug)]
pub struct UpdateStore {
    queue: VecDeque<Update>,
    updates_max_size: usize,
}

impl UpdateStore {
    pub fn new(updates_max_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            updates_max_size: updates_max_size.max(1),
        }
    }

    pub fn add_update(&mut self, node: PeerId, set_by: PeerId, state: MemberState, incarnation: u64) {
        self.push(Update::new(node, set_by, state, incarnation));
    }

    pub fn add_alive_update(&mut self, node: PeerId, set_by: PeerId, incarnation: u64) {
        self.push(Update::alive(node, set_by, incarnation));
    }

    pub fn add_suspect_update(&mut self, node: PeerId, set_by: PeerId, incarnation: u64) {
        self.push(Update::suspect(node, set_by, incarnation));
    }

    pub fn add_faulty_update(&mut self, node: PeerId, set_by: PeerId, incarnation: u64) {
        self.push(Update::faulty(node, set_by, incarnation));
    }

    pub fn push(&mut self, update: Update) {
        self.queue.push_back(update);
    }

    /// Remove and return the next batch, oldest first
    pub fn get_updates(&mut self) -> Vec<Update> {
        let take = self.queue.len().min(self.updates_max_size);
        self.queue.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host1() -> PeerId {
        PeerId::new("host1", 1234)
    }

    fn host2() -> PeerId {
        PeerId::new("host2", 5678)
    }

    #[test]
    fn test_single_update_then_drained() {
        let mut store = UpdateStore::new(10);
        store.add_update(host1(), host2(), MemberState::Alive, 0);

        assert_eq!(store.get_updates(), vec![Update::alive(host1(), host2(), 0)]);
        assert!(store.get_updates().is_empty());
    }

    #[test]
    fn test_typed_constructors() {
        let mut store = UpdateStore::new(10);
        store.add_alive_update(host1(), host2(), 1);
        store.add_suspect_update(host1(), host2(), 2);
        store.add_faulty_update(host1(), host2(), 3);

        let states: Vec<_> = store.get_updates().into_iter().map(|u| u.state).collect();
        assert_eq!(
            states,
            vec![MemberState::Alive, MemberState::Suspect, MemberState::Faulty]
        );
    }

    #[test]
    fn test_no_deduplication_within_limit() {
        let mut store = UpdateStore::new(10);
        store.add_suspect_update(host1(), host2(), 0);
        store.add_faulty_update(host1(), host2(), 0);
        store.add_alive_update(host1(), host2(), 0);
        store.add_alive_update(host1(), host2(), 0);

        let expected = vec![
            Update::suspect(host1(), host2(), 0),
            Update::faulty(host1(), host2(), 0),
            Update::alive(host1(), host2(), 0),
            Update::alive(host1(), host2(), 0),
        ];
        assert_eq!(store.get_updates(), expected);
        assert!(store.get_updates().is_empty());
    }

    #[test]
    fn test_batches_over_limit() {
        let mut store = UpdateStore::new(3);
        store.add_suspect_update(host1(), host2(), 0);
        store.add_faulty_update(host1(), host2(), 0);
        store.add_alive_update(host1(), host2(), 0);
        store.add_alive_update(host1(), host2(), 1);

        assert_eq!(
            store.get_updates(),
            vec![
                Update::suspect(host1(), host2(), 0),
                Update::faulty(host1(), host2(), 0),
                Update::alive(host1(), host2(), 0),
            ]
        );
        assert_eq!(store.get_updates(), vec![Update::alive(host1(), host2(), 1)]);
        assert!(store.get_updates().is_empty());
        assert!(store.get_updates().is_empty());
    }

    #[test]
    fn test_batch_sizes_follow_min_of_limit_and_remaining() {
        for limit in 1..6 {
            for total in 0..20u64 {
                let mut store = UpdateStore::new(limit);
                for inc in 0..total {
                    store.add_alive_update(host1(), host2(), inc);
                }

                let mut seen = Vec::new();
                let mut remaining = total as usize;
                loop {
                    let batch = store.get_updates();
                    assert_eq!(batch.len(), limit.min(remaining));
                    if batch.is_empty() {
                        break;
                    }
                    remaining -= batch.len();
                    seen.extend(batch.into_iter().map(|u| u.incarnation));
                }
                assert_eq!(seen, (0..total).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let mut store = UpdateStore::new(0);
        store.add_alive_update(host1(), host2(), 0);
        store.add_alive_update(host1(), host2(), 1);
        assert_eq!(store.get_updates().len(), 1);
        assert_eq!(store.get_updates().len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_precedence_order() {
        let alive = Update::alive(host1(), host2(), 3);
        let suspect = Update::suspect(host1(), host2(), 3);
        let newer = Update::alive(host1(), host2(), 4);

        assert!(suspect.precedence() > alive.precedence());
        assert!(newer.precedence() > suspect.precedence());
    }
}
