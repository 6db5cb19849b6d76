//! Member table: the local view of every known remote peer

use crate::member::{Member, PeerId};
use std::collections::HashMap;

/// Best-known record per remote peer, in first-seen order.
///
/// The local node is never stored here. Faulty records stay until evicted so
/// they keep winning against stale gossip, but they are hidden from the
/// visible membership list.
#[derive(Debug, Default)]
pub struct MemberTable {
    entries: HashMap<PeerId, Member>,
    order: Vec<PeerId>,
}

impl MemberTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Member> {
        self.entries.get(peer)
    }

    /// Insert or replace the record for `member.node`, returning the previous one.
    /// Replacing keeps the original first-seen position and last contact.
    pub fn upsert(&mut self, mut member: Member) -> Option<Member> {
        match self.entries.get_mut(&member.node) {
            Some(existing) => {
                if member.last_contact.is_none() {
                    member.last_contact = existing.last_contact;
                }
                Some(std::mem::replace(existing, member))
            }
            None => {
                self.order.push(member.node.clone());
                self.entries.insert(member.node.clone(), member);
                None
            }
        }
    }

    /// Drop a record entirely
    pub fn evict(&mut self, peer: &PeerId) -> Option<Member> {
        let removed = self.entries.remove(peer)?;
        self.order.retain(|p| p != peer);
        Some(removed)
    }

    /// Record direct contact with `peer`
    pub fn touch(&mut self, peer: &PeerId) {
        if let Some(member) = self.entries.get_mut(peer) {
            member.touch();
        }
    }

    /// All records, including retained faulty ones, in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.order.iter().filter_map(|p| self.entries.get(p))
    }

    /// Records that belong to the visible membership list
    pub fn visible(&self) -> impl Iterator<Item = &Member> {
        self.iter().filter(|m| m.is_member())
    }

    /// Cloned visible records
    pub fn snapshot(&self) -> Vec<Member> {
        self.visible().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn visible_len(&self) -> usize {
        self.visible().count()
    }
}
