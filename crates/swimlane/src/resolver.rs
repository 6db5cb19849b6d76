//! Incarnation-based conflict resolution
//!
//! Applies batches of updates to the member table. A fact about a peer replaces
//! the stored record only when it has strictly higher precedence, where
//! precedence is `(incarnation, Alive < Suspect < Faulty)`. The single exception
//! is a re-assertion of suspicion at the same incarnation by a different peer,
//! which replaces the record so the newer accuser is remembered.
//!
//! Because acceptance depends only on the stored record and the incoming
//! update, every node that has seen the same set of facts converges on the
//! same `(state, incarnation)` for each peer, regardless of arrival order or
//! duplication.
//!
//! Facts about ourselves never enter the table. A suspicion or failure claim
//! about the local node is refuted by raising our own incarnation and
//! gossiping a fresh ALIVE fact.

use crate::dissemination::Dissemination;
use crate::member::{LocalMember, Member, MemberState, PeerId};
use crate::members::MemberTable;
use crate::update::Update;
use tracing::{debug, info, trace};

/// What happened when an update was accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A previously unknown peer entered the table
    Discovered {
        peer: PeerId,
        state: MemberState,
        incarnation: u64,
    },
    /// A known peer's record was replaced
    Changed {
        peer: PeerId,
        from: MemberState,
        to: MemberState,
        from_incarnation: u64,
        incarnation: u64,
    },
    /// A claim about the local node was refuted
    Refuted { incarnation: u64 },
}

impl Outcome {
    /// Peer entered the visible membership list
    pub fn is_peer_up(&self) -> bool {
        match self {
            Outcome::Discovered { state, .. } => state.is_member(),
            Outcome::Changed { from, to, .. } => !from.is_member() && to.is_member(),
            Outcome::Refuted { .. } => false,
        }
    }

    /// Peer left the visible membership list
    pub fn is_peer_down(&self) -> bool {
        match self {
            Outcome::Changed { from, to, .. } => from.is_member() && !to.is_member(),
            _ => false,
        }
    }
}

/// Whether `update` should replace the stored record
pub fn supersedes(existing: &Member, update: &Update) -> bool {
    let resuspicion = existing.state == MemberState::Suspect
        && update.state == MemberState::Suspect
        && update.incarnation == existing.incarnation;
    if resuspicion {
        return update.set_by != existing.set_by;
    }

    update.precedence() > (existing.incarnation, existing.state.rank())
}

/// Applies updates against the member table, queueing accepted facts for
/// further dissemination.
pub struct UpdateProcessor<'a> {
    local: &'a mut LocalMember,
    table: &'a mut MemberTable,
    dissemination: &'a mut Dissemination,
}

impl<'a> UpdateProcessor<'a> {
    pub fn new(
        local: &'a mut LocalMember,
        table: &'a mut MemberTable,
        dissemination: &'a mut Dissemination,
    ) -> Self {
        Self {
            local,
            table,
            dissemination,
        }
    }

    /// Apply a batch in order, returning the accepted changes
    pub fn process_updates<I>(&mut self, updates: I) -> Vec<Outcome>
    where
        I: IntoIterator<Item = Update>,
    {
        updates
            .into_iter()
            .filter_map(|update| self.process(update))
            .collect()
    }

    /// Apply a single update
    pub fn process(&mut self, update: Update) -> Option<Outcome> {
        if self.local.is(&update.node) {
            return self.process_self(update);
        }

        match self.table.get(&update.node) {
            None => {
                debug!(
                    peer = %update.node,
                    state = %update.state,
                    incarnation = update.incarnation,
                    set_by = %update.set_by,
                    "Discovered new member"
                );
                let outcome = Outcome::Discovered {
                    peer: update.node.clone(),
                    state: update.state,
                    incarnation: update.incarnation,
                };
                self.table.upsert(member_from(&update));
                self.dissemination.learn(update);
                Some(outcome)
            }
            Some(existing) if supersedes(existing, &update) => {
                let outcome = Outcome::Changed {
                    peer: update.node.clone(),
                    from: existing.state,
                    to: update.state,
                    from_incarnation: existing.incarnation,
                    incarnation: update.incarnation,
                };
                debug!(
                    peer = %update.node,
                    from = %existing.state,
                    to = %update.state,
                    incarnation = update.incarnation,
                    set_by = %update.set_by,
                    "Member record updated"
                );
                self.table.upsert(member_from(&update));
                self.dissemination.learn(update);
                Some(outcome)
            }
            Some(existing) => {
                trace!(
                    peer = %update.node,
                    state = %update.state,
                    incarnation = update.incarnation,
                    known_state = %existing.state,
                    known_incarnation = existing.incarnation,
                    "Ignoring stale update"
                );
                None
            }
        }
    }

    fn process_self(&mut self, update: Update) -> Option<Outcome> {
        if update.state == MemberState::Alive {
            return None;
        }
        let me = self.local.peer_id()?;

        let incarnation = self.local.incarnation.max(update.incarnation) + 1;
        self.local.incarnation = incarnation;
        info!(
            claim = %update.state,
            claimed_by = %update.set_by,
            incarnation,
            "Refuting claim about local node"
        );
        self.dissemination
            .learn(Update::alive(me.clone(), me, incarnation));

        Some(Outcome::Refuted { incarnation })
    }
}

fn member_from(update: &Update) -> Member {
    Member {
        node: update.node.clone(),
        state: update.state,
        incarnation: update.incarnation,
        set_by: update.set_by.clone(),
        last_contact: None,
    }
}
