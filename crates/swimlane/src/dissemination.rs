//! Dissemination policy: which updates ride on each outgoing message
//!
//! Every outgoing protocol message takes exactly one batch from the update
//! store. Nothing is reordered beyond the store's FIFO order and nothing is
//! resubmitted when a send fails, so the oldest facts always leave first.

use crate::observability::SwimMetrics;
use crate::update::{Update, UpdateStore};

#[derive(Debug)]
pub struct Dissemination {
    store: UpdateStore,
}

impl Dissemination {
    pub fn new(updates_max_size: usize) -> Self {
        Self {
            store: UpdateStore::new(updates_max_size),
        }
    }

    /// Queue a newly accepted fact for gossip
    pub fn learn(&mut self, update: Update) {
        SwimMetrics::increment_updates_learned();
        self.store.push(update);
    }

    /// Take the batch for one outgoing message.
    ///
    /// `accusation` is the recipient's own record when we hold it as suspect or
    /// faulty; it rides in front of the batch so the recipient can refute.
    pub fn batch_for(&mut self, accusation: Option<Update>) -> Vec<Update> {
        let batch = self.store.get_updates();
        SwimMetrics::increment_updates_disseminated(batch.len());

        match accusation {
            Some(accusation) => {
                let mut updates = Vec::with_capacity(batch.len() + 1);
                updates.push(accusation);
                updates.extend(batch);
                updates
            }
            None => batch,
        }
    }

    pub fn pending(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::PeerId;

    fn peer(port: u16) -> PeerId {
        PeerId::new("127.0.0.1", port)
    }

    #[test]
    fn test_one_batch_per_message() {
        let mut dissemination = Dissemination::new(2);
        for port in 1..=5 {
            dissemination.learn(Update::alive(peer(port), peer(0), 0));
        }
        assert_eq!(dissemination.pending(), 5);

        let first = dissemination.batch_for(None);
        let second = dissemination.batch_for(None);
        let third = dissemination.batch_for(None);
        let fourth = dissemination.batch_for(None);

        let ports = |b: &[Update]| b.iter().map(|u| u.node.port).collect::<Vec<_>>();
        assert_eq!(ports(&first), vec![1, 2]);
        assert_eq!(ports(&second), vec![3, 4]);
        assert_eq!(ports(&third), vec![5]);
        assert!(fourth.is_empty());
        assert_eq!(dissemination.pending(), 0);
    }

    #[test]
    fn test_accusation_rides_first_and_is_not_dequeued() {
        let mut dissemination = Dissemination::new(10);
        dissemination.learn(Update::alive(peer(1), peer(0), 0));

        let accusation = Update::suspect(peer(9), peer(0), 2);
        let batch = dissemination.batch_for(Some(accusation.clone()));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], accusation);
        assert_eq!(dissemination.pending(), 0);

        // Accusations are attached even with an empty queue
        let batch = dissemination.batch_for(Some(accusation.clone()));
        assert_eq!(batch, vec![accusation]);
    }
}
