use ahash::HashMap;
use parking_lot::RwLock;

use crate::runtime::QueueHandle;

/// Assigns stable, gap-free indices to queue handles in first-seen order.
#[derive(Default)]
pub struct QueueRegistry {
    index: RwLock<HashMap<QueueHandle, usize>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_queue(&self, queue: QueueHandle) {
        let mut index = self.index.write();
        if index.contains_key(&queue) {
            tracing::warn!("queue {queue:#x} added to map more than once");
            return;
        }

        let next = index.len();
        index.insert(queue, next);
        tracing::debug!("registered queue {queue:#x} as index {next}");
    }

    pub fn queue_index(&self, queue: QueueHandle) -> Option<usize> {
        self.index.read().get(&queue).copied()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_seen_order() {
        let registry = QueueRegistry::new();
        registry.add_queue(QueueHandle(0x30));
        registry.add_queue(QueueHandle(0x10));
        registry.add_queue(QueueHandle(0x20));

        assert_eq!(registry.queue_index(QueueHandle(0x30)), Some(0));
        assert_eq!(registry.queue_index(QueueHandle(0x10)), Some(1));
        assert_eq!(registry.queue_index(QueueHandle(0x20)), Some(2));
        assert_eq!(registry.queue_index(QueueHandle(0x40)), None);
    }

    #[test]
    fn duplicate_is_ignored() {
        let registry = QueueRegistry::new();
        registry.add_queue(QueueHandle(1));
        registry.add_queue(QueueHandle(1));
        registry.add_queue(QueueHandle(2));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.queue_index(QueueHandle(1)), Some(0));
        assert_eq!(registry.queue_index(QueueHandle(2)), Some(1));
    }

    proptest! {
        #[test]
        fn indices_follow_first_appearance(handles in proptest::collection::vec(0u64..16, 0..64)) {
            let registry = QueueRegistry::new();
            let mut seen: Vec<u64> = Vec::new();
            for h in &handles {
                registry.add_queue(QueueHandle(*h));
                if !seen.contains(h) {
                    seen.push(*h);
                }
            }

            prop_assert_eq!(registry.len(), seen.len());
            for (expected, h) in seen.iter().enumerate() {
                prop_assert_eq!(registry.queue_index(QueueHandle(*h)), Some(expected));
            }
        }
    }
}
