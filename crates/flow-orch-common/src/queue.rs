//! Per-key ordered mailbox.

use std::collections::{BTreeMap, VecDeque};

#[derive(Debug)]
struct KeySlot<T> {
    busy: bool,
    pending: VecDeque<T>,
}

impl<T> Default for KeySlot<T> {
    fn default() -> Self {
        Self {
            busy: false,
            pending: VecDeque::new(),
        }
    }
}

/// Queue of work items grouped by key.
///
/// Items for one key come out in the order they were pushed, and a key
/// handed out by [`next_ready`](Self::next_ready) stays busy until
/// [`release`](Self::release) is called. Keys never block each other.
///
/// Entries are created by `push` only; lookups never create a slot.
#[derive(Debug)]
pub struct KeyedQueue<T> {
    slots: BTreeMap<String, KeySlot<T>>,
    pending_count: usize,
}

impl<T> Default for KeyedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> KeyedQueue<T> {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            pending_count: 0,
        }
    }

    /// Appends an item behind any pending items for the same key.
    pub fn push(&mut self, key: impl Into<String>, item: T) {
        self.slots.entry(key.into()).or_default().pending.push_back(item);
        self.pending_count += 1;
    }

    /// Takes the next item for an idle key and marks the key busy.
    ///
    /// Returns `None` if the key is busy or has nothing pending.
    pub fn next_ready(&mut self, key: &str) -> Option<T> {
        let slot = self.slots.get_mut(key)?;
        if slot.busy {
            return None;
        }
        let item = slot.pending.pop_front()?;
        slot.busy = true;
        self.pending_count -= 1;
        Some(item)
    }

    /// Marks the key idle again.
    pub fn release(&mut self, key: &str) {
        let drop_slot = match self.slots.get_mut(key) {
            Some(slot) => {
                slot.busy = false;
                slot.pending.is_empty()
            }
            None => {
                log::warn!("KeyedQueue: release of unknown key {}", key);
                false
            }
        };
        if drop_slot {
            self.slots.remove(key);
        }
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.busy)
    }

    /// Total number of waiting items across keys.
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_per_key_order() {
        let mut queue = KeyedQueue::new();
        queue.push("f1", 1);
        queue.push("f1", 2);
        queue.push("f1", 3);

        let mut seen = Vec::new();
        while let Some(item) = queue.next_ready("f1") {
            seen.push(item);
            queue.release("f1");
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_busy_key_holds_items() {
        let mut queue = KeyedQueue::new();
        queue.push("f1", "a");
        queue.push("f1", "b");

        assert_eq!(queue.next_ready("f1"), Some("a"));
        assert!(queue.is_busy("f1"));
        assert_eq!(queue.next_ready("f1"), None);
        assert_eq!(queue.pending_count(), 1);

        queue.release("f1");
        assert_eq!(queue.next_ready("f1"), Some("b"));
    }

    #[test]
    fn test_keys_independent() {
        let mut queue = KeyedQueue::new();
        queue.push("f1", 1);
        queue.push("f2", 2);
        assert_eq!(queue.next_ready("f1"), Some(1));
        assert_eq!(queue.next_ready("f2"), Some(2));
        assert!(queue.is_busy("f1"));
        assert!(queue.is_busy("f2"));
    }

    #[test]
    fn test_lookup_does_not_create() {
        let mut queue: KeyedQueue<u32> = KeyedQueue::new();
        assert_eq!(queue.next_ready("missing"), None);
        assert!(!queue.is_busy("missing"));
        assert!(queue.slots.is_empty());
    }

    #[test]
    fn test_release_drops_idle_slot() {
        let mut queue = KeyedQueue::new();
        queue.push("f1", 1);
        assert_eq!(queue.next_ready("f1"), Some(1));
        queue.release("f1");
        assert!(queue.slots.is_empty());

        // Unknown keys are tolerated.
        queue.release("f2");
        assert_eq!(queue.pending_count(), 0);
    }
}
