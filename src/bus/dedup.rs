use std::collections::{HashSet, VecDeque};

/// Bounded memory of recently seen message ids.
///
/// Insertion order is kept so the oldest id is evicted first once the
/// window is full.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `id`. Returns `false` if it was already in the window.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_repeated_ids() {
        let mut window = DedupWindow::new(4);
        assert!(window.insert("a"));
        assert!(!window.insert("a"));
        assert!(window.insert("b"));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut window = DedupWindow::new(3);
        for id in ["a", "b", "c", "d"] {
            assert!(window.insert(id));
        }
        assert_eq!(window.len(), 3);
        assert!(!window.contains("a"));
        assert!(window.contains("d"));
        // An evicted id is accepted again.
        assert!(window.insert("a"));
        assert!(!window.contains("b"));
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut window = DedupWindow::new(16);
        for n in 0..1000 {
            window.insert(&format!("id-{n}"));
            assert!(window.len() <= 16);
        }
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut window = DedupWindow::new(0);
        assert!(window.insert("a"));
        assert!(!window.insert("a"));
        assert_eq!(window.len(), 1);
    }
}
