//! Bounded ring of recently reported exception identities.
//!
//! Each tracked thread owns one ring. Membership answers "was this exact
//! exception object already reported on this thread", which keeps an object
//! that is rethrown or unwinds through many frames from being reported more
//! than once. Comparison is object identity, never message or type equality.

use crate::event::ExceptionRef;

/// Default per-thread window: the last five reported occurrences.
pub const DEFAULT_DEDUP_CAPACITY: usize = 5;

/// Fixed-capacity ring of exception identities.
///
/// `contains` reflects exactly the most recent `capacity` pushes; pushing at
/// capacity silently evicts the oldest entry. The capacity is fixed at
/// construction and never grows.
#[derive(Debug)]
pub struct DedupRing {
    slots: Vec<ExceptionRef>,
    capacity: usize,
    /// Next slot to overwrite once the ring is full.
    head: usize,
}

impl DedupRing {
    /// Create a ring remembering up to `capacity` identities.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a ring that can remember nothing cannot
    /// honor its membership contract.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "dedup ring capacity must be greater than zero");
        DedupRing {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    /// Record `exception` as reported, evicting the oldest identity if the
    /// ring is full.
    pub fn push(&mut self, exception: ExceptionRef) {
        if self.slots.len() < self.capacity {
            self.slots.push(exception);
        } else {
            self.slots[self.head] = exception;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Whether this exact exception object is inside the current window.
    pub fn contains(&self, exception: ExceptionRef) -> bool {
        self.slots.iter().any(|&seen| seen == exception)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exc(raw: u64) -> ExceptionRef {
        ExceptionRef::new(raw)
    }

    #[test]
    fn test_empty_ring_contains_nothing() {
        let ring = DedupRing::new(3);
        assert!(!ring.contains(exc(1)));
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 3);
    }

    #[test]
    fn test_push_then_contains() {
        let mut ring = DedupRing::new(3);
        ring.push(exc(1));
        assert!(ring.contains(exc(1)));
        assert!(!ring.contains(exc(2)));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_oldest_is_evicted_at_capacity() {
        let mut ring = DedupRing::new(3);
        ring.push(exc(1));
        ring.push(exc(2));
        ring.push(exc(3));
        ring.push(exc(4));
        assert!(!ring.contains(exc(1)));
        assert!(ring.contains(exc(2)));
        assert!(ring.contains(exc(3)));
        assert!(ring.contains(exc(4)));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_eviction_keeps_going_in_order() {
        let mut ring = DedupRing::new(2);
        for raw in 1..=5 {
            ring.push(exc(raw));
        }
        assert!(!ring.contains(exc(3)));
        assert!(ring.contains(exc(4)));
        assert!(ring.contains(exc(5)));
    }

    #[test]
    fn test_capacity_one_remembers_only_the_last() {
        let mut ring = DedupRing::new(1);
        ring.push(exc(1));
        assert!(ring.contains(exc(1)));
        ring.push(exc(2));
        assert!(!ring.contains(exc(1)));
        assert!(ring.contains(exc(2)));
    }

    #[test]
    fn test_identity_comparison_only() {
        // Same raw handle is the same object; nothing else matters.
        let mut ring = DedupRing::new(2);
        ring.push(exc(0xdead));
        assert!(ring.contains(ExceptionRef::new(0xdead)));
        assert!(!ring.contains(ExceptionRef::new(0xbeef)));
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than zero")]
    fn test_zero_capacity_panics() {
        let _ = DedupRing::new(0);
    }

    #[test]
    fn test_default_capacity_window() {
        let mut ring = DedupRing::new(DEFAULT_DEDUP_CAPACITY);
        for raw in 0..DEFAULT_DEDUP_CAPACITY as u64 {
            ring.push(exc(raw));
        }
        ring.push(exc(99));
        assert!(!ring.contains(exc(0)));
        assert!(ring.contains(exc(1)));
        assert!(ring.contains(exc(99)));
    }
}
