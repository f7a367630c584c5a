//! Thread-keyed registry, the root container tying a live thread of the
//! monitored runtime to its per-thread monitoring state.
//!
//! Entries appear lazily on the first event a thread produces and disappear
//! when the thread terminates. The map does no locking of its own: all agent
//! state sits behind one process-wide mutex and the map is only reached
//! through it.

use fnv::FnvHashMap;

use crate::event::ThreadId;

/// Associative store keyed by [`ThreadId`].
///
/// FNV keeps lookups cheap for the small integer keys the runtime hands out.
#[derive(Debug)]
pub struct ThreadMap<V> {
    entries: FnvHashMap<ThreadId, V>,
}

impl<V> ThreadMap<V> {
    pub fn new() -> Self {
        ThreadMap {
            entries: FnvHashMap::default(),
        }
    }

    pub fn get(&self, tid: ThreadId) -> Option<&V> {
        self.entries.get(&tid)
    }

    pub fn get_mut(&mut self, tid: ThreadId) -> Option<&mut V> {
        self.entries.get_mut(&tid)
    }

    /// Insert a value for `tid`, handing back whatever it displaced so the
    /// caller can decide what the displaced state means.
    pub fn insert(&mut self, tid: ThreadId, value: V) -> Option<V> {
        self.entries.insert(tid, value)
    }

    /// Fetch the entry for `tid`, creating it with `make` on first use.
    pub fn get_or_insert_with(&mut self, tid: ThreadId, make: impl FnOnce() -> V) -> &mut V {
        self.entries.entry(tid).or_insert_with(make)
    }

    pub fn remove(&mut self, tid: ThreadId) -> Option<V> {
        self.entries.remove(&tid)
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.entries.contains_key(&tid)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<V> Default for ThreadMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
