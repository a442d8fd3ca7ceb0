//! Snapshot cache
//!
//! Holds the most recently completed aggregation behind a single atomically
//! swapped reference. The scheduler is the only writer; the HTTP handlers are
//! the readers. A reader always sees either the previous complete snapshot or
//! the new complete one, never a mix: `update` swaps one pointer, and the old
//! snapshot stays alive (and consistent) until its last reader drops it.
//!
//! `get` never blocks on a writer and `update` never waits for readers, so a
//! slow response being serialized cannot stall a refresh and vice versa.

use arc_swap::ArcSwapOption;
use std::sync::Arc;

use crate::types::Snapshot;

#[derive(Default)]
pub struct SnapshotCache {
    current: ArcSwapOption<Snapshot>,
}

impl SnapshotCache {
    /// Create an empty cache; `get` returns `None` until the first `update`
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    /// Atomically publish a finished snapshot, superseding the previous one
    pub fn update(&self, snapshot: Snapshot) {
        self.current.store(Some(Arc::new(snapshot)));
    }

    /// Borrow the currently published snapshot, if any
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }
}
