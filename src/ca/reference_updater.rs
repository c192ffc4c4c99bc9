//! Reference updater chain
//!
//! A directory in the content-addressable store is identified by an object
//! id, so every change to a directory changes its id. Each handler carries
//! a `ReferenceUpdater` that rewrites whatever points at the directory:
//! for a subdirectory that is the parent directory's tree, for the root
//! directory it is the master commit.

use crate::ca::object_id::ObjectId;
use std::cell::Cell;

/// Callback that rewrites the reference to a renamed directory
pub trait ReferenceUpdater {
    /// Record that directory `name` is now identified by `new_id`
    fn update_directory_reference(&self, name: &str, new_id: ObjectId) -> anyhow::Result<()>;
}

/// Root-level updater for read-only snapshot views
///
/// Only records the newest id instead of rewriting a persisted pointer.
/// Previous states are intentionally not unlinked; a snapshot view must
/// not destroy the history it was created from.
#[derive(Debug, Default)]
pub struct SnapshotUpdater {
    last_id: Cell<Option<ObjectId>>,
}

impl SnapshotUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest tree id recorded, if any update happened
    pub fn last_id(&self) -> Option<ObjectId> {
        self.last_id.get()
    }
}

impl ReferenceUpdater for SnapshotUpdater {
    fn update_directory_reference(&self, _name: &str, new_id: ObjectId) -> anyhow::Result<()> {
        self.last_id.set(Some(new_id));
        Ok(())
    }
}
