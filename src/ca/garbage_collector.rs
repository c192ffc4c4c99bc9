//! Sliced mark-and-sweep garbage collector
//!
//! Builds the transitive closure of objects reachable from root commits,
//! then deletes everything else. Needed because reference counts live only
//! for the process lifetime: objects orphaned in a previous lifecycle are
//! invisible to the counting scheme.
//!
//! ## Operation
//!
//! - `add_commit` for every root commit;
//! - `check_object` until it returns false (mark phase, one tree per call);
//! - `remove_garbage_objects` until it returns false (sweep phase, one
//!   first-byte prefix per call).
//!
//! The slicing lets a live server interleave user operations with GC work:
//! if the store changes between slices, re-adding the current root commits
//! restarts the sequence safely without losing prior progress. Objects
//! orphaned by those changes may survive this run; a later run collects
//! them. Parallel mutation from other processes is not supported.
//!
//! This cleans up; it does not repair. Errors are counted and logged, and a
//! non-zero error count means the store is damaged (a zero count is no
//! guarantee of the opposite).

use crate::ca::directory_entry::DirectoryEntry;
use crate::ca::object_id::{ObjectId, OBJECT_ID_HEX_LEN};
use crate::ca::object_store::ObjectStore;
use crate::ca::object_type::ObjectType;
use crate::handler::EntryType;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

/// Garbage collector over one object store
pub struct GarbageCollector {
    store: Rc<RefCell<ObjectStore>>,

    /// Ids known reachable
    objects_to_keep: HashSet<ObjectId>,
    /// Tree ids whose children still need to be visited
    trees_to_check: BTreeSet<ObjectId>,

    /// Sweep cursor: next first-byte prefix to clean (256 = done)
    next_prefix_to_check: usize,
    num_objects_removed: usize,
    num_errors: usize,
}

impl GarbageCollector {
    pub fn new(store: Rc<RefCell<ObjectStore>>) -> Self {
        GarbageCollector {
            store,
            objects_to_keep: HashSet::new(),
            trees_to_check: BTreeSet::new(),
            next_prefix_to_check: 0,
            num_objects_removed: 0,
            num_errors: 0,
        }
    }

    /// Add a root commit to the set of objects to keep
    ///
    /// Keeps the commit and, transitively, everything below its tree. May
    /// be called at any point of the sequence; adding a commit rewinds the
    /// sweep cursor so a root that appeared mid-sweep cannot be swept.
    pub fn add_commit(&mut self, id: ObjectId) {
        if id == ObjectId::NIL {
            return;
        }
        if self.objects_to_keep.insert(id) {
            let result = self.store.borrow_mut().commit_tree_id(id);
            match result {
                Ok(tree_id) => self.add_tree(tree_id),
                Err(err) => {
                    tracing::error!("{}: error resolving as commit, ignoring: {:#}", id, err);
                    self.num_errors += 1;
                }
            }
            self.next_prefix_to_check = 0;
        }
    }

    /// Add a tree to the set of objects to keep
    ///
    /// The tree and all its children will eventually be kept.
    pub fn add_tree(&mut self, id: ObjectId) {
        // Queue for checking unless already fully registered
        if !self.objects_to_keep.contains(&id) {
            self.trees_to_check.insert(id);
        }
    }

    /// Add a single data object to the set of objects to keep
    pub fn add_file(&mut self, id: ObjectId) {
        self.objects_to_keep.insert(id);
    }

    /// Mark phase: check one queued tree
    ///
    /// Returns true if a tree was processed, false if nothing is left to
    /// check. Errors are counted; the collector carries on.
    pub fn check_object(&mut self) -> bool {
        let Some(id) = self.trees_to_check.pop_first() else {
            return false;
        };
        self.objects_to_keep.insert(id);

        let result = self.store.borrow_mut().get_object(id, ObjectType::Tree);
        match result {
            Ok(content) => {
                let mut entry = DirectoryEntry::default();
                let mut rest = &content[..];
                while entry.parse(&mut rest) {
                    match entry.entry_type() {
                        EntryType::File => self.add_file(entry.id()),
                        EntryType::Directory => self.add_tree(entry.id()),
                        EntryType::Unknown => {
                            tracing::error!(
                                "{}: unrecognized child element '{}'",
                                id,
                                entry.name()
                            );
                            self.add_file(entry.id());
                            self.num_errors += 1;
                        }
                    }
                }
            }
            Err(err) => {
                tracing::error!("{}: error resolving as tree, ignoring: {:#}", id, err);
                self.num_errors += 1;
            }
        }

        // Marking invalidates any sweep progress.
        self.next_prefix_to_check = 0;
        true
    }

    /// Sweep phase: clean one first-byte prefix
    ///
    /// Returns true while progress is being made. Refuses (returns false)
    /// while trees remain to check: sweeping with an incomplete reachable
    /// set would delete live objects, so this is re-checked on every call.
    pub fn remove_garbage_objects(&mut self) -> bool {
        if !self.trees_to_check.is_empty() {
            // Fail-safe: must not remove anything in this state. The caller
            // should not have called this; returning false hints to stop.
            return false;
        }
        if self.next_prefix_to_check >= 256 {
            return false;
        }

        let prefix = self.next_prefix_to_check as u8;
        match self.sweep_prefix(prefix) {
            Ok(removed) => self.num_objects_removed += removed,
            Err(err) => {
                tracing::warn!("{:02x}: error cleaning up: {:#}", prefix, err);
            }
        }

        self.next_prefix_to_check += 1;
        true
    }

    /// Delete every unreachable object file under one prefix directory
    fn sweep_prefix(&mut self, prefix: u8) -> anyhow::Result<usize> {
        let mut store = self.store.borrow_mut();
        let Some(handler) = store.object_directory(prefix) else {
            return Ok(0);
        };

        // Collect names first, delete afterwards: deleting while the
        // directory is being enumerated would confuse the handler. The
        // garbage share per directory is small enough to hold the list in
        // memory.
        let keep = &self.objects_to_keep;
        let mut files_to_delete = Vec::new();
        handler.read_content(&mut |info| {
            match reconstruct_id(prefix, &info) {
                Some(id) => {
                    if !keep.contains(&id) {
                        files_to_delete.push(info.name);
                    }
                }
                None => {
                    tracing::warn!("{:02x}/{}: unrecognized file, ignoring", prefix, info.name);
                }
            }
        })?;

        for name in &files_to_delete {
            handler.remove_file(name)?;
        }
        Ok(files_to_delete.len())
    }

    /// Get number of objects to keep found so far
    pub fn num_objects_to_keep(&self) -> usize {
        self.objects_to_keep.len()
    }

    /// Get number of objects still queued for checking
    pub fn num_objects_to_check(&self) -> usize {
        self.trees_to_check.len()
    }

    /// Get number of objects removed by the sweep phase
    pub fn num_objects_removed(&self) -> usize {
        self.num_objects_removed
    }

    /// Get number of errors encountered
    ///
    /// Non-zero means the store is structurally damaged.
    pub fn num_errors(&self) -> usize {
        self.num_errors
    }
}

/// Rebuild an object id from its prefix directory and file name
///
/// Returns `None` for anything that is not a well-formed loose object file
/// (wrong type, wrong length, non-canonical hex).
fn reconstruct_id(prefix: u8, info: &crate::handler::Info) -> Option<ObjectId> {
    if info.entry_type != EntryType::File || info.name.len() != OBJECT_ID_HEX_LEN - 2 {
        return None;
    }
    let hex = format!("{prefix:02x}{}", info.name);
    let id = ObjectId::from_hex(&hex);
    (id.to_hex() == hex).then_some(id)
}
