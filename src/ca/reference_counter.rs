//! Reference counter interface
//!
//! Objects in the content-addressable pool carry a reference count so that
//! superseded intermediate states can be deleted the moment they become
//! unreferenced. Counts live for the process lifetime only; objects whose
//! counts were lost are reclaimed later by the garbage collector.
//!
//! A lost count must never cause a deletion: when `modify` cannot find an
//! id it fails, and the caller leaves the object alone.

use crate::ca::object_id::ObjectId;

/// Access to reference count storage
pub trait ReferenceCounter {
    /// Initialize the count for an id
    fn set(&mut self, id: ObjectId, value: i32);

    /// Add `delta` to an id's count
    ///
    /// Returns the new value, or `None` if no count is stored for the id
    /// (in which case nothing was changed).
    fn modify(&mut self, id: ObjectId, delta: i32) -> Option<i32>;
}
