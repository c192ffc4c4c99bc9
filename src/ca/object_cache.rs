//! Object cache interface
//!
//! The object store consults a cache before touching its backing directory.
//! The interface is deliberately decoupled from the store: a cache may drop
//! any entry at any time to satisfy capacity, and the store stays correct
//! with a cache that never retains anything.

use crate::ca::object_id::ObjectId;
use crate::ca::object_type::ObjectType;
use bytes::Bytes;

/// Cache for object payloads and payload sizes
///
/// A request for an existing id under the wrong type is a fatal
/// `HashCollision` error, never a silent miss: the id determines the type,
/// so a mismatch means the store is handing out corrupted answers.
pub trait ObjectCache {
    /// Remember an object's payload (and thereby its size)
    fn add_object(&mut self, id: ObjectId, object_type: ObjectType, content: Bytes);

    /// Remember an object's size without its payload
    fn add_object_size(&mut self, id: ObjectId, object_type: ObjectType, size: u64);

    /// Forget an object entirely
    fn remove_object(&mut self, id: ObjectId);

    /// Look up a payload; `None` is a miss
    fn get_object(&mut self, id: ObjectId, object_type: ObjectType)
    -> anyhow::Result<Option<Bytes>>;

    /// Look up a size; `None` is a miss
    fn get_object_size(
        &mut self,
        id: ObjectId,
        object_type: ObjectType,
    ) -> anyhow::Result<Option<u64>>;
}

/// Cache that never retains anything
///
/// Turns every lookup into a miss; useful to take caching out of the
/// picture in tests and measurements.
#[derive(Debug, Default)]
pub struct NullObjectCache;

impl ObjectCache for NullObjectCache {
    fn add_object(&mut self, _id: ObjectId, _object_type: ObjectType, _content: Bytes) {}

    fn add_object_size(&mut self, _id: ObjectId, _object_type: ObjectType, _size: u64) {}

    fn remove_object(&mut self, _id: ObjectId) {}

    fn get_object(
        &mut self,
        _id: ObjectId,
        _object_type: ObjectType,
    ) -> anyhow::Result<Option<Bytes>> {
        Ok(None)
    }

    fn get_object_size(
        &mut self,
        _id: ObjectId,
        _object_type: ObjectType,
    ) -> anyhow::Result<Option<u64>> {
        Ok(None)
    }
}
