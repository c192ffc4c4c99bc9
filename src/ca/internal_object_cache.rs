//! In-memory LRU object cache
//!
//! Bounded by an object count and a payload byte count. When either limit
//! overflows, the cache trims back to 75% of both, preferring to drop
//! payloads (keeping the size metadata, which is small and expensive to
//! re-derive) before dropping entries entirely.
//!
//! Recency is tracked with a monotonic access stamp instead of an intrusive
//! list: every access restamps the entry, and the trim pass sorts by stamp.
//! Trimming is rare, so accesses stay cheap.

use crate::ca::object_cache::ObjectCache;
use crate::ca::object_id::ObjectId;
use crate::ca::object_type::ObjectType;
use crate::error::StoreError;
use bytes::Bytes;
use std::collections::HashMap;

/// Default object count limit
const DEFAULT_MAX_OBJECTS: usize = 10_000;

/// Default payload byte limit (30 MB)
const DEFAULT_MAX_BYTES: u64 = 30_000_000;

#[derive(Debug)]
struct CacheNode {
    object_type: ObjectType,
    /// Payload; None for size-only entries and trimmed entries
    content: Option<Bytes>,
    size: u64,
    /// Last-access stamp; larger is more recent
    stamp: u64,
}

/// LRU implementation of `ObjectCache`
#[derive(Debug)]
pub struct InternalObjectCache {
    data: HashMap<ObjectId, CacheNode>,
    num_bytes: u64,
    max_objects: usize,
    max_bytes: u64,
    clock: u64,
}

impl InternalObjectCache {
    pub fn new() -> Self {
        InternalObjectCache {
            data: HashMap::new(),
            num_bytes: 0,
            max_objects: DEFAULT_MAX_OBJECTS,
            max_bytes: DEFAULT_MAX_BYTES,
            clock: 0,
        }
    }

    /// Change the capacity limits and trim to them immediately
    pub fn set_limits(&mut self, max_objects: usize, max_bytes: u64) {
        self.max_objects = max_objects;
        self.max_bytes = max_bytes;
        self.trim();
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Fetch a node, verifying the expected type and bumping recency
    fn access(
        &mut self,
        id: ObjectId,
        object_type: ObjectType,
    ) -> anyhow::Result<Option<&CacheNode>> {
        self.clock += 1;
        let stamp = self.clock;
        match self.data.get_mut(&id) {
            Some(node) => {
                if node.object_type != object_type {
                    return Err(StoreError::HashCollision(id).into());
                }
                node.stamp = stamp;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// Enforce the capacity limits
    ///
    /// Keeps the most recent 75% of the object limit; of those, payloads
    /// are kept newest-first until 75% of the byte limit is reached and
    /// released beyond that. Everything older is removed.
    fn trim(&mut self) {
        if self.data.len() <= self.max_objects && self.num_bytes <= self.max_bytes {
            return;
        }

        let limit_objects = self.max_objects * 3 / 4;
        let limit_bytes = self.max_bytes * 3 / 4;

        let mut order: Vec<(u64, ObjectId)> =
            self.data.iter().map(|(id, node)| (node.stamp, *id)).collect();
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let mut kept_objects = 0usize;
        let mut kept_bytes = 0u64;
        for (_, id) in order {
            if kept_objects >= limit_objects {
                self.remove_object(id);
                continue;
            }
            kept_objects += 1;

            if let Some(node) = self.data.get_mut(&id)
                && let Some(content) = &node.content
            {
                let payload = content.len() as u64;
                if kept_bytes + payload > limit_bytes {
                    node.content = None;
                    self.num_bytes -= payload;
                } else {
                    kept_bytes += payload;
                }
            }
        }
    }
}

impl Default for InternalObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectCache for InternalObjectCache {
    fn add_object(&mut self, id: ObjectId, object_type: ObjectType, content: Bytes) {
        self.remove_object(id);

        let stamp = self.tick();
        self.num_bytes += content.len() as u64;
        self.data.insert(
            id,
            CacheNode {
                object_type,
                size: content.len() as u64,
                content: Some(content),
                stamp,
            },
        );
        self.trim();
    }

    fn add_object_size(&mut self, id: ObjectId, object_type: ObjectType, size: u64) {
        let stamp = self.tick();
        match self.data.get_mut(&id) {
            Some(node) => {
                node.stamp = stamp;
            }
            None => {
                self.data.insert(
                    id,
                    CacheNode {
                        object_type,
                        content: None,
                        size,
                        stamp,
                    },
                );
                self.trim();
            }
        }
    }

    fn remove_object(&mut self, id: ObjectId) {
        if let Some(node) = self.data.remove(&id) {
            if let Some(content) = node.content {
                self.num_bytes -= content.len() as u64;
            }
        }
    }

    fn get_object(
        &mut self,
        id: ObjectId,
        object_type: ObjectType,
    ) -> anyhow::Result<Option<Bytes>> {
        Ok(self.access(id, object_type)?.and_then(|node| node.content.clone()))
    }

    fn get_object_size(
        &mut self,
        id: ObjectId,
        object_type: ObjectType,
    ) -> anyhow::Result<Option<u64>> {
        Ok(self.access(id, object_type)?.map(|node| node.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        ObjectId::from_bytes(bytes)
    }

    #[test]
    fn test_hit_returns_payload_and_size() {
        let mut cache = InternalObjectCache::new();
        cache.add_object(id(1), ObjectType::Data, Bytes::from_static(b"alpha"));

        assert_eq!(
            cache.get_object(id(1), ObjectType::Data).unwrap(),
            Some(Bytes::from_static(b"alpha"))
        );
        assert_eq!(cache.get_object_size(id(1), ObjectType::Data).unwrap(), Some(5));
    }

    #[test]
    fn test_wrong_type_access_is_a_hash_collision() {
        let mut cache = InternalObjectCache::new();
        cache.add_object(id(1), ObjectType::Data, Bytes::from_static(b"alpha"));

        let err = cache.get_object(id(1), ObjectType::Tree).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::HashCollision(_))
        ));
        let err = cache.get_object_size(id(1), ObjectType::Tree).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::HashCollision(_))
        ));
    }

    #[test]
    fn test_size_only_entry_misses_payload_requests() {
        let mut cache = InternalObjectCache::new();
        cache.add_object_size(id(1), ObjectType::Data, 42);

        assert_eq!(cache.get_object(id(1), ObjectType::Data).unwrap(), None);
        assert_eq!(cache.get_object_size(id(1), ObjectType::Data).unwrap(), Some(42));
    }

    #[test]
    fn test_object_overflow_drops_oldest_entries() {
        let mut cache = InternalObjectCache::new();
        cache.set_limits(4, 1_000_000);

        for n in 1..=5 {
            cache.add_object(id(n), ObjectType::Data, Bytes::from_static(b"x"));
        }

        // Trimmed to 75% of 4 = 3 entries; the two oldest are gone.
        assert_eq!(cache.get_object(id(1), ObjectType::Data).unwrap(), None);
        assert_eq!(cache.get_object(id(2), ObjectType::Data).unwrap(), None);
        assert!(cache.get_object(id(5), ObjectType::Data).unwrap().is_some());
    }

    #[test]
    fn test_byte_overflow_drops_payload_but_keeps_size() {
        let mut cache = InternalObjectCache::new();
        cache.set_limits(100, 16);

        cache.add_object(id(1), ObjectType::Data, Bytes::from(vec![0u8; 10]));
        cache.add_object(id(2), ObjectType::Data, Bytes::from(vec![0u8; 10]));

        // 20 bytes exceed the limit of 16; the byte budget shrinks to 12, so
        // the older payload is released while its size stays known.
        assert_eq!(cache.get_object(id(1), ObjectType::Data).unwrap(), None);
        assert_eq!(cache.get_object_size(id(1), ObjectType::Data).unwrap(), Some(10));
        assert!(cache.get_object(id(2), ObjectType::Data).unwrap().is_some());
    }

    #[test]
    fn test_access_refreshes_recency() {
        let mut cache = InternalObjectCache::new();
        cache.set_limits(4, 1_000_000);

        for n in 1..=4 {
            cache.add_object(id(n), ObjectType::Data, Bytes::from_static(b"x"));
        }
        // Touch the oldest entry, then overflow.
        cache.get_object(id(1), ObjectType::Data).unwrap();
        cache.add_object(id(5), ObjectType::Data, Bytes::from_static(b"x"));

        assert!(cache.get_object(id(1), ObjectType::Data).unwrap().is_some());
        assert_eq!(cache.get_object(id(2), ObjectType::Data).unwrap(), None);
    }
}
