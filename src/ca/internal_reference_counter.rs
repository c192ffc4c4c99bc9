//! In-memory reference counter

use crate::ca::object_id::ObjectId;
use crate::ca::reference_counter::ReferenceCounter;
use std::collections::HashMap;

/// Straightforward map from object id to reference count
#[derive(Debug, Default)]
pub struct InternalReferenceCounter {
    data: HashMap<ObjectId, i32>,
}

impl InternalReferenceCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReferenceCounter for InternalReferenceCounter {
    fn set(&mut self, id: ObjectId, value: i32) {
        self.data.insert(id, value);
    }

    fn modify(&mut self, id: ObjectId, delta: i32) -> Option<i32> {
        let entry = self.data.get_mut(&id)?;
        *entry += delta;
        let result = *entry;

        // Once the count reaches zero the object is gone; treating a later
        // modify as if a live count existed would be bogus. Remove the entry
        // so such calls fail instead.
        if result == 0 {
            self.data.remove(&id);
        }
        Some(result)
    }
}
