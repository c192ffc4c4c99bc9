//! Content-addressable storage backend
//!
//! Stores every file, directory and root-of-state by the SHA-1 hash of its
//! bytes, in a widely understood on-disk object format so that standard
//! tooling can diagnose a store. The pieces:
//!
//! - `object_id`, `object_type`: hash identifiers and object typing
//! - `object_store`: loose objects with deflate framing and ref counting
//! - `directory_entry`, `commit`: binary formats for tree and commit records
//! - `directory_handler`, `reference_updater`: the mutable tree view
//! - `root`: binds a physical directory to a store and a master commit
//! - `garbage_collector`: sliced mark-and-sweep for a live store
//! - `index_file`, `pack_file`: read-only access to object packs
//! - `object_cache`, `reference_counter` (+ `internal_*`): pluggable
//!   caching and reference count storage

pub mod commit;
pub mod directory_entry;
pub mod directory_handler;
pub mod garbage_collector;
pub mod index_file;
pub mod internal_object_cache;
pub mod internal_reference_counter;
pub mod object_cache;
pub mod object_id;
pub mod object_store;
pub mod object_type;
pub mod pack_file;
pub mod reference_counter;
pub mod reference_updater;
pub mod root;
