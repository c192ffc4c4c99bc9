//! Content-addressable storage backend of a VGA Planets file server
//!
//! Many game directories belonging to many users carry enormous
//! redundancy: identical specification files, snapshotted turn backups,
//! duplicated result files. This crate deduplicates them by storing every
//! file, directory and root-of-state under the hash of its bytes, while
//! presenting the result as an ordinary mutable directory tree.
//!
//! The crate has two layers:
//!
//! - [`handler`]: the `DirectoryHandler` contract the file server front-end
//!   programs against, with in-memory and on-disk implementations;
//! - [`ca`]: the content-addressable backend itself, which both consumes a
//!   physical `DirectoryHandler` (for its object files) and implements the
//!   same contract on top (for its users).
//!
//! The storage core is single-threaded by design; the server serializes
//! all calls through its request queue. Long-running maintenance (garbage
//! collection) is sliced so it can interleave with user requests.

pub mod ca;
pub mod error;
pub mod handler;
