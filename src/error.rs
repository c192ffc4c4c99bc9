//! Error taxonomy for the content-addressable storage backend
//!
//! Every failure the storage core can produce is one of the kinds below.
//! Functions return `anyhow::Result`, so callers that need to distinguish
//! kinds (the file server front-end maps them to its RPC error codes)
//! use `err.downcast_ref::<StoreError>()`.
//!
//! ## Layers
//!
//! - `MissingObject` .. `HashCollision`: object store and object cache
//! - `FileNotFound` .. `AlreadyExists`: directory handlers
//! - `UnsupportedFormat`, `BadReference`: pack and index files

use crate::ca::object_id::ObjectId;

/// Storage backend error kinds
///
/// Content-layer errors (`MissingObject`, `BadObjectContent`, ...) indicate
/// store damage; the caller should fail the affected request but keep the
/// service running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A referenced object id has no stored object
    #[error("{0}: missing object")]
    MissingObject(ObjectId),

    /// The framed type keyword does not match the expected type
    #[error("{0}: bad object type")]
    BadObjectType(ObjectId),

    /// The decimal size header is malformed or out of range
    #[error("{0}: bad object size")]
    BadObjectSize(ObjectId),

    /// The inflated payload does not match the announced size
    #[error("{0}: bad object content")]
    BadObjectContent(ObjectId),

    /// Two distinct payloads under one id, or wrong-type cache access
    #[error("{0}: hash collision")]
    HashCollision(ObjectId),

    /// Name absent in a directory tree
    #[error("{0}: file not found")]
    FileNotFound(String),

    /// Operation applied to the wrong kind of entry
    #[error("{0}: type mismatch")]
    TypeMismatch(String),

    /// `remove_directory` on a non-empty tree
    #[error("{0}: directory not empty")]
    DirNotEmpty(String),

    /// Name collision when replacement is not allowed
    #[error("{0}: already exists")]
    AlreadyExists(String),

    /// Magic or version mismatch, or a truncated header
    #[error("{0}: unsupported file format")]
    UnsupportedFormat(String),

    /// Invalid delta offset, depth overrun, or reference size mismatch
    #[error("{0}: bad reference")]
    BadReference(String),
}
