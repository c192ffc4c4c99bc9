//! Directory handler abstraction
//!
//! A `DirectoryHandler` is the storage-layout seam of the file server: the
//! front-end only ever talks to this trait, whether the bytes live on disk
//! (`FileSystemHandler`), in memory (`InternalDirectoryHandler`), or inside
//! the content-addressable object store (`ca::DirectoryHandler`).
//!
//! ## Contract
//!
//! - Files are read and written whole, as `Bytes`.
//! - `copy_file` is an optional metadata fast-path; the default
//!   implementation declines and the caller falls back to a stream copy.
//! - `read_content` reports one `Info` per entry via a callback.

pub mod filesystem;
pub mod internal;

use bytes::Bytes;
use derive_new::new;
use std::any::Any;

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    /// Present in the underlying storage but not interpretable by this layer
    Unknown,
}

/// Description of one directory entry
///
/// `content_id` is the 40-hex-digit content id when the underlying store
/// knows it; it accelerates cross-handler copies and by-id reads.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct Info {
    /// Entry name (no `/`)
    pub name: String,
    /// Entry kind
    pub entry_type: EntryType,
    /// Payload size, if known
    #[new(default)]
    pub size: Option<u64>,
    /// Content id in hex form, if the store knows it
    #[new(default)]
    pub content_id: Option<String>,
}

/// Mutable directory contract exposed to the file server front-end
///
/// Implementations report failures using the `StoreError` kinds documented
/// per method; all other errors are I/O problems of the backing storage.
pub trait DirectoryHandler {
    /// Human-readable name of this directory, for diagnostics
    fn name(&self) -> String;

    /// Concrete-type access, used by `copy_file` to detect same-family handlers
    fn as_any(&self) -> &dyn Any;

    /// Get a file's content
    ///
    /// If `info` carries a valid content id, implementations may fetch by id
    /// directly; otherwise the entry is looked up by name.
    /// Fails with `FileNotFound` if absent.
    fn get_file(&mut self, info: &Info) -> anyhow::Result<Bytes> {
        self.get_file_by_name(&info.name)
    }

    /// Get a file's content by name
    ///
    /// Fails with `FileNotFound` if absent or not a file.
    fn get_file_by_name(&mut self, name: &str) -> anyhow::Result<Bytes>;

    /// Create a file, replacing an existing file of the same name
    ///
    /// Fails with `AlreadyExists` if the name refers to a directory.
    fn create_file(&mut self, name: &str, content: &[u8]) -> anyhow::Result<Info>;

    /// Remove a file
    ///
    /// Fails with `FileNotFound` if absent, `TypeMismatch` if it is a directory.
    fn remove_file(&mut self, name: &str) -> anyhow::Result<()>;

    /// Copy a file from another handler, if a metadata shortcut exists
    ///
    /// Returns `None` when no shortcut applies (different handler family or
    /// different store); the caller then performs a regular read/write copy.
    fn copy_file(
        &mut self,
        _source: &dyn DirectoryHandler,
        _source_info: &Info,
        _name: &str,
    ) -> anyhow::Result<Option<Info>> {
        Ok(None)
    }

    /// Report each entry of this directory to `callback`
    fn read_content(&mut self, callback: &mut dyn FnMut(Info)) -> anyhow::Result<()>;

    /// Open a subdirectory
    ///
    /// Fails with `FileNotFound` if absent, `TypeMismatch` if not a directory.
    fn get_directory(&mut self, info: &Info) -> anyhow::Result<Box<dyn DirectoryHandler>>;

    /// Create a subdirectory
    ///
    /// Fails with `AlreadyExists` if the name is taken.
    fn create_directory(&mut self, name: &str) -> anyhow::Result<Info>;

    /// Remove an empty subdirectory
    ///
    /// Fails with `FileNotFound` if absent, `TypeMismatch` if it is a file,
    /// `DirNotEmpty` if it still has entries.
    fn remove_directory(&mut self, name: &str) -> anyhow::Result<()>;
}
