//! Loose-object storage
//!
//! The central component of the content-addressable backend: stores and
//! retrieves typed objects by the SHA-1 of their framed payload. Objects
//! live in an "objects" directory, partitioned into up to 256
//! subdirectories named by the first id byte; the file name is the
//! remaining 38 hex digits.
//!
//! ## Storage format
//!
//! Each object file holds `zlib("<type> <decimal-size>\0<payload>")`.
//!
//! ## Reference counting
//!
//! Every object carries an in-memory reference count, starting at 1 on
//! creation. Dropping the count to zero deletes the object and unlinks its
//! children. This is what keeps the store affordable: a directory update
//! writes a fresh tree for every superseded intermediate state, and the
//! counts cancel those states the moment they are replaced. Counts are not
//! persisted; after a restart the garbage collector reclaims whatever the
//! previous lifecycle left behind.

use crate::ca::commit::Commit;
use crate::ca::directory_entry::DirectoryEntry;
use crate::ca::internal_object_cache::InternalObjectCache;
use crate::ca::internal_reference_counter::InternalReferenceCounter;
use crate::ca::object_cache::ObjectCache;
use crate::ca::object_id::ObjectId;
use crate::ca::object_type::ObjectType;
use crate::ca::reference_counter::ReferenceCounter;
use crate::error::StoreError;
use crate::handler::{DirectoryHandler, EntryType};
use anyhow::Context;
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

/// Size parse limit: about 2G
///
/// The front-end enforces a much lower limit on file sizes; this cap only
/// keeps a corrupt header from driving an allocation.
const MAX_OBJECT_SIZE: u64 = 0x7FFF_FFFF;

/// Result of an internal object load
#[derive(Debug)]
struct LoadedObject {
    size: u64,
    /// Present only when content was requested
    content: Option<Bytes>,
}

/// Object storage over a directory handler
///
/// Aggregates the two optional concerns around the raw object files:
/// payload/size caching and reference counting. Both sit behind their
/// interface traits and can be replaced.
pub struct ObjectStore {
    /// Handler for the "objects" directory
    directory: Box<dyn DirectoryHandler>,
    /// Handlers for the 256 first-byte directories, created lazily
    subdirectories: Vec<Option<Box<dyn DirectoryHandler>>>,
    ref_counter: Box<dyn ReferenceCounter>,
    cache: Box<dyn ObjectCache>,
}

impl ObjectStore {
    /// Create a store over the given "objects" directory
    pub fn new(directory: Box<dyn DirectoryHandler>) -> anyhow::Result<Self> {
        Self::with_parts(
            directory,
            Box::new(InternalObjectCache::new()),
            Box::new(InternalReferenceCounter::new()),
        )
    }

    /// Create a store with explicit cache and reference counter choices
    pub fn with_parts(
        directory: Box<dyn DirectoryHandler>,
        cache: Box<dyn ObjectCache>,
        ref_counter: Box<dyn ReferenceCounter>,
    ) -> anyhow::Result<Self> {
        let mut store = ObjectStore {
            directory,
            subdirectories: (0..256).map(|_| None).collect(),
            ref_counter,
            cache,
        };
        store.read_directory()?;
        Ok(store)
    }

    /// Get an object's content
    ///
    /// Fails with `MissingObject` if the id is not stored, `BadObjectType`
    /// on a framing type mismatch, `BadObjectSize`/`BadObjectContent` on a
    /// damaged object.
    pub fn get_object(&mut self, id: ObjectId, expected_type: ObjectType) -> anyhow::Result<Bytes> {
        match self.load_object(id, expected_type, true)? {
            Some(LoadedObject {
                content: Some(content),
                ..
            }) => Ok(content),
            _ => Err(StoreError::MissingObject(id).into()),
        }
    }

    /// Get an object's payload size
    ///
    /// Same as `get_object(..).len()`, but can be answered from the size
    /// cache or a truncated header read.
    pub fn get_object_size(
        &mut self,
        id: ObjectId,
        expected_type: ObjectType,
    ) -> anyhow::Result<u64> {
        match self.load_object(id, expected_type, false)? {
            Some(loaded) => Ok(loaded.size),
            None => Err(StoreError::MissingObject(id).into()),
        }
    }

    /// Add an object
    ///
    /// If an object with the same content already exists, its reference
    /// count is increased; it is an error (`HashCollision`) if the stored
    /// content differs. A new object starts with a reference count of 1.
    ///
    /// For tree and commit payloads the caller must already have accounted
    /// for one link per referenced child; when this call deduplicates
    /// instead of creating, it cancels those links again.
    pub fn add_object(
        &mut self,
        object_type: ObjectType,
        data: &[u8],
    ) -> anyhow::Result<ObjectId> {
        // We accept ObjectId::NIL as a way to refer to a zero-size object,
        // but do not create zero-size objects under that shortcut; external
        // tooling expects them as regular files.
        let prefix = format!("{} {}", object_type.as_str(), data.len());
        let id = ObjectId::hash_parts(&[prefix.as_bytes(), b"\0", data]);

        if let Some(LoadedObject {
            content: Some(existing),
            ..
        }) = self.load_object(id, object_type, true)?
        {
            if existing != data {
                return Err(StoreError::HashCollision(id).into());
            }

            // The caller assumed this would be a new object and accounted
            // for links to its children. Undo that, then count the new
            // reference to the existing object.
            self.unlink_content(object_type, &existing)?;
            self.ref_counter.modify(id, 1);
        } else {
            let first_byte = id.first_byte();
            if self.subdirectories[first_byte as usize].is_none() {
                let info = self.directory.create_directory(&format!("{first_byte:02x}"))?;
                let handler = self.directory.get_directory(&info)?;
                self.subdirectories[first_byte as usize] = Some(handler);
            }

            let mut framed = Vec::with_capacity(prefix.len() + 1 + data.len());
            framed.extend_from_slice(prefix.as_bytes());
            framed.push(0);
            framed.extend_from_slice(data);

            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(&framed)
                .context("unable to compress object content")?;
            let compressed = encoder
                .finish()
                .context("unable to finish compressing object content")?;

            let subdirectory = self.subdirectories[first_byte as usize]
                .as_mut()
                .context("object subdirectory vanished")?;
            subdirectory.create_file(&tail_name(id), &compressed)?;

            self.ref_counter.set(id, 1);
            self.cache
                .add_object(id, object_type, Bytes::copy_from_slice(data));
        }

        Ok(id)
    }

    /// Add one reference to an object
    pub fn link_object(&mut self, id: ObjectId) {
        if id != ObjectId::NIL {
            self.ref_counter.modify(id, 1);
        }
    }

    /// Remove one reference from an object
    ///
    /// At zero the object is deleted from storage; tree and commit objects
    /// first unlink their children, recursively. Objects without a tracked
    /// count are left alone.
    pub fn unlink_object(&mut self, object_type: ObjectType, id: ObjectId) -> anyhow::Result<()> {
        if id == ObjectId::NIL {
            return Ok(());
        }
        if self.ref_counter.modify(id, -1) == Some(0) {
            // Reference count reached zero; the object can go. Embedded
            // references go first.
            if object_type != ObjectType::Data {
                let content = self.get_object(id, object_type)?;
                self.unlink_content(object_type, &content)?;
            }

            let first_byte = id.first_byte() as usize;
            if let Some(subdirectory) = self.subdirectories[first_byte].as_mut() {
                subdirectory.remove_file(&tail_name(id))?;
            }
            self.cache.remove_object(id);
        }
        Ok(())
    }

    /// Read a commit object and return the tree it points to
    pub fn commit_tree_id(&mut self, id: ObjectId) -> anyhow::Result<ObjectId> {
        if id == ObjectId::NIL {
            return Ok(ObjectId::NIL);
        }
        let content = self.get_object(id, ObjectType::Commit)?;
        let mut commit = Commit::default();
        if !commit.parse(&content) {
            return Err(StoreError::BadObjectContent(id).into());
        }
        Ok(commit.tree_id())
    }

    /// Handler of one first-byte subdirectory, if it exists
    ///
    /// Used by the garbage collector's sweep phase, which enumerates and
    /// removes raw object files by prefix.
    pub fn object_directory(
        &mut self,
        first_byte: u8,
    ) -> Option<&mut Box<dyn DirectoryHandler>> {
        self.subdirectories[first_byte as usize].as_mut()
    }

    /// Load an object, consulting the cache first
    ///
    /// Returns `None` when the object does not exist; decoding problems of
    /// an existing object are errors. A failed file open counts as "does
    /// not exist", matching the behavior of the underlying handlers.
    fn load_object(
        &mut self,
        id: ObjectId,
        expected_type: ObjectType,
        want_content: bool,
    ) -> anyhow::Result<Option<LoadedObject>> {
        if id == ObjectId::NIL {
            // Null matches anything. Newly-created objects never get the
            // nil id, so no physical I/O can be meant here.
            return Ok(Some(LoadedObject {
                size: 0,
                content: want_content.then(Bytes::new),
            }));
        }

        if !want_content {
            if let Some(size) = self.cache.get_object_size(id, expected_type)? {
                return Ok(Some(LoadedObject {
                    size,
                    content: None,
                }));
            }
        } else if let Some(content) = self.cache.get_object(id, expected_type)? {
            return Ok(Some(LoadedObject {
                size: content.len() as u64,
                content: Some(content),
            }));
        }

        let Some(subdirectory) = self.subdirectories[id.first_byte() as usize].as_mut() else {
            return Ok(None);
        };
        let Ok(compressed) = subdirectory.get_file_by_name(&tail_name(id)) else {
            return Ok(None);
        };

        let loaded = decode_object(id, expected_type, &compressed, want_content)?;
        match &loaded.content {
            Some(content) => self.cache.add_object(id, expected_type, content.clone()),
            None => self.cache.add_object_size(id, expected_type, loaded.size),
        }
        Ok(Some(loaded))
    }

    /// Populate the subdirectory handlers from the objects directory
    fn read_directory(&mut self) -> anyhow::Result<()> {
        let mut found = Vec::new();
        self.directory.read_content(&mut |info| {
            if info.entry_type == EntryType::Directory && info.name.len() == 2 {
                let Ok(index) = u8::from_str_radix(&info.name, 16) else {
                    return;
                };
                if info.name == format!("{index:02x}") {
                    found.push((index, info));
                }
            }
        })?;

        for (index, info) in found {
            let handler = self.directory.get_directory(&info)?;
            self.subdirectories[index as usize] = Some(handler);
        }
        Ok(())
    }

    /// Unlink everything an object's payload references
    ///
    /// Call before removing the object itself.
    fn unlink_content(&mut self, object_type: ObjectType, data: &[u8]) -> anyhow::Result<()> {
        match object_type {
            ObjectType::Data => {}
            ObjectType::Tree => {
                let mut entry = DirectoryEntry::default();
                let mut rest = data;
                while entry.parse(&mut rest) {
                    match entry.entry_type() {
                        EntryType::Directory => self.unlink_object(ObjectType::Tree, entry.id())?,
                        EntryType::File | EntryType::Unknown => {
                            self.unlink_object(ObjectType::Data, entry.id())?
                        }
                    }
                }
            }
            ObjectType::Commit => {
                let mut commit = Commit::default();
                if commit.parse(data) {
                    self.unlink_object(ObjectType::Tree, commit.tree_id())?;
                }
            }
        }
        Ok(())
    }
}

/// File name of an object within its first-byte directory (38 hex digits)
fn tail_name(id: ObjectId) -> String {
    let mut hex = id.to_hex();
    hex.drain(..2);
    hex
}

/// Decode a framed, compressed object
///
/// With `want_content` unset, inflation stops after a header-sized prefix;
/// the payload is neither inflated nor length-checked.
fn decode_object(
    id: ObjectId,
    expected_type: ObjectType,
    compressed: &[u8],
    want_content: bool,
) -> anyhow::Result<LoadedObject> {
    let mut decoder = ZlibDecoder::new(compressed);

    if !want_content {
        // A header is at most "commit " plus ten digits plus NUL; 100 bytes
        // of prefix are plenty.
        let mut prefix = [0u8; 100];
        let mut filled = 0;
        loop {
            let n = decoder
                .read(&mut prefix[filled..])
                .map_err(|_| StoreError::BadObjectContent(id))?;
            if n == 0 || filled == prefix.len() {
                break;
            }
            filled += n;
        }

        let (size, _) = verify_header(id, expected_type, &prefix[..filled])?;
        return Ok(LoadedObject {
            size,
            content: None,
        });
    }

    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(|_| StoreError::BadObjectContent(id))?;

    let (size, header_len) = verify_header(id, expected_type, &inflated)?;
    let payload_len = (inflated.len() - header_len) as u64;
    if payload_len != size {
        return Err(StoreError::BadObjectContent(id).into());
    }

    Ok(LoadedObject {
        size,
        content: Some(Bytes::from(inflated).slice(header_len..)),
    })
}

/// Check the framing header against the expected type keyword
///
/// Returns the announced payload size and the header length (keyword, size
/// digits and NUL terminator).
fn verify_header(
    id: ObjectId,
    expected_type: ObjectType,
    data: &[u8],
) -> anyhow::Result<(u64, usize)> {
    let keyword = expected_type.as_str();
    let Some(rest) = data.strip_prefix(keyword.as_bytes()) else {
        return Err(StoreError::BadObjectType(id).into());
    };
    let Some(rest) = rest.strip_prefix(b" ") else {
        return Err(StoreError::BadObjectType(id).into());
    };

    let mut size: u64 = 0;
    let mut digits = 0;
    for &byte in rest {
        match byte {
            b'\0' if digits > 0 => {
                let header_len = keyword.len() + 1 + digits + 1;
                return Ok((size, header_len));
            }
            b'0'..=b'9' => {
                if size >= MAX_OBJECT_SIZE / 10 {
                    return Err(StoreError::BadObjectSize(id).into());
                }
                size = 10 * size + u64::from(byte - b'0');
                digits += 1;
            }
            _ => return Err(StoreError::BadObjectSize(id).into()),
        }
    }
    Err(StoreError::BadObjectSize(id).into())
}
