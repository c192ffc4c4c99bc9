//! Content-addressable directory handler
//!
//! Presents one tree object of the store as a mutable directory. Every
//! mutation stores a rewritten tree (a fresh object id) and propagates the
//! new id to the parent through the `ReferenceUpdater` chain, which rewrites
//! the path all the way to the root commit.
//!
//! A child handler may outlive the handler that created it, so all state
//! lives in a reference-counted `DirectoryContent` that doubles as the
//! child's updater.

use crate::ca::directory_entry::DirectoryEntry;
use crate::ca::object_id::ObjectId;
use crate::ca::object_store::ObjectStore;
use crate::ca::object_type::ObjectType;
use crate::ca::reference_updater::ReferenceUpdater;
use crate::error::StoreError;
use crate::handler;
use crate::handler::{EntryType, Info};
use bytes::Bytes;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Shared state of a content-addressable directory
///
/// Holds the current tree id and the updater pointing back at the parent.
/// Implements `ReferenceUpdater` itself so child directories can report
/// their new ids here.
struct DirectoryContent {
    store: Rc<RefCell<ObjectStore>>,
    id: Cell<ObjectId>,
    name: String,
    updater: Rc<dyn ReferenceUpdater>,
}

impl DirectoryContent {
    fn tree_object(&self) -> anyhow::Result<Bytes> {
        self.store
            .borrow_mut()
            .get_object(self.id.get(), ObjectType::Tree)
    }

    fn child_name(&self, child: &str) -> String {
        format!("{} in {} '{}'", child, self.id.get(), self.name)
    }

    /// Insert or replace one entry, rewriting the tree
    ///
    /// Walks the existing entries in their sorted order, copying each into
    /// the new tree (and taking one link on it, since the new tree
    /// references it as well); the new entry is emitted at its sort
    /// position. Replacing is only allowed for an entry of the same type,
    /// and only when `allow_replace` is set; either violation reports
    /// `AlreadyExists`.
    fn update_directory_entry(
        &self,
        name: &str,
        new_id: ObjectId,
        entry_type: EntryType,
        allow_replace: bool,
    ) -> anyhow::Result<()> {
        let old_bytes = self.tree_object()?;
        let mut new_bytes = Vec::with_capacity(old_bytes.len() + name.len() + 32);
        let new_entry = DirectoryEntry::new(name, new_id, entry_type);

        let mut entry = DirectoryEntry::default();
        let mut rest = &old_bytes[..];
        let mut did = false;
        while entry.parse(&mut rest) {
            if did {
                // Already placed; just copy.
                entry.store(&mut new_bytes);
                self.store.borrow_mut().link_object(entry.id());
            } else if entry.name() == name {
                // Replacing an entry
                if entry.entry_type() != entry_type || !allow_replace {
                    // TODO: reference counts taken so far are not undone
                    // here; the garbage collector reclaims them.
                    return Err(StoreError::AlreadyExists(self.child_name(name)).into());
                }
                new_entry.store(&mut new_bytes);
                did = true;
            } else if new_entry.is_before(&entry) {
                // Inserting before this entry
                new_entry.store(&mut new_bytes);
                did = true;
                entry.store(&mut new_bytes);
                self.store.borrow_mut().link_object(entry.id());
            } else {
                entry.store(&mut new_bytes);
                self.store.borrow_mut().link_object(entry.id());
            }
        }

        if !did {
            new_entry.store(&mut new_bytes);
        }

        self.replace_directory(&new_bytes)
    }

    /// Remove one entry, rewriting the tree
    fn remove_directory_entry(&self, name: &str, entry_type: EntryType) -> anyhow::Result<()> {
        let old_bytes = self.tree_object()?;
        let mut new_bytes = Vec::with_capacity(old_bytes.len());

        let mut entry = DirectoryEntry::default();
        let mut rest = &old_bytes[..];
        let mut did = false;
        while entry.parse(&mut rest) {
            if entry.name() == name {
                if entry.entry_type() != entry_type {
                    return Err(StoreError::TypeMismatch(self.child_name(name)).into());
                }
                if entry_type == EntryType::Directory
                    && self
                        .store
                        .borrow_mut()
                        .get_object_size(entry.id(), ObjectType::Tree)?
                        != 0
                {
                    return Err(StoreError::DirNotEmpty(self.child_name(name)).into());
                }
                did = true;
            } else {
                entry.store(&mut new_bytes);
                self.store.borrow_mut().link_object(entry.id());
            }
        }

        if !did {
            return Err(StoreError::FileNotFound(self.child_name(name)).into());
        }

        self.replace_directory(&new_bytes)
    }

    /// Store the rewritten tree and propagate the id change upward
    ///
    /// The previous tree object is not unlinked here: it is still
    /// referenced along the old path up to the root commit, and the
    /// root-level updater decides whether to keep or unlink that state.
    fn replace_directory(&self, new_bytes: &[u8]) -> anyhow::Result<()> {
        let new_id = self
            .store
            .borrow_mut()
            .add_object(ObjectType::Tree, new_bytes)?;
        self.updater.update_directory_reference(&self.name, new_id)?;
        self.id.set(new_id);
        Ok(())
    }
}

impl ReferenceUpdater for DirectoryContent {
    fn update_directory_reference(&self, name: &str, new_id: ObjectId) -> anyhow::Result<()> {
        if new_id != self.id.get() {
            self.update_directory_entry(name, new_id, EntryType::Directory, true)?;
        }
        Ok(())
    }
}

/// `DirectoryHandler` implementation over the content-addressable store
///
/// Clones are cheap and share state: a clone observes (and participates
/// in) the same tree id as the original.
pub struct DirectoryHandler {
    content: Rc<DirectoryContent>,
}

impl Clone for DirectoryHandler {
    fn clone(&self) -> Self {
        DirectoryHandler {
            content: self.content.clone(),
        }
    }
}

impl DirectoryHandler {
    /// Create a handler for the tree identified by `id`
    ///
    /// `updater` receives the new id after every mutation; pass the parent
    /// directory's content, a root updater, or a `SnapshotUpdater`.
    pub fn new(
        store: Rc<RefCell<ObjectStore>>,
        id: ObjectId,
        name: impl Into<String>,
        updater: Rc<dyn ReferenceUpdater>,
    ) -> Self {
        DirectoryHandler {
            content: Rc::new(DirectoryContent {
                store,
                id: Cell::new(id),
                name: name.into(),
                updater,
            }),
        }
    }

    /// Current tree id of this directory
    pub fn tree_id(&self) -> ObjectId {
        self.content.id.get()
    }

    /// Parse an Info's content id, if it is syntactically valid
    fn valid_content_id(info: &Info) -> Option<ObjectId> {
        let hex = info.content_id.as_deref()?;
        // The id must be equal to its own stringified form.
        let id = ObjectId::from_hex(hex);
        (id.to_hex() == hex).then_some(id)
    }
}

impl handler::DirectoryHandler for DirectoryHandler {
    fn name(&self) -> String {
        format!("{} '{}'", self.content.id.get(), self.content.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_file(&mut self, info: &Info) -> anyhow::Result<Bytes> {
        // A valid content id saves the tree scan.
        if let Some(id) = Self::valid_content_id(info) {
            return self
                .content
                .store
                .borrow_mut()
                .get_object(id, ObjectType::Data);
        }
        self.get_file_by_name(&info.name)
    }

    fn get_file_by_name(&mut self, name: &str) -> anyhow::Result<Bytes> {
        let tree = self.content.tree_object()?;
        let mut entry = DirectoryEntry::default();
        let mut rest = &tree[..];
        while entry.parse(&mut rest) {
            if entry.name() == name && entry.entry_type() == EntryType::File {
                return self
                    .content
                    .store
                    .borrow_mut()
                    .get_object(entry.id(), ObjectType::Data);
            }
        }
        Err(StoreError::FileNotFound(self.content.child_name(name)).into())
    }

    fn create_file(&mut self, name: &str, content: &[u8]) -> anyhow::Result<Info> {
        let id = self
            .content
            .store
            .borrow_mut()
            .add_object(ObjectType::Data, content)?;
        self.content
            .update_directory_entry(name, id, EntryType::File, true)?;

        let mut info = Info::new(name.to_string(), EntryType::File);
        info.content_id = Some(id.to_hex());
        info.size = Some(content.len() as u64);
        Ok(info)
    }

    fn remove_file(&mut self, name: &str) -> anyhow::Result<()> {
        self.content.remove_directory_entry(name, EntryType::File)
    }

    fn copy_file(
        &mut self,
        source: &dyn handler::DirectoryHandler,
        source_info: &Info,
        name: &str,
    ) -> anyhow::Result<Option<Info>> {
        // The shortcut only works within one object store.
        let Some(source) = source.as_any().downcast_ref::<DirectoryHandler>() else {
            return Ok(None);
        };
        if !Rc::ptr_eq(&self.content.store, &source.content.store) {
            return Ok(None);
        }
        if source_info.entry_type != EntryType::File {
            return Ok(None);
        }
        let Some(id) = Self::valid_content_id(source_info) else {
            return Ok(None);
        };

        // All preconditions hold; the copy is one link plus a tree rewrite.
        self.content.store.borrow_mut().link_object(id);
        self.content
            .update_directory_entry(name, id, EntryType::File, true)?;

        let mut info = Info::new(name.to_string(), EntryType::File);
        info.content_id = source_info.content_id.clone();
        info.size = source_info.size;
        Ok(Some(info))
    }

    fn read_content(&mut self, callback: &mut dyn FnMut(Info)) -> anyhow::Result<()> {
        let tree = self.content.tree_object()?;
        let mut entry = DirectoryEntry::default();
        let mut rest = &tree[..];
        while entry.parse(&mut rest) {
            let mut info = Info::new(entry.name().to_string(), entry.entry_type());
            if entry.entry_type() == EntryType::File {
                info.size = Some(
                    self.content
                        .store
                        .borrow_mut()
                        .get_object_size(entry.id(), ObjectType::Data)?,
                );
            }
            if entry.entry_type() != EntryType::Directory {
                info.content_id = Some(entry.id().to_hex());
            }
            callback(info);
        }
        Ok(())
    }

    fn get_directory(&mut self, info: &Info) -> anyhow::Result<Box<dyn handler::DirectoryHandler>> {
        let tree = self.content.tree_object()?;
        let mut entry = DirectoryEntry::default();
        let mut rest = &tree[..];
        while entry.parse(&mut rest) {
            if entry.name() == info.name && entry.entry_type() == EntryType::Directory {
                return Ok(Box::new(DirectoryHandler::new(
                    self.content.store.clone(),
                    entry.id(),
                    entry.name(),
                    self.content.clone(),
                )));
            }
        }
        Err(StoreError::FileNotFound(self.content.child_name(&info.name)).into())
    }

    fn create_directory(&mut self, name: &str) -> anyhow::Result<Info> {
        let id = self
            .content
            .store
            .borrow_mut()
            .add_object(ObjectType::Tree, &[])?;
        self.content
            .update_directory_entry(name, id, EntryType::Directory, false)?;
        Ok(Info::new(name.to_string(), EntryType::Directory))
    }

    fn remove_directory(&mut self, name: &str) -> anyhow::Result<()> {
        self.content
            .remove_directory_entry(name, EntryType::Directory)
    }
}
