//! Root of a content-addressable store
//!
//! Binds a physical directory layout to an object store and the persisted
//! "master" commit:
//!
//! - `objects/` holds the loose objects (and, read-only, `objects/pack/`);
//! - `refs/heads/master` holds the 40-hex-digit id of the current root
//!   commit, followed by a newline.
//!
//! The master pointer is rewritten only after the objects of a new state
//! exist, so a crash in between leaves garbage objects (reclaimed by the
//! garbage collector) but never a dangling pointer.

use crate::ca::commit::Commit;
use crate::ca::directory_handler::DirectoryHandler as CaDirectoryHandler;
use crate::ca::object_id::ObjectId;
use crate::ca::object_store::ObjectStore;
use crate::ca::object_type::ObjectType;
use crate::ca::reference_updater::ReferenceUpdater;
use crate::error::StoreError;
use crate::handler::{DirectoryHandler, EntryType, Info};
use anyhow::Context;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// File holding the master commit id, inside `refs/heads/`
const MASTER_FILE_NAME: &str = "master";

/// Pattern for the content of the master file
const MASTER_REGEX: &str = r"^([0-9a-f]{40})\s*$";

/// Shared state behind a `Root` and its live updaters
struct RootState {
    store: Rc<RefCell<ObjectStore>>,
    /// Handler for the physical `refs/heads` directory
    heads: RefCell<Box<dyn DirectoryHandler>>,
    master: Cell<ObjectId>,
}

impl RootState {
    /// Publish a new root tree
    ///
    /// Stores a commit for the tree, writes the master pointer, then
    /// unlinks the previous commit (and with it the superseded state).
    fn publish(&self, new_tree_id: ObjectId) -> anyhow::Result<()> {
        let mut commit_bytes = Vec::new();
        Commit::new(new_tree_id).store(&mut commit_bytes);
        let new_commit = self
            .store
            .borrow_mut()
            .add_object(ObjectType::Commit, &commit_bytes)?;

        self.heads
            .borrow_mut()
            .create_file(MASTER_FILE_NAME, format!("{new_commit}\n").as_bytes())
            .context("unable to update master reference")?;

        let old_commit = self.master.replace(new_commit);
        self.store
            .borrow_mut()
            .unlink_object(ObjectType::Commit, old_commit)?;
        Ok(())
    }
}

/// Root-level reference updater for live mutation
///
/// Receives the new root tree id at the end of every update chain and
/// turns it into a published commit. Without the unlink of the previous
/// commit performed here, every update would leak its superseded state.
struct RootUpdater {
    state: Rc<RootState>,
}

impl ReferenceUpdater for RootUpdater {
    fn update_directory_reference(&self, _name: &str, new_id: ObjectId) -> anyhow::Result<()> {
        self.state.publish(new_id)
    }
}

/// A content-addressable store bound to its physical directory
pub struct Root {
    state: Rc<RootState>,
}

impl Root {
    /// Bind to the given physical root directory
    ///
    /// Creates the `objects` and `refs/heads` directories as needed. The
    /// master file itself is created lazily, on the first published commit.
    pub fn new(mut handler: Box<dyn DirectoryHandler>) -> anyhow::Result<Self> {
        let objects = open_or_create_directory(handler.as_mut(), "objects")?;
        let mut refs = open_or_create_directory(handler.as_mut(), "refs")?;
        let mut heads = open_or_create_directory(refs.as_mut(), "heads")?;

        let master = read_master_file(heads.as_mut())?;
        let store = ObjectStore::new(objects)?;

        Ok(Root {
            state: Rc::new(RootState {
                store: Rc::new(RefCell::new(store)),
                heads: RefCell::new(heads),
                master: Cell::new(master),
            }),
        })
    }

    /// The object store backing this root
    pub fn object_store(&self) -> Rc<RefCell<ObjectStore>> {
        self.state.store.clone()
    }

    /// Current master commit id; `NIL` if nothing was ever committed
    pub fn master_commit_id(&self) -> ObjectId {
        self.state.master.get()
    }

    /// Publish an initial empty state, if none exists yet
    ///
    /// Returns true when a commit was created, false when the root was
    /// already initialized.
    pub fn initialize(&self) -> anyhow::Result<bool> {
        if self.state.master.get() != ObjectId::NIL {
            return Ok(false);
        }
        let tree_id = self
            .state
            .store
            .borrow_mut()
            .add_object(ObjectType::Tree, &[])?;
        self.state.publish(tree_id)?;
        Ok(true)
    }

    /// Create a directory handler for the current root tree
    ///
    /// Every mutation through the handler (or its subdirectory handlers)
    /// ends in a new master commit replacing the previous one.
    pub fn create_root_handler(&self) -> anyhow::Result<CaDirectoryHandler> {
        let tree_id = self
            .state
            .store
            .borrow_mut()
            .commit_tree_id(self.state.master.get())?;
        Ok(CaDirectoryHandler::new(
            self.state.store.clone(),
            tree_id,
            "(root)",
            Rc::new(RootUpdater {
                state: self.state.clone(),
            }),
        ))
    }
}

/// Open a subdirectory, creating it if absent
fn open_or_create_directory(
    handler: &mut dyn DirectoryHandler,
    name: &str,
) -> anyhow::Result<Box<dyn DirectoryHandler>> {
    let info = Info::new(name.to_string(), EntryType::Directory);
    match handler.get_directory(&info) {
        Ok(directory) => Ok(directory),
        Err(err) if matches!(err.downcast_ref::<StoreError>(), Some(StoreError::FileNotFound(_))) => {
            let info = handler.create_directory(name)?;
            handler.get_directory(&info)
        }
        Err(err) => Err(err),
    }
}

/// Read and validate the master file; absent means never committed
fn read_master_file(heads: &mut dyn DirectoryHandler) -> anyhow::Result<ObjectId> {
    let content = match heads.get_file_by_name(MASTER_FILE_NAME) {
        Ok(content) => content,
        Err(err) if matches!(err.downcast_ref::<StoreError>(), Some(StoreError::FileNotFound(_))) => {
            return Ok(ObjectId::NIL);
        }
        Err(err) => return Err(err),
    };

    let content = std::str::from_utf8(&content).context("invalid master reference")?;
    let captures = regex::Regex::new(MASTER_REGEX)?
        .captures(content)
        .context("invalid master reference")?;
    Ok(ObjectId::from_hex(&captures[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::internal::InternalDirectoryHandler;
    use pretty_assertions::assert_eq;

    fn new_root() -> (Root, InternalDirectoryHandler) {
        let physical = InternalDirectoryHandler::new("root");
        let clone = InternalDirectoryHandler::with_root("root", physical.root());
        (Root::new(Box::new(physical)).unwrap(), clone)
    }

    #[test]
    fn test_new_root_has_nil_master() {
        let (root, _) = new_root();
        assert_eq!(root.master_commit_id(), ObjectId::NIL);
    }

    #[test]
    fn test_initialize_writes_master_file() {
        let (root, physical) = new_root();
        assert!(root.initialize().unwrap());
        assert!(!root.initialize().unwrap());

        // The master file must contain the hex id plus newline.
        let mut physical = physical;
        let refs_info = Info::new("refs".to_string(), EntryType::Directory);
        let heads_info = Info::new("heads".to_string(), EntryType::Directory);
        let mut heads = physical
            .get_directory(&refs_info)
            .unwrap()
            .get_directory(&heads_info)
            .unwrap();
        let content = heads.get_file_by_name("master").unwrap();
        assert_eq!(
            content,
            format!("{}\n", root.master_commit_id()).as_bytes()
        );
    }

    #[test]
    fn test_master_survives_rebinding() {
        let (root, physical) = new_root();
        root.initialize().unwrap();
        let master = root.master_commit_id();
        drop(root);

        let reopened = Root::new(Box::new(physical)).unwrap();
        assert_eq!(reopened.master_commit_id(), master);
    }
}
