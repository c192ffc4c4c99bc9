#![allow(dead_code)]

use planetfile::ca::object_id::ObjectId;
use planetfile::ca::object_store::ObjectStore;
use planetfile::ca::object_type::ObjectType;
use planetfile::ca::reference_updater::ReferenceUpdater;
use planetfile::handler::internal::InternalDirectoryHandler;
use planetfile::handler::{DirectoryHandler, EntryType};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Object store over a fresh in-memory directory
pub fn internal_store() -> (Rc<RefCell<ObjectStore>>, InternalDirectoryHandler) {
    let handler = InternalDirectoryHandler::new("root");
    let clone = InternalDirectoryHandler::with_root("root", handler.root());
    let store = ObjectStore::new(Box::new(handler)).unwrap();
    (Rc::new(RefCell::new(store)), clone)
}

/// Root-level updater that unlinks the previous root tree
///
/// Tests using this updater expire superseded states, like a live root
/// commit would; tests using `SnapshotUpdater` keep everything.
pub struct RootTreeUpdater {
    store: Rc<RefCell<ObjectStore>>,
    id: Cell<ObjectId>,
}

impl RootTreeUpdater {
    pub fn new(store: Rc<RefCell<ObjectStore>>, id: ObjectId) -> Self {
        RootTreeUpdater {
            store,
            id: Cell::new(id),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id.get()
    }
}

impl ReferenceUpdater for RootTreeUpdater {
    fn update_directory_reference(&self, _name: &str, new_id: ObjectId) -> anyhow::Result<()> {
        let old_id = self.id.replace(new_id);
        self.store
            .borrow_mut()
            .unlink_object(ObjectType::Tree, old_id)
    }
}

/// Count the object files below a physical "objects" directory
///
/// Iterates the first-byte subdirectories and counts their files.
pub fn count_objects(handler: &mut dyn DirectoryHandler) -> usize {
    let mut subdirectories = Vec::new();
    handler
        .read_content(&mut |info| {
            if info.entry_type == EntryType::Directory {
                subdirectories.push(info);
            }
        })
        .unwrap();

    let mut count = 0;
    for info in subdirectories {
        let mut subdirectory = handler.get_directory(&info).unwrap();
        subdirectory
            .read_content(&mut |info| {
                if info.entry_type == EntryType::File {
                    count += 1;
                }
            })
            .unwrap();
    }
    count
}
