//! In-memory directory handler
//!
//! Keeps a whole directory tree in RAM. Used as the unit-test substrate for
//! the content-addressable backend, and usable as a RAM-backed store for
//! short-lived game directories.
//!
//! Directory nodes are shared (`Rc<RefCell<..>>`): handlers obtained via
//! `get_directory` see mutations made through other handlers of the same
//! tree, matching the behavior of the disk-backed handler.

use crate::error::StoreError;
use crate::handler::{DirectoryHandler, EntryType, Info};
use anyhow::Context;
use bytes::Bytes;
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// One node of the in-memory tree
#[derive(Debug, Clone)]
enum Node {
    File(Bytes),
    Directory(Rc<RefCell<Dir>>),
}

/// Directory content, shared between all handlers that reached it
#[derive(Debug, Default)]
pub struct Dir {
    entries: BTreeMap<String, Node>,
}

/// In-memory implementation of `DirectoryHandler`
#[derive(Debug)]
pub struct InternalDirectoryHandler {
    name: String,
    dir: Rc<RefCell<Dir>>,
}

impl InternalDirectoryHandler {
    /// Create a handler with a fresh, empty root directory
    pub fn new(name: impl Into<String>) -> Self {
        InternalDirectoryHandler {
            name: name.into(),
            dir: Rc::new(RefCell::new(Dir::default())),
        }
    }

    /// Create a handler over an existing directory node
    ///
    /// Lets tests bind several independent handlers to one tree, the way a
    /// restarted server re-opens its storage.
    pub fn with_root(name: impl Into<String>, dir: Rc<RefCell<Dir>>) -> Self {
        InternalDirectoryHandler {
            name: name.into(),
            dir,
        }
    }

    /// Get the shared root node
    pub fn root(&self) -> Rc<RefCell<Dir>> {
        self.dir.clone()
    }

    fn child_name(&self, name: &str) -> String {
        format!("{} in '{}'", name, self.name)
    }
}

impl DirectoryHandler for InternalDirectoryHandler {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_file_by_name(&mut self, name: &str) -> anyhow::Result<Bytes> {
        match self.dir.borrow().entries.get(name) {
            Some(Node::File(content)) => Ok(content.clone()),
            _ => Err(StoreError::FileNotFound(self.child_name(name)).into()),
        }
    }

    fn create_file(&mut self, name: &str, content: &[u8]) -> anyhow::Result<Info> {
        let mut dir = self.dir.borrow_mut();
        if let Some(Node::Directory(_)) = dir.entries.get(name) {
            return Err(StoreError::AlreadyExists(self.child_name(name)).into());
        }
        dir.entries
            .insert(name.to_string(), Node::File(Bytes::copy_from_slice(content)));

        let mut info = Info::new(name.to_string(), EntryType::File);
        info.size = Some(content.len() as u64);
        Ok(info)
    }

    fn remove_file(&mut self, name: &str) -> anyhow::Result<()> {
        let mut dir = self.dir.borrow_mut();
        match dir.entries.get(name) {
            Some(Node::File(_)) => {
                dir.entries.remove(name);
                Ok(())
            }
            Some(Node::Directory(_)) => Err(StoreError::TypeMismatch(self.child_name(name)).into()),
            None => Err(StoreError::FileNotFound(self.child_name(name)).into()),
        }
    }

    fn read_content(&mut self, callback: &mut dyn FnMut(Info)) -> anyhow::Result<()> {
        for (name, node) in &self.dir.borrow().entries {
            let info = match node {
                Node::File(content) => {
                    let mut info = Info::new(name.clone(), EntryType::File);
                    info.size = Some(content.len() as u64);
                    info
                }
                Node::Directory(_) => Info::new(name.clone(), EntryType::Directory),
            };
            callback(info);
        }
        Ok(())
    }

    fn get_directory(&mut self, info: &Info) -> anyhow::Result<Box<dyn DirectoryHandler>> {
        match self.dir.borrow().entries.get(&info.name) {
            Some(Node::Directory(child)) => Ok(Box::new(InternalDirectoryHandler {
                name: info.name.clone(),
                dir: child.clone(),
            })),
            Some(Node::File(_)) => {
                Err(StoreError::TypeMismatch(self.child_name(&info.name)).into())
            }
            None => Err(StoreError::FileNotFound(self.child_name(&info.name)).into()),
        }
    }

    fn create_directory(&mut self, name: &str) -> anyhow::Result<Info> {
        let mut dir = self.dir.borrow_mut();
        if dir.entries.contains_key(name) {
            return Err(StoreError::AlreadyExists(self.child_name(name)).into());
        }
        dir.entries.insert(
            name.to_string(),
            Node::Directory(Rc::new(RefCell::new(Dir::default()))),
        );
        Ok(Info::new(name.to_string(), EntryType::Directory))
    }

    fn remove_directory(&mut self, name: &str) -> anyhow::Result<()> {
        let mut dir = self.dir.borrow_mut();
        match dir.entries.get(name) {
            Some(Node::Directory(child)) => {
                if !child.borrow().entries.is_empty() {
                    return Err(StoreError::DirNotEmpty(self.child_name(name)).into());
                }
                dir.entries.remove(name);
                Ok(())
            }
            Some(Node::File(_)) => Err(StoreError::TypeMismatch(self.child_name(name)).into()),
            None => Err(StoreError::FileNotFound(self.child_name(name)).into()),
        }
    }
}

/// Copy one file between two arbitrary handlers
///
/// Tries the metadata shortcut first, then falls back to a read/write copy.
pub fn copy_file(
    target: &mut dyn DirectoryHandler,
    source: &mut dyn DirectoryHandler,
    source_info: &Info,
    name: &str,
) -> anyhow::Result<Info> {
    if let Some(info) = target.copy_file(&*source, source_info, name)? {
        return Ok(info);
    }
    let content = source.get_file(source_info)?;
    target
        .create_file(name, &content)
        .with_context(|| format!("unable to copy '{}'", source_info.name))
}
