//! Disk-backed directory handler
//!
//! Maps the `DirectoryHandler` contract onto a plain directory tree using
//! `std::fs`. Files are read whole into `Bytes`; writes go to a temporary
//! sibling first and are renamed into place, so a reader observes either
//! the old content or the new content, never a torn file.
//!
//! ## Root lock
//!
//! `open_root` takes an exclusive advisory lock on a `lock` file inside the
//! root. The storage core assumes exclusive access to its tree; the lock
//! keeps a second server process from binding the same store. Handlers for
//! subdirectories share the lock, so it is held as long as any handler of
//! the tree is alive.

use crate::error::StoreError;
use crate::handler::{DirectoryHandler, EntryType, Info};
use anyhow::Context;
use bytes::Bytes;
use fake::rand;
use file_guard::{FileGuard, Lock};
use std::any::Any;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Name of the advisory lock file in the root directory
const LOCK_FILE_NAME: &str = "lock";

/// Disk implementation of `DirectoryHandler`
pub struct FileSystemHandler {
    /// Directory this handler operates on
    path: Box<Path>,
    /// Root advisory lock, shared with all handlers of the same tree
    _lock: Option<Rc<FileGuard<Box<File>>>>,
}

impl FileSystemHandler {
    /// Open a directory without locking
    ///
    /// Use `open_root` for the top of a storage tree; this constructor is
    /// for transient access (tests, maintenance tools operating read-only).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSystemHandler {
            path: path.into().into_boxed_path(),
            _lock: None,
        }
    }

    /// Open the root of a storage tree, taking the root advisory lock
    ///
    /// Fails if another process already holds the lock.
    pub fn open_root(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path: PathBuf = path.into();
        let lock_path = path.join(LOCK_FILE_NAME);
        let lock_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("unable to open lock file {}", lock_path.display()))?;
        let lock = file_guard::try_lock(Box::new(lock_file), Lock::Exclusive, 0, 1)
            .with_context(|| format!("storage root {} is locked", path.display()))?;

        Ok(FileSystemHandler {
            path: path.into_boxed_path(),
            _lock: Some(Rc::new(lock)),
        })
    }

    fn child_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn child_name(&self, name: &str) -> String {
        self.child_path(name).display().to_string()
    }

    fn generate_temp_name() -> String {
        format!("tmp-obj-{}", rand::random::<u32>())
    }
}

impl DirectoryHandler for FileSystemHandler {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_file_by_name(&mut self, name: &str) -> anyhow::Result<Bytes> {
        let path = self.child_path(name);
        if !path.is_file() {
            return Err(StoreError::FileNotFound(self.child_name(name)).into());
        }
        let content = std::fs::read(&path)
            .with_context(|| format!("unable to read file {}", path.display()))?;
        Ok(content.into())
    }

    fn create_file(&mut self, name: &str, content: &[u8]) -> anyhow::Result<Info> {
        let path = self.child_path(name);
        if path.is_dir() {
            return Err(StoreError::AlreadyExists(self.child_name(name)).into());
        }

        // Write a temporary file, then rename it over the target to make the
        // replacement atomic.
        let temp_path = self.path.join(Self::generate_temp_name());
        std::fs::write(&temp_path, content)
            .with_context(|| format!("unable to write file {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("unable to rename file to {}", path.display()))?;

        let mut info = Info::new(name.to_string(), EntryType::File);
        info.size = Some(content.len() as u64);
        Ok(info)
    }

    fn remove_file(&mut self, name: &str) -> anyhow::Result<()> {
        let path = self.child_path(name);
        if path.is_dir() {
            return Err(StoreError::TypeMismatch(self.child_name(name)).into());
        }
        if !path.is_file() {
            return Err(StoreError::FileNotFound(self.child_name(name)).into());
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("unable to remove file {}", path.display()))
    }

    fn read_content(&mut self, callback: &mut dyn FnMut(Info)) -> anyhow::Result<()> {
        let entries = std::fs::read_dir(self.path.as_ref())
            .with_context(|| format!("unable to read directory {}", self.path.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == LOCK_FILE_NAME {
                continue;
            }

            let file_type = entry.file_type()?;
            let info = if file_type.is_file() {
                let mut info = Info::new(name, EntryType::File);
                info.size = Some(entry.metadata()?.len());
                info
            } else if file_type.is_dir() {
                Info::new(name, EntryType::Directory)
            } else {
                Info::new(name, EntryType::Unknown)
            };
            callback(info);
        }
        Ok(())
    }

    fn get_directory(&mut self, info: &Info) -> anyhow::Result<Box<dyn DirectoryHandler>> {
        let path = self.child_path(&info.name);
        if path.is_file() {
            return Err(StoreError::TypeMismatch(self.child_name(&info.name)).into());
        }
        if !path.is_dir() {
            return Err(StoreError::FileNotFound(self.child_name(&info.name)).into());
        }
        Ok(Box::new(FileSystemHandler {
            path: path.into_boxed_path(),
            _lock: self._lock.clone(),
        }))
    }

    fn create_directory(&mut self, name: &str) -> anyhow::Result<Info> {
        let path = self.child_path(name);
        if path.exists() {
            return Err(StoreError::AlreadyExists(self.child_name(name)).into());
        }
        std::fs::create_dir(&path)
            .with_context(|| format!("unable to create directory {}", path.display()))?;
        Ok(Info::new(name.to_string(), EntryType::Directory))
    }

    fn remove_directory(&mut self, name: &str) -> anyhow::Result<()> {
        let path = self.child_path(name);
        if path.is_file() {
            return Err(StoreError::TypeMismatch(self.child_name(name)).into());
        }
        if !path.is_dir() {
            return Err(StoreError::FileNotFound(self.child_name(name)).into());
        }
        if path.read_dir()?.next().is_some() {
            return Err(StoreError::DirNotEmpty(self.child_name(name)).into());
        }
        std::fs::remove_dir(&path)
            .with_context(|| format!("unable to remove directory {}", path.display()))
    }
}
