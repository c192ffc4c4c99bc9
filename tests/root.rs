//! Root binding and on-disk layout

mod common;

use assert_fs::prelude::*;
use common::count_objects;
use planetfile::ca::object_id::ObjectId;
use planetfile::ca::root::Root;
use planetfile::handler::filesystem::FileSystemHandler;
use planetfile::handler::internal::InternalDirectoryHandler;
use planetfile::handler::{DirectoryHandler, EntryType, Info};
use pretty_assertions::assert_eq;

fn dir_info(name: &str) -> Info {
    Info::new(name.to_string(), EntryType::Directory)
}

#[test]
fn test_disk_layout() {
    let dir = assert_fs::TempDir::new().unwrap();

    {
        let handler = FileSystemHandler::open_root(dir.path()).unwrap();
        let root = Root::new(Box::new(handler)).unwrap();
        root.initialize().unwrap();

        let mut root_handler = root.create_root_handler().unwrap();
        root_handler.create_file("f", b"text").unwrap();
    }

    // Master reference: 40 hex digits plus newline
    let master = std::fs::read_to_string(dir.path().join("refs/heads/master")).unwrap();
    assert_eq!(master.len(), 41);
    assert!(master.ends_with('\n'));
    let master_id = ObjectId::from_hex(master.trim());
    assert_eq!(master_id.to_hex(), master.trim());

    // The commit is a loose object under objects/xx/yyy...
    let hex = master_id.to_hex();
    dir.child(format!("objects/{}/{}", &hex[..2], &hex[2..]))
        .assert(predicates::path::is_file());

    // The "text" blob sits under its well-known id
    dir.child("objects/f3/a34851d44d6b97c90fbb99dd3d18c261b9a237")
        .assert(predicates::path::is_file());
}

#[test]
fn test_reopen_reads_back_content() {
    let dir = assert_fs::TempDir::new().unwrap();

    {
        let handler = FileSystemHandler::open_root(dir.path()).unwrap();
        let root = Root::new(Box::new(handler)).unwrap();
        let mut root_handler = root.create_root_handler().unwrap();
        let sub_info = root_handler.create_directory("game1").unwrap();
        let mut sub = root_handler.get_directory(&sub_info).unwrap();
        sub.create_file("player1.trn", b"turn data").unwrap();
    }

    let handler = FileSystemHandler::open_root(dir.path()).unwrap();
    let root = Root::new(Box::new(handler)).unwrap();
    assert_ne!(root.master_commit_id(), ObjectId::NIL);

    let mut root_handler = root.create_root_handler().unwrap();
    let mut sub = root_handler.get_directory(&dir_info("game1")).unwrap();
    assert_eq!(&sub.get_file_by_name("player1.trn").unwrap()[..], b"turn data");
}

#[test]
fn test_mutation_publishes_and_unlinks_previous_state() {
    let physical = InternalDirectoryHandler::new("root");
    let root = Root::new(Box::new(InternalDirectoryHandler::with_root(
        "root",
        physical.root(),
    )))
    .unwrap();

    let mut handler = root.create_root_handler().unwrap();
    handler.create_file("f", b"one").unwrap();
    let first_master = root.master_commit_id();
    assert_ne!(first_master, ObjectId::NIL);

    handler.create_file("f", b"two").unwrap();
    let second_master = root.master_commit_id();
    assert_ne!(second_master, first_master);

    // The superseded commit, tree and blob are gone: only the current
    // commit, root tree and blob remain.
    let mut objects = InternalDirectoryHandler::with_root("root", physical.root())
        .get_directory(&dir_info("objects"))
        .unwrap();
    assert_eq!(count_objects(objects.as_mut()), 3);
}

#[test]
fn test_empty_sequence_leaves_store_clean() {
    let physical = InternalDirectoryHandler::new("root");
    let root = Root::new(Box::new(InternalDirectoryHandler::with_root(
        "root",
        physical.root(),
    )))
    .unwrap();

    let mut handler = root.create_root_handler().unwrap();
    handler.create_file("a", b"alpha").unwrap();
    handler.create_file("b", b"beta").unwrap();
    handler.remove_file("a").unwrap();
    handler.remove_file("b").unwrap();

    // All intermediate states were cancelled: the store holds the current
    // commit and the empty root tree, nothing else.
    let mut objects = InternalDirectoryHandler::with_root("root", physical.root())
        .get_directory(&dir_info("objects"))
        .unwrap();
    assert_eq!(count_objects(objects.as_mut()), 2);
}

#[test]
fn test_uninitialized_root_reads_as_empty() {
    let physical = InternalDirectoryHandler::new("root");
    let root = Root::new(Box::new(physical)).unwrap();
    assert_eq!(root.master_commit_id(), ObjectId::NIL);

    let mut handler = root.create_root_handler().unwrap();
    let mut entries = Vec::new();
    handler.read_content(&mut |info| entries.push(info)).unwrap();
    assert!(entries.is_empty());
}

#[test]
fn test_corrupt_master_file_is_rejected() {
    let physical = InternalDirectoryHandler::new("root");
    {
        let mut setup = InternalDirectoryHandler::with_root("root", physical.root());
        let refs = setup.create_directory("refs").unwrap();
        let mut refs = setup.get_directory(&refs).unwrap();
        let heads = refs.create_directory("heads").unwrap();
        let mut heads = refs.get_directory(&heads).unwrap();
        heads.create_file("master", b"not a commit id\n").unwrap();
    }

    assert!(Root::new(Box::new(physical)).is_err());
}
