//! Reading synthetic object packs, including delta chains

use flate2::write::ZlibEncoder;
use planetfile::ca::index_file::IndexFile;
use planetfile::ca::object_id::ObjectId;
use planetfile::ca::pack_file::{ObjectRequester, PackFile};
use planetfile::error::StoreError;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::{Cursor, Write};

const BASE_CONTENT: &[u8] = b"hello world\n";
const RESULT_CONTENT: &[u8] = b"hello world\n v2\n";

/// Delta stream: copy the whole 12-byte base, then append " v2\n"
const DELTA_STREAM: &[u8] = &[12, 16, 0x90, 12, 0x04, b' ', b'v', b'2', b'\n'];

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Encode the leading type-and-size integer of a record
fn encode_type_and_size(object_type: u8, size: u64) -> Vec<u8> {
    let value = (size & 15) | (u64::from(object_type) << 4) | ((size >> 4) << 7);
    let mut bytes = Vec::new();
    let mut rest = value;
    loop {
        let byte = (rest & 0x7F) as u8;
        rest >>= 7;
        if rest > 0 {
            bytes.push(byte | 0x80);
        } else {
            bytes.push(byte);
            break;
        }
    }
    bytes
}

/// Encode a back-offset in the one-added-per-step format
fn encode_offset(offset: u64) -> Vec<u8> {
    let mut bytes = vec![(offset & 0x7F) as u8];
    let mut rest = offset >> 7;
    while rest > 0 {
        rest -= 1;
        bytes.push(0x80 | (rest & 0x7F) as u8);
        rest >>= 7;
    }
    bytes.reverse();
    bytes
}

/// Framed id of a blob, as external tooling would compute it
fn blob_id(content: &[u8]) -> ObjectId {
    ObjectId::hash_parts(&[format!("blob {}", content.len()).as_bytes(), b"\0", content])
}

struct PackBuilder {
    bytes: Vec<u8>,
    index: IndexFile,
}

impl PackBuilder {
    fn new(num_objects: u32) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"PACK");
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&num_objects.to_be_bytes());
        PackBuilder {
            bytes,
            index: IndexFile::new(),
        }
    }

    /// Append a record, register it in the index, return its offset
    fn add_record(&mut self, id: ObjectId, header: &[u8], payload: &[u8]) -> u64 {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(header);
        self.bytes.extend_from_slice(&zlib(payload));
        self.index.add_item(id, 0, offset);
        offset
    }

    /// Finish both files and open them as a `PackFile`
    fn build(mut self) -> PackFile<Cursor<Vec<u8>>> {
        let pack_id = ObjectId::hash_parts(&[&self.bytes]);
        self.bytes.extend_from_slice(pack_id.as_bytes());

        let mut idx_bytes = Vec::new();
        self.index.save(&mut idx_bytes, pack_id).unwrap();

        PackFile::from_readers(
            Cursor::new(self.bytes),
            &mut idx_bytes.as_slice(),
            "test.pack",
        )
        .unwrap()
    }
}

/// Requester for packs that must not need external objects
struct NoRequester;

impl ObjectRequester for NoRequester {
    fn get_object(&mut self, id: ObjectId, _max_level: usize) -> anyhow::Result<bytes::Bytes> {
        anyhow::bail!("unexpected external lookup for {id}");
    }
}

/// Requester serving objects from a map
#[derive(Default)]
struct MapRequester {
    objects: HashMap<ObjectId, Vec<u8>>,
}

impl ObjectRequester for MapRequester {
    fn get_object(&mut self, id: ObjectId, _max_level: usize) -> anyhow::Result<bytes::Bytes> {
        match self.objects.get(&id) {
            Some(content) => Ok(bytes::Bytes::from(content.clone())),
            None => Err(StoreError::MissingObject(id).into()),
        }
    }
}

#[test]
fn test_read_plain_object() {
    let mut builder = PackBuilder::new(1);
    let id = blob_id(BASE_CONTENT);
    builder.add_record(id, &encode_type_and_size(3, BASE_CONTENT.len() as u64), BASE_CONTENT);
    let mut pack = builder.build();

    let content = pack.get_object(id, &mut NoRequester, 4).unwrap().unwrap();
    assert_eq!(&content[..], BASE_CONTENT);
}

#[test]
fn test_unknown_id_yields_none() {
    let mut builder = PackBuilder::new(1);
    builder.add_record(
        blob_id(BASE_CONTENT),
        &encode_type_and_size(3, BASE_CONTENT.len() as u64),
        BASE_CONTENT,
    );
    let mut pack = builder.build();

    assert!(pack
        .get_object(blob_id(b"something else"), &mut NoRequester, 4)
        .unwrap()
        .is_none());
}

#[test]
fn test_read_offset_delta_object() {
    let base_id = blob_id(BASE_CONTENT);
    let delta_id = blob_id(RESULT_CONTENT);

    let mut builder = PackBuilder::new(2);
    let base_offset = builder.add_record(
        base_id,
        &encode_type_and_size(3, BASE_CONTENT.len() as u64),
        BASE_CONTENT,
    );

    let delta_offset = builder.bytes.len() as u64;
    let mut header = encode_type_and_size(6, DELTA_STREAM.len() as u64);
    header.extend_from_slice(&encode_offset(delta_offset - base_offset));
    builder.add_record(delta_id, &header, DELTA_STREAM);

    let mut pack = builder.build();
    let content = pack.get_object(delta_id, &mut NoRequester, 4).unwrap().unwrap();
    assert_eq!(&content[..], RESULT_CONTENT);

    // The base remains readable on its own
    let content = pack.get_object(base_id, &mut NoRequester, 4).unwrap().unwrap();
    assert_eq!(&content[..], BASE_CONTENT);
}

#[test]
fn test_read_reference_delta_object() {
    let base_id = blob_id(BASE_CONTENT);
    let delta_id = blob_id(RESULT_CONTENT);

    let mut builder = PackBuilder::new(1);
    let mut header = encode_type_and_size(7, DELTA_STREAM.len() as u64);
    header.extend_from_slice(base_id.as_bytes());
    builder.add_record(delta_id, &header, DELTA_STREAM);
    let mut pack = builder.build();

    let mut requester = MapRequester::default();
    requester.objects.insert(base_id, BASE_CONTENT.to_vec());

    let content = pack.get_object(delta_id, &mut requester, 4).unwrap().unwrap();
    assert_eq!(&content[..], RESULT_CONTENT);

    // An unknown base surfaces the requester's error
    let err = pack
        .get_object(delta_id, &mut MapRequester::default(), 4)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::MissingObject(_))
    ));
}

#[test]
fn test_delta_depth_is_bounded() {
    let base_id = blob_id(BASE_CONTENT);
    let delta_id = blob_id(RESULT_CONTENT);

    let mut builder = PackBuilder::new(2);
    let base_offset = builder.add_record(
        base_id,
        &encode_type_and_size(3, BASE_CONTENT.len() as u64),
        BASE_CONTENT,
    );
    let delta_offset = builder.bytes.len() as u64;
    let mut header = encode_type_and_size(6, DELTA_STREAM.len() as u64);
    header.extend_from_slice(&encode_offset(delta_offset - base_offset));
    builder.add_record(delta_id, &header, DELTA_STREAM);
    let mut pack = builder.build();

    // max_level 0 rejects any delta reference
    let err = pack.get_object(delta_id, &mut NoRequester, 0).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::BadReference(_))
    ));

    // One level suffices for a single delta step
    assert!(pack.get_object(delta_id, &mut NoRequester, 1).is_ok());
}

#[test]
fn test_index_and_pack_mismatch_is_rejected() {
    let content = BASE_CONTENT;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"PACK");
    bytes.extend_from_slice(&2u32.to_be_bytes());
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.extend_from_slice(&encode_type_and_size(3, content.len() as u64));
    bytes.extend_from_slice(&zlib(content));
    let pack_id = ObjectId::hash_parts(&[&bytes]);
    bytes.extend_from_slice(pack_id.as_bytes());

    // Index built for a different pack id
    let mut index = IndexFile::new();
    index.add_item(blob_id(content), 0, 12);
    let mut idx_bytes = Vec::new();
    index.save(&mut idx_bytes, blob_id(b"other pack")).unwrap();

    let err = PackFile::from_readers(
        Cursor::new(bytes),
        &mut idx_bytes.as_slice(),
        "test.pack",
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_bad_magic_is_rejected() {
    let mut index = IndexFile::new();
    let mut idx_bytes = Vec::new();
    index.save(&mut idx_bytes, blob_id(b"x")).unwrap();

    let err = PackFile::from_readers(
        Cursor::new(b"JUNKJUNKJUNKJUNKJUNKJUNKJUNKJUNKJUNK".to_vec()),
        &mut idx_bytes.as_slice(),
        "test.pack",
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_truncated_record_is_rejected() {
    let id = blob_id(BASE_CONTENT);
    let mut builder = PackBuilder::new(1);
    builder.add_record(id, &encode_type_and_size(3, BASE_CONTENT.len() as u64), BASE_CONTENT);

    // Announce a larger size than the zlib stream delivers
    let mut bytes = builder.bytes.clone();
    let record_start = 12;
    bytes.truncate(record_start);
    bytes.extend_from_slice(&encode_type_and_size(3, 1000));
    bytes.extend_from_slice(&zlib(BASE_CONTENT));
    let pack_id = ObjectId::hash_parts(&[&bytes]);
    bytes.extend_from_slice(pack_id.as_bytes());

    let mut index = IndexFile::new();
    index.add_item(id, 0, record_start as u64);
    let mut idx_bytes = Vec::new();
    index.save(&mut idx_bytes, pack_id).unwrap();

    let mut pack =
        PackFile::from_readers(Cursor::new(bytes), &mut idx_bytes.as_slice(), "test.pack")
            .unwrap();
    let err = pack.get_object(id, &mut NoRequester, 4).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::UnsupportedFormat(_))
    ));
}
