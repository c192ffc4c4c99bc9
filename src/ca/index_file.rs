//! Pack index files
//!
//! An index file (`*.idx`) is the lookup structure next to a pack file:
//! it maps object ids to byte offsets in the pack.
//!
//! ## File format (version 2)
//!
//! ```text
//! u32        magic        (= 0xff 't' 'O' 'c')
//! u32        version      (= 2)
//! u32[256]   fanout       (count of objects whose first id byte is <= i;
//!                          entry 255 is the object count)
//! id[n]      ids          (sorted lexicographically)
//! u32[n]     crc          (CRC-32 of the packed object records)
//! u32[n]     pos          (offset in the pack file; high bit set means
//!                          index into the overflow table)
//! u64[x]     overflow     (offsets above 2G)
//! id         pack id      (hash of the pack file)
//! id         index id     (hash of everything before this field)
//! ```
//!
//! All integers are big-endian.

use crate::ca::object_id::{ObjectId, OBJECT_ID_SIZE};
use crate::error::StoreError;
use anyhow::Context;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use derive_new::new;
use sha1::{Digest, Sha1};
use std::io::{Read, Write};

const HEADER_MAGIC: u32 = 0xFF74_4F63;
const HEADER_VERSION: u32 = 2;
const OVERFLOW_MARK: u32 = 0x8000_0000;

/// Maximum number of unsorted elements
///
/// Balances lookup cost between the sorted list (O(log n) access, O(n)
/// insert) and the unsorted buffer (O(n) access, O(1) insert).
const MAX_UNSORTED: usize = 1024;

/// One index record
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct IndexItem {
    /// Object id
    pub id: ObjectId,
    /// CRC-32 of the packed record
    pub crc: u32,
    /// Byte offset of the record in the pack file
    pub pos: u64,
}

/// In-memory form of a pack index
#[derive(Debug, Default)]
pub struct IndexFile {
    /// Records sorted by id; `fanout` always matches this list
    sorted_items: Vec<IndexItem>,
    /// Recently added records, merged into `sorted_items` on demand
    unsorted_items: Vec<IndexItem>,
    fanout: Vec<u32>,
}

impl IndexFile {
    pub fn new() -> Self {
        IndexFile {
            sorted_items: Vec::new(),
            unsorted_items: Vec::new(),
            fanout: vec![0; 256],
        }
    }

    /// Load an index file, replacing the current content
    ///
    /// Returns the pack id recorded in the file, for cross-checking against
    /// the pack. The trailing index id is not verified.
    pub fn load(&mut self, reader: &mut impl Read) -> anyhow::Result<ObjectId> {
        let magic = reader
            .read_u32::<BigEndian>()
            .context("unable to read index header")?;
        let version = reader
            .read_u32::<BigEndian>()
            .context("unable to read index header")?;
        if magic != HEADER_MAGIC || version != HEADER_VERSION {
            return Err(StoreError::UnsupportedFormat("pack index".to_string()).into());
        }

        let mut fanout = vec![0u32; 256];
        for slot in fanout.iter_mut() {
            *slot = reader.read_u32::<BigEndian>()?;
        }
        let num_objects = fanout[255] as usize;

        // Ids, sorted strictly increasing
        let mut items: Vec<IndexItem> = Vec::with_capacity(num_objects);
        for index in 0..num_objects {
            let mut bytes = [0u8; OBJECT_ID_SIZE];
            reader.read_exact(&mut bytes)?;
            let id = ObjectId::from_bytes(bytes);
            if index > 0 && items[index - 1].id >= id {
                return Err(
                    StoreError::UnsupportedFormat("pack index objects not sorted".to_string())
                        .into(),
                );
            }
            items.push(IndexItem::new(id, 0, 0));
        }

        for item in items.iter_mut() {
            item.crc = reader.read_u32::<BigEndian>()?;
        }

        // Positions; high-bit values index the overflow table
        let mut max_overflow = 0u32;
        for item in items.iter_mut() {
            let pos = reader.read_u32::<BigEndian>()?;
            item.pos = u64::from(pos);
            if pos & OVERFLOW_MARK != 0 {
                max_overflow = max_overflow.max((pos & !OVERFLOW_MARK) + 1);
            }
        }
        if max_overflow != 0 {
            let mut overflow = vec![0u64; max_overflow as usize];
            for slot in overflow.iter_mut() {
                *slot = reader.read_u64::<BigEndian>()?;
            }
            for item in items.iter_mut() {
                if item.pos as u32 & OVERFLOW_MARK != 0 {
                    item.pos = overflow[(item.pos as u32 & !OVERFLOW_MARK) as usize];
                }
            }
        }

        let mut pack_id_bytes = [0u8; OBJECT_ID_SIZE];
        reader.read_exact(&mut pack_id_bytes)?;
        // Ignored: trailing index file id

        self.sorted_items = items;
        self.unsorted_items.clear();
        self.fanout = fanout;
        Ok(ObjectId::from_bytes(pack_id_bytes))
    }

    /// Write the index in file format
    ///
    /// Pending additions are merged first. The index id is computed over
    /// everything written before it and appended last.
    pub fn save(&mut self, writer: &mut impl Write, pack_id: ObjectId) -> anyhow::Result<()> {
        self.merge();

        let mut sink = HashingWriter::new(writer);
        sink.write_u32::<BigEndian>(HEADER_MAGIC)?;
        sink.write_u32::<BigEndian>(HEADER_VERSION)?;
        for &count in &self.fanout {
            sink.write_u32::<BigEndian>(count)?;
        }

        for item in &self.sorted_items {
            sink.write_all(item.id.as_bytes())?;
        }
        for item in &self.sorted_items {
            sink.write_u32::<BigEndian>(item.crc)?;
        }

        let mut overflow = Vec::new();
        for item in &self.sorted_items {
            if item.pos > 0x7FFF_FFFF {
                sink.write_u32::<BigEndian>(OVERFLOW_MARK + overflow.len() as u32)?;
                overflow.push(item.pos);
            } else {
                sink.write_u32::<BigEndian>(item.pos as u32)?;
            }
        }
        for pos in overflow {
            sink.write_u64::<BigEndian>(pos)?;
        }

        sink.write_all(pack_id.as_bytes())?;

        let (writer, index_id) = sink.finish();
        writer.write_all(index_id.as_bytes())?;
        Ok(())
    }

    /// Look up one record by object id
    pub fn find_item(&self, id: ObjectId) -> Option<&IndexItem> {
        // The fan-out table narrows the search to one first-byte slice.
        let first = id.first_byte() as usize;
        let mut min = if first == 0 {
            0
        } else {
            self.fanout[first - 1] as usize
        };
        let mut max = self.fanout[first] as usize;

        // Binary intersection, then linear pinpoint
        while max - min > 5 {
            let mid = min + (max - min) / 2;
            if id < self.sorted_items[mid].id {
                max = mid;
            } else {
                min = mid;
            }
        }
        if let Some(item) = self.sorted_items[min..max].iter().find(|item| item.id == id) {
            return Some(item);
        }

        self.unsorted_items.iter().find(|item| item.id == id)
    }

    /// Add one record
    ///
    /// New records go to an unsorted buffer that is merged into the sorted
    /// list when it overflows.
    pub fn add_item(&mut self, id: ObjectId, crc: u32, pos: u64) {
        self.unsorted_items.push(IndexItem::new(id, crc, pos));
        if self.unsorted_items.len() >= MAX_UNSORTED {
            self.merge();
        }
    }

    /// Number of records
    pub fn num_objects(&self) -> usize {
        self.sorted_items.len() + self.unsorted_items.len()
    }

    /// Merge pending additions into the sorted list and rebuild the fan-out
    fn merge(&mut self) {
        if !self.unsorted_items.is_empty() {
            self.sorted_items.append(&mut self.unsorted_items);
            self.sorted_items.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        }

        let mut index = 0usize;
        for first in 0..256 {
            while index < self.sorted_items.len()
                && self.sorted_items[index].id.first_byte() == first as u8
            {
                index += 1;
            }
            self.fanout[first] = index as u32;
        }
    }
}

/// Writer that hashes everything passing through it
struct HashingWriter<'w, W: Write> {
    inner: &'w mut W,
    hasher: Sha1,
}

impl<'w, W: Write> HashingWriter<'w, W> {
    fn new(inner: &'w mut W) -> Self {
        HashingWriter {
            inner,
            hasher: Sha1::new(),
        }
    }

    fn finish(self) -> (&'w mut W, ObjectId) {
        let id = ObjectId::from_digest(&self.hasher.finalize());
        (self.inner, id)
    }
}

impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hasher.update(buf);
        self.inner.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        bytes[19] = n;
        ObjectId::from_bytes(bytes)
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut index = IndexFile::new();
        index.add_item(id(3), 333, 30);
        index.add_item(id(1), 111, 10);
        index.add_item(id(2), 222, 20);

        let pack_id = id(9);
        let mut bytes = Vec::new();
        index.save(&mut bytes, pack_id).unwrap();

        let mut loaded = IndexFile::new();
        let loaded_pack_id = loaded.load(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded_pack_id, pack_id);
        assert_eq!(loaded.num_objects(), 3);
        for (n, crc, pos) in [(1u8, 111, 10u64), (2, 222, 20), (3, 333, 30)] {
            let item = loaded.find_item(id(n)).unwrap();
            assert_eq!((item.crc, item.pos), (crc, pos));
        }
    }

    #[test]
    fn test_save_is_deterministic_and_self_hashed() {
        let mut index = IndexFile::new();
        index.add_item(id(1), 1, 1);

        let mut first = Vec::new();
        let mut second = Vec::new();
        index.save(&mut first, id(9)).unwrap();
        index.save(&mut second, id(9)).unwrap();
        assert_eq!(first, second);

        // The trailing 20 bytes are the hash of everything before them.
        let split = first.len() - OBJECT_ID_SIZE;
        let expected = ObjectId::hash_parts(&[&first[..split]]);
        assert_eq!(&first[split..], expected.as_bytes());
    }

    #[test]
    fn test_large_offsets_use_the_overflow_table() {
        let big = 0x1_2345_6789u64;
        let mut index = IndexFile::new();
        index.add_item(id(1), 1, big);
        index.add_item(id(2), 2, 7);

        let mut bytes = Vec::new();
        index.save(&mut bytes, id(9)).unwrap();

        let mut loaded = IndexFile::new();
        loaded.load(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded.find_item(id(1)).unwrap().pos, big);
        assert_eq!(loaded.find_item(id(2)).unwrap().pos, 7);
    }

    #[test]
    fn test_load_rejects_bad_magic() {
        let err = IndexFile::new()
            .load(&mut [0u8; 1032].as_slice())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_load_rejects_unsorted_ids() {
        let mut index = IndexFile::new();
        index.add_item(id(1), 1, 1);
        index.add_item(id(2), 2, 2);
        let mut bytes = Vec::new();
        index.save(&mut bytes, id(9)).unwrap();

        // Swap the two 20-byte ids in place.
        let ids_start = 8 + 256 * 4;
        let (first, second) = bytes[ids_start..ids_start + 40].split_at_mut(20);
        first.swap_with_slice(second);

        let err = IndexFile::new().load(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_find_item_in_unsorted_buffer() {
        let mut index = IndexFile::new();
        index.add_item(id(5), 55, 50);
        // Not merged yet; lookup must still succeed.
        assert_eq!(index.find_item(id(5)).unwrap().pos, 50);
        assert!(index.find_item(id(6)).is_none());
    }
}
