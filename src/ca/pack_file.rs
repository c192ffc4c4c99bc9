//! Pack file reader
//!
//! A pack bundles many objects into one file (`*.pack`) with a companion
//! index (`*.idx`). Packs are read-only to this backend: they are produced
//! by external tooling and dropped into `objects/pack/`.
//!
//! ## File format (version 2)
//!
//! ```text
//! u32   magic       (= 'PACK')
//! u32   version     (= 2)
//! u32   numObjects
//! ...   object records
//! id    pack id     (hash of everything before this field)
//! ```
//!
//! Each record starts with a `VarInt` carrying the object type (bits 4..6)
//! and the inflated size (remaining bits). Plain records (`commit`, `tree`,
//! `blob`, `tag`) continue with a zlib stream of the payload. `OFS_DELTA`
//! records insert an offset integer pointing back to a base record in the
//! same pack; `REF_DELTA` records insert the 20-byte id of a base object
//! that may live anywhere. In both cases the zlib stream holds a delta
//! instruction stream evaluated against the base (see `expand_delta`).

use crate::ca::index_file::IndexFile;
use crate::ca::object_id::{ObjectId, OBJECT_ID_SIZE};
use crate::error::StoreError;
use anyhow::Context;
use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const PACK_MAGIC: u32 = 0x5041_434B;
const PACK_VERSION: u32 = 2;

const OBJ_COMMIT: u8 = 1;
const OBJ_TREE: u8 = 2;
const OBJ_BLOB: u8 = 3;
const OBJ_TAG: u8 = 4;
const OBJ_OFS_DELTA: u8 = 6;
const OBJ_REF_DELTA: u8 = 7;

/// Resolver for delta bases stored outside this pack
pub trait ObjectRequester {
    /// Get the payload of `id`
    ///
    /// Implementations that end up back in a `PackFile` must pass
    /// `max_level` on so the total delta depth stays bounded.
    fn get_object(&mut self, id: ObjectId, max_level: usize) -> anyhow::Result<Bytes>;
}

/// A pack/index pair, opened for object retrieval
///
/// Packs can be large, so records are streamed from the reader on demand
/// instead of mapping the whole file.
#[derive(Debug)]
pub struct PackFile<R: Read + Seek> {
    index: IndexFile,
    file: R,
    name: String,
}

impl PackFile<BufReader<File>> {
    /// Open `<base_name>.pack` and `<base_name>.idx` in `dir`
    pub fn open(dir: &Path, base_name: &str) -> anyhow::Result<Self> {
        let pack_path = dir.join(format!("{base_name}.pack"));
        let idx_path = dir.join(format!("{base_name}.idx"));

        let pack = File::open(&pack_path)
            .with_context(|| format!("unable to open pack file {}", pack_path.display()))?;
        let idx = File::open(&idx_path)
            .with_context(|| format!("unable to open index file {}", idx_path.display()))?;

        Self::from_readers(
            BufReader::new(pack),
            &mut BufReader::new(idx),
            pack_path.display().to_string(),
        )
    }
}

impl<R: Read + Seek> PackFile<R> {
    /// Open a pack from raw readers
    ///
    /// Validates the pack header and checks that the pack's trailing id
    /// matches the id recorded in the index.
    pub fn from_readers(
        mut pack: R,
        idx: &mut impl Read,
        name: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let name = name.into();

        let mut index = IndexFile::new();
        let index_pack_id = index
            .load(idx)
            .with_context(|| format!("unable to load index of {name}"))?;

        let magic = pack.read_u32::<BigEndian>()?;
        let version = pack.read_u32::<BigEndian>()?;
        let _num_objects = pack.read_u32::<BigEndian>()?;
        if magic != PACK_MAGIC || version != PACK_VERSION {
            return Err(StoreError::UnsupportedFormat(name).into());
        }

        // The pack must end in its own id, and that id must be the one the
        // index was built for.
        let len = pack.seek(SeekFrom::End(0))?;
        if len < 12 + OBJECT_ID_SIZE as u64 {
            return Err(StoreError::UnsupportedFormat(name).into());
        }
        pack.seek(SeekFrom::Start(len - OBJECT_ID_SIZE as u64))?;
        let mut trailer = [0u8; OBJECT_ID_SIZE];
        pack.read_exact(&mut trailer)?;
        if ObjectId::from_bytes(trailer) != index_pack_id {
            return Err(StoreError::UnsupportedFormat(format!(
                "{name}: index and pack file mismatch"
            ))
            .into());
        }

        Ok(PackFile {
            index,
            file: pack,
            name,
        })
    }

    /// Get an object from this pack
    ///
    /// Returns `None` if the id is not in the index. `requester` resolves
    /// delta bases stored outside this pack; `max_level` bounds the delta
    /// chain depth, with 0 rejecting any delta reference.
    pub fn get_object(
        &mut self,
        id: ObjectId,
        requester: &mut dyn ObjectRequester,
        max_level: usize,
    ) -> anyhow::Result<Option<Bytes>> {
        let Some(item) = self.index.find_item(id) else {
            return Ok(None);
        };
        let pos = item.pos;
        self.load_object(pos, requester, max_level).map(Some)
    }

    /// Number of objects in the companion index
    pub fn num_objects(&self) -> usize {
        self.index.num_objects()
    }

    /// Decode the object record at `pos`
    fn load_object(
        &mut self,
        pos: u64,
        requester: &mut dyn ObjectRequester,
        max_level: usize,
    ) -> anyhow::Result<Bytes> {
        self.file.seek(SeekFrom::Start(pos))?;

        let type_and_size = read_varint(&mut self.file)?;
        let object_type = ((type_and_size >> 4) & 7) as u8;
        let size = usize::try_from(((type_and_size >> 7) << 4) + (type_and_size & 15))
            .map_err(|_| StoreError::UnsupportedFormat(format!("{}: unsupported size", self.name)))?;

        match object_type {
            OBJ_COMMIT | OBJ_TREE | OBJ_BLOB | OBJ_TAG => self.inflate_record(size),

            OBJ_OFS_DELTA => {
                if max_level == 0 {
                    return Err(StoreError::BadReference(format!(
                        "{}: too many nested objects",
                        self.name
                    ))
                    .into());
                }
                let offset = read_offset(&mut self.file)?;
                if offset >= pos {
                    return Err(StoreError::BadReference(format!(
                        "{}: bad reference offset",
                        self.name
                    ))
                    .into());
                }

                let delta_pos = self.file.stream_position()?;
                let base = self.load_object(pos - offset, requester, max_level - 1)?;
                self.file.seek(SeekFrom::Start(delta_pos))?;

                let delta = self.inflate_record(size)?;
                expand_delta(&self.name, &base, &delta)
            }

            OBJ_REF_DELTA => {
                if max_level == 0 {
                    return Err(StoreError::BadReference(format!(
                        "{}: too many nested objects",
                        self.name
                    ))
                    .into());
                }
                let mut base_id = [0u8; OBJECT_ID_SIZE];
                self.file.read_exact(&mut base_id)?;

                let delta_pos = self.file.stream_position()?;
                let base = requester.get_object(ObjectId::from_bytes(base_id), max_level - 1)?;
                self.file.seek(SeekFrom::Start(delta_pos))?;

                let delta = self.inflate_record(size)?;
                expand_delta(&self.name, &base, &delta)
            }

            _ => Err(StoreError::UnsupportedFormat(format!(
                "{}: unsupported object encoding",
                self.name
            ))
            .into()),
        }
    }

    /// Inflate one zlib record at the current position
    ///
    /// The stream is self-terminating; the inflated length must match the
    /// size announced in the record header.
    fn inflate_record(&mut self, size: usize) -> anyhow::Result<Bytes> {
        let mut out = Vec::with_capacity(size);
        let mut decoder = ZlibDecoder::new(&mut self.file);
        decoder.read_to_end(&mut out).map_err(|_| {
            StoreError::UnsupportedFormat(format!("{}: unexpected compression end", self.name))
        })?;
        if out.len() != size {
            return Err(StoreError::UnsupportedFormat(format!(
                "{}: unexpected compression end",
                self.name
            ))
            .into());
        }
        Ok(Bytes::from(out))
    }
}

/// Read a 7-bit little-endian variable-length integer
fn read_varint(reader: &mut impl Read) -> anyhow::Result<u64> {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8()?;
        value |= u64::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

/// Read a back-offset integer
///
/// Big-endian 7-bit groups, with 1 added between steps so that multi-byte
/// encodings have no redundant forms.
fn read_offset(reader: &mut impl Read) -> anyhow::Result<u64> {
    let mut value = 0u64;
    loop {
        let byte = reader.read_u8()?;
        value = (value << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        value += 1;
    }
}

/// Evaluate a delta instruction stream against its base object
///
/// The stream carries two leading varints (base size, result size),
/// followed by instructions:
/// - a clear high bit appends the next 1..127 literal bytes;
/// - a set high bit copies from the base: the low 7 bits select up to 7
///   parameter bytes (LSB first), of which the first four form a
///   little-endian 32-bit base offset and the next three a little-endian
///   24-bit length, 0 meaning 65536.
///
/// The stream ends once the output reaches the announced result size.
pub fn expand_delta(name: &str, base: &[u8], delta: &[u8]) -> anyhow::Result<Bytes> {
    let mut rest = delta;

    let base_size = read_varint(&mut rest)
        .map_err(|_| truncated(name))?;
    if base_size != base.len() as u64 {
        return Err(StoreError::BadReference(format!(
            "{name}: reference object size mismatch"
        ))
        .into());
    }
    let result_size = usize::try_from(read_varint(&mut rest).map_err(|_| truncated(name))?)
        .map_err(|_| StoreError::UnsupportedFormat(format!("{name}: unsupported size")))?;

    let mut out = Vec::with_capacity(result_size);
    while out.len() < result_size {
        let Some((&opcode, tail)) = rest.split_first() else {
            return Err(truncated(name).into());
        };
        rest = tail;

        if opcode == 0 {
            return Err(
                StoreError::UnsupportedFormat(format!("{name}: invalid 0 opcode")).into(),
            );
        }

        if opcode & 0x80 != 0 {
            // Copy from the base object
            let mut parameters = [0u8; 7];
            for (bit, parameter) in parameters.iter_mut().enumerate() {
                if opcode & (1 << bit) != 0 {
                    let Some((&byte, tail)) = rest.split_first() else {
                        return Err(truncated(name).into());
                    };
                    *parameter = byte;
                    rest = tail;
                }
            }

            let offset = u32::from_le_bytes([
                parameters[0],
                parameters[1],
                parameters[2],
                parameters[3],
            ]) as usize;
            let mut length =
                u32::from_le_bytes([parameters[4], parameters[5], parameters[6], 0]) as usize;
            if length == 0 {
                length = 0x10000;
            }

            if offset > base.len() || length > base.len() - offset {
                return Err(StoreError::BadReference(format!(
                    "{name}: invalid copy instruction"
                ))
                .into());
            }
            out.extend_from_slice(&base[offset..offset + length]);
        } else {
            // Append literal bytes
            let length = opcode as usize;
            if rest.len() < length {
                return Err(truncated(name).into());
            }
            out.extend_from_slice(&rest[..length]);
            rest = &rest[length..];
        }
    }

    Ok(Bytes::from(out))
}

fn truncated(name: &str) -> StoreError {
    StoreError::UnsupportedFormat(format!("{name}: truncated delta stream"))
}
