//! Content-addressable object identifier (SHA-1 hash)
//!
//! Object ids are 20 raw bytes, shown as 40 lowercase hex digits. They
//! identify every object in the store (data, tree, commit) and are embedded
//! raw inside tree entries and pack files, so they are kept in binary form
//! rather than as hex strings.
//!
//! ## Nil
//!
//! `ObjectId::NIL` is the SHA-1 of empty input. It marks an empty object;
//! the store answers reads against it without touching storage.

use sha1::{Digest, Sha1};

/// Number of raw bytes in an object id
pub const OBJECT_ID_SIZE: usize = 20;

/// Number of hex digits in the printed form
pub const OBJECT_ID_HEX_LEN: usize = 2 * OBJECT_ID_SIZE;

/// Object identifier
///
/// Equality and ordering are byte-lexicographic over the 20 raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId([u8; OBJECT_ID_SIZE]);

impl ObjectId {
    /// Id of empty content (SHA-1 of zero bytes)
    pub const NIL: ObjectId = ObjectId([
        0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60, 0x18,
        0x90, 0xaf, 0xd8, 0x07, 0x09,
    ]);

    /// Construct from raw bytes
    pub fn from_bytes(bytes: [u8; OBJECT_ID_SIZE]) -> Self {
        ObjectId(bytes)
    }

    /// Parse a lowercase hex string
    ///
    /// Consumes up to 40 lowercase hex digits. Shorter input (or input cut
    /// off by an invalid character, including uppercase) leaves the tail
    /// zero-filled; excess input is ignored. Never fails: malformed input
    /// simply produces a different id than the one it was derived from,
    /// which callers detect by comparing against `to_hex()`.
    pub fn from_hex(s: &str) -> Self {
        let mut bytes = [0u8; OBJECT_ID_SIZE];
        let mut digits = s.bytes().map(hex_value);

        for byte in bytes.iter_mut() {
            let (Some(Some(hi)), Some(Some(lo))) = (digits.next(), digits.next()) else {
                break;
            };
            *byte = (hi << 4) | lo;
        }
        ObjectId(bytes)
    }

    /// Consume a hash digest
    ///
    /// Shorter digests are zero-padded, longer ones truncated to 20 bytes.
    pub fn from_digest(digest: &[u8]) -> Self {
        let mut bytes = [0u8; OBJECT_ID_SIZE];
        let n = digest.len().min(OBJECT_ID_SIZE);
        bytes[..n].copy_from_slice(&digest[..n]);
        ObjectId(bytes)
    }

    /// Hash a sequence of byte slices into an id
    pub fn hash_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha1::new();
        for part in parts {
            hasher.update(part);
        }
        Self::from_digest(&hasher.finalize())
    }

    /// Format as 40 lowercase hex digits
    pub fn to_hex(self) -> String {
        let mut hex = String::with_capacity(OBJECT_ID_HEX_LEN);
        for byte in self.0 {
            hex.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            hex.push(HEX_DIGITS[(byte & 0xf) as usize] as char);
        }
        hex
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_SIZE] {
        &self.0
    }

    /// First byte, which selects the loose-object subdirectory
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Value of one lowercase hex digit, or None
fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
