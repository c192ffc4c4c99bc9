//! Tree entry binary format
//!
//! A tree object is a concatenation of entries, each encoded as
//! `<mode> <name>\0<20-byte-id>`. Only two modes are produced by this
//! backend: `100644` for files and `40000` for directories. Entries with
//! any other mode are carried through verbatim and classified as unknown.
//!
//! ## Ordering
//!
//! Entries are sorted by name, with directory names compared as if they
//! were suffixed by `/`. That makes `a.b` (file) sort before `a`
//! (directory) before `a0` (file), which is what external tooling expects
//! of this format.

use crate::ca::object_id::{ObjectId, OBJECT_ID_SIZE};
use crate::handler::EntryType;

/// Mode string for plain files
pub const MODE_FILE: &str = "100644";

/// Mode string for directories
pub const MODE_DIRECTORY: &str = "40000";

/// Modes this backend understands
static KNOWN_MODES: phf::Map<&'static str, EntryType> = phf::phf_map! {
    "100644" => EntryType::File,
    "40000" => EntryType::Directory,
};

/// One entry of a tree object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    mode: String,
    name: String,
    id: ObjectId,
}

impl DirectoryEntry {
    /// Create an entry with the canonical mode for its type
    pub fn new(name: impl Into<String>, id: ObjectId, entry_type: EntryType) -> Self {
        let mode = match entry_type {
            EntryType::Directory => MODE_DIRECTORY,
            _ => MODE_FILE,
        };
        DirectoryEntry {
            mode: mode.to_string(),
            name: name.into(),
            id,
        }
    }

    /// Greedily parse one entry from the front of `input`
    ///
    /// On success the entry fields are replaced and `input` is advanced past
    /// the consumed bytes. Returns false at the end of input and on
    /// malformed input (bad mode, missing terminator, truncated id); callers
    /// treat either as end-of-tree.
    pub fn parse(&mut self, input: &mut &[u8]) -> bool {
        let bytes = *input;

        // <mode-octal-ascii> up to the separating blank
        let Some(mode_end) = bytes.iter().position(|&b| b == b' ') else {
            return false;
        };
        let mode = &bytes[..mode_end];
        if mode.is_empty() || !mode.iter().all(|b| (b'0'..=b'7').contains(b)) {
            return false;
        }

        // <name> up to the NUL terminator
        let rest = &bytes[mode_end + 1..];
        let Some(name_end) = rest.iter().position(|&b| b == b'\0') else {
            return false;
        };
        let Ok(name) = std::str::from_utf8(&rest[..name_end]) else {
            return false;
        };
        if name.is_empty() {
            return false;
        }

        // 20 raw id bytes
        let rest = &rest[name_end + 1..];
        if rest.len() < OBJECT_ID_SIZE {
            return false;
        }
        let mut id_bytes = [0u8; OBJECT_ID_SIZE];
        id_bytes.copy_from_slice(&rest[..OBJECT_ID_SIZE]);

        self.mode = String::from_utf8_lossy(mode).to_string();
        self.name = name.to_string();
        self.id = ObjectId::from_bytes(id_bytes);
        *input = &rest[OBJECT_ID_SIZE..];
        true
    }

    /// Append the canonical encoding of this entry
    pub fn store(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.mode.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        out.extend_from_slice(self.id.as_bytes());
    }

    /// Sort order check, directory-suffix aware
    ///
    /// True if this entry sorts strictly before `other` in the canonical
    /// tree order.
    pub fn is_before(&self, other: &DirectoryEntry) -> bool {
        self.sort_key().lt(other.sort_key())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Entry classification derived from the mode string
    pub fn entry_type(&self) -> EntryType {
        KNOWN_MODES
            .get(self.mode.as_str())
            .copied()
            .unwrap_or(EntryType::Unknown)
    }

    /// Bytes the entry sorts by: the name, plus `/` for directories
    fn sort_key(&self) -> impl Iterator<Item = u8> + '_ {
        let suffix: &[u8] = match self.entry_type() {
            EntryType::Directory => b"/",
            _ => b"",
        };
        self.name.bytes().chain(suffix.iter().copied())
    }
}

impl Default for DirectoryEntry {
    fn default() -> Self {
        DirectoryEntry::new(String::new(), ObjectId::NIL, EntryType::File)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn entry(name: &str, entry_type: EntryType) -> DirectoryEntry {
        DirectoryEntry::new(name, ObjectId::NIL, entry_type)
    }

    #[test]
    fn test_store_parse_round_trip() {
        let id = ObjectId::from_hex("f3a34851d44d6b97c90fbb99dd3d18c261b9a237");
        let original = DirectoryEntry::new("f", id, EntryType::File);

        let mut bytes = Vec::new();
        original.store(&mut bytes);

        let mut parsed = DirectoryEntry::default();
        let mut input = bytes.as_slice();
        assert!(parsed.parse(&mut input));
        assert!(input.is_empty());
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_stops_at_end_of_input() {
        let mut entry = DirectoryEntry::default();
        let mut input: &[u8] = b"";
        assert!(!entry.parse(&mut input));
    }

    #[rstest]
    #[case::bad_mode(b"abc f\x00".as_slice())]
    #[case::missing_name_terminator(b"100644 f".as_slice())]
    #[case::empty_name(b"100644 \x00aaaaaaaaaaaaaaaaaaaa".as_slice())]
    #[case::truncated_id(b"100644 f\x00shortid".as_slice())]
    fn test_parse_rejects_malformed_input(#[case] bytes: &[u8]) {
        let mut entry = DirectoryEntry::default();
        let mut input = bytes;
        assert!(!entry.parse(&mut input));
    }

    #[test]
    fn test_unknown_mode_is_preserved_verbatim() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"120000 link\x00");
        bytes.extend_from_slice(ObjectId::NIL.as_bytes());

        let mut entry = DirectoryEntry::default();
        let mut input = bytes.as_slice();
        assert!(entry.parse(&mut input));
        assert_eq!(entry.entry_type(), EntryType::Unknown);

        let mut stored = Vec::new();
        entry.store(&mut stored);
        assert_eq!(stored, bytes);
    }

    #[test]
    fn test_directory_names_sort_with_slash_suffix() {
        let file_a_b = entry("a.b", EntryType::File);
        let dir_a = entry("a", EntryType::Directory);
        let file_a0 = entry("a0", EntryType::File);

        assert!(file_a_b.is_before(&dir_a));
        assert!(dir_a.is_before(&file_a0));
        assert!(file_a_b.is_before(&file_a0));
        assert!(!dir_a.is_before(&file_a_b));
    }

    #[test]
    fn test_same_name_file_and_directory_are_ordered() {
        let file = entry("a", EntryType::File);
        let dir = entry("a", EntryType::Directory);
        assert!(file.is_before(&dir));
        assert!(!dir.is_before(&file));
    }
}
