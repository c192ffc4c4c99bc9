//! Object types of the content-addressable store

/// Type of a stored object
///
/// The on-disk keyword (`blob`, `tree`, `commit`) is part of the framed
/// payload and therefore of the object id: the same bytes stored under two
/// types yield two different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Uninterpreted file content ("blob")
    Data,
    /// Directory listing ("tree"), a sequence of `DirectoryEntry` records
    Tree,
    /// Root pointer ("commit"), pointing at one tree
    Commit,
}

impl ObjectType {
    /// On-disk framing keyword
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Data => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ObjectType {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> anyhow::Result<Self> {
        match value {
            "blob" => Ok(ObjectType::Data),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            _ => Err(anyhow::anyhow!("Invalid object type: {}", value)),
        }
    }
}
