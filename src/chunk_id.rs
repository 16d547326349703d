use std::fmt;

/// A stable chunk identifier derived from (source_path, ordinal).
///
/// Rendered as `"{source_path}-{ordinal}"` and used as the record key in
/// every vector store, so re-indexing the same chunk overwrites it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    pub source_path: String,
    pub ordinal: usize,
}

impl ChunkId {
    pub fn new(source_path: &str, ordinal: usize) -> Self {
        Self {
            source_path: source_path.to_string(),
            ordinal,
        }
    }

    /// Split a rendered id back into its parts.
    ///
    /// The ordinal is everything after the last `-`, so source paths that
    /// contain dashes round-trip. Records carry their source path and
    /// ordinal in metadata, so only fixtures need this.
    #[cfg(test)]
    pub(crate) fn parse(id: &str) -> Option<Self> {
        let (source_path, ordinal) = id.rsplit_once('-')?;
        if source_path.is_empty() {
            return None;
        }
        Some(Self {
            source_path: source_path.to_string(),
            ordinal: ordinal.parse().ok()?,
        })
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source_path, self.ordinal)
    }
}
