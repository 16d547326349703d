//! Local state of the persistent vector backend.
//!
//! docqa keeps a single file under its data directory:
//!
//! ```text
//! <data dir>/
//!   vectors.redb    one `records:<index>` table per vector index
//! ```
//!
//! The Pinecone and in-memory backends never touch this directory.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "DOCQA_DATA_DIR";

/// File name of the persistent vector database inside the data directory.
pub const VECTORS_DB_FILE: &str = "vectors.redb";

/// A resolved, existing data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Pick the directory for `vectors.redb`: `explicit` (the `--data-dir`
    /// flag) wins, then `DOCQA_DATA_DIR`, then `$XDG_DATA_HOME/docqa`.
    ///
    /// The directory is created if missing. The database file itself is
    /// left to the store, which opens it on initialize.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(DATA_DIR_ENV) {
                Some(val) if !val.is_empty() => PathBuf::from(val),
                _ => xdg::BaseDirectories::with_prefix("docqa")
                    .get_data_home()
                    .ok_or_else(|| {
                        Error::ConfigValidation(
                            "no home directory to place docqa data in".into(),
                        )
                    })?,
            },
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        tracing::debug!(root = %root.display(), "using data directory");

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vectors_db(&self) -> PathBuf {
        self.root.join(VECTORS_DB_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.vectors_db(), tmp.path().join("vectors.redb"));
        assert!(!dir.vectors_db().exists());
    }

    #[test]
    fn missing_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let dir = DataDir::resolve(Some(&nested)).unwrap();

        assert!(dir.root().is_dir());
    }

    #[test]
    fn unwritable_location_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let err = DataDir::resolve(Some(&file.join("sub"))).unwrap_err();
        assert!(matches!(err, Error::DataDir(_)));
    }
}
