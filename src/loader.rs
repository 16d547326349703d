use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;

use crate::error::{Error, Result};

/// A loaded source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    /// Path relative to the documents root, `/`-separated.
    pub source: String,
}

impl Document {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: DocumentMetadata {
                source: source.into(),
            },
        }
    }
}

/// A discovered document file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the documents root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

impl DiscoveredFile {
    /// The relative path with `/` separators on every platform.
    pub fn source(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Compile glob patterns (matched against relative paths) into one matcher.
pub fn build_matcher(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::ConfigValidation(format!(
                "invalid glob pattern '{pattern}': {e}"
            ))
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| {
        Error::ConfigValidation(format!("invalid glob patterns: {e}"))
    })
}

/// Recursively walk a directory and discover files matching `matcher`.
///
/// Skips hidden files/directories (names starting with `.`). Results are
/// sorted by relative path.
pub fn discover_files(
    root: &Path,
    matcher: &GlobSet,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, matcher, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    matcher: &GlobSet,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let relative_path =
            path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, matcher, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue; // broken symlink
            };
            if resolved.is_file() && matcher.is_match(&relative_path) {
                results.push(DiscoveredFile {
                    relative_path,
                    absolute_path: resolved,
                });
            }
        } else if file_type.is_file() && matcher.is_match(&relative_path) {
            results.push(DiscoveredFile {
                relative_path,
                absolute_path: path,
            });
        }
    }

    Ok(())
}

/// Discover and read every matching document under `root`.
///
/// Files are read in parallel; files that are not valid UTF-8 are skipped
/// with a warning. Output order follows [`discover_files`].
pub fn load_documents(root: &Path, patterns: &[String]) -> Result<Vec<Document>> {
    let matcher = build_matcher(patterns)?;
    let files = discover_files(root, &matcher)?;

    let loaded: Vec<Option<Document>> = files
        .par_iter()
        .map(|file| match std::fs::read_to_string(&file.absolute_path) {
            Ok(content) => Ok(Some(Document::new(file.source(), content))),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(
                    path = %file.absolute_path.display(),
                    "skipping file that is not valid UTF-8"
                );
                Ok(None)
            }
            Err(e) => Err(Error::Io(e)),
        })
        .collect::<Result<_>>()?;

    let documents: Vec<Document> = loaded.into_iter().flatten().collect();
    tracing::info!(
        root = %root.display(),
        count = documents.len(),
        "loaded documents"
    );
    Ok(documents)
}
