use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::LibraryError;

pub const DEFAULT_EXTENSIONS: &[&str] = &["flac"];

/// Enumerates audio files below a root directory.
///
/// Symlinked directories are followed, but a directory whose real path was
/// already visited in the same walk is skipped, which also breaks link
/// cycles. Every call to [`FolderWalker::walk`] starts a fresh walk.
#[derive(Clone, Debug)]
pub struct FolderWalker {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FolderWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_extensions(root, DEFAULT_EXTENSIONS.iter().copied())
    }

    pub fn with_extensions<I, S>(root: impl Into<PathBuf>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            root: root.into(),
            extensions,
        }
    }

    /// Checks the root and returns a lazy iterator over matching files in
    /// file-name order. A missing or unreadable root is `FolderUnavailable`;
    /// unreadable subdirectories are logged and skipped.
    pub fn walk(&self) -> Result<impl Iterator<Item = PathBuf> + '_, LibraryError> {
        if let Err(err) = fs::read_dir(&self.root) {
            return Err(LibraryError::FolderUnavailable {
                path: self.root.clone(),
                reason: err.to_string(),
            });
        }

        let mut visited: HashSet<PathBuf> = HashSet::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                match entry.path().canonicalize() {
                    Ok(real) => visited.insert(real),
                    Err(err) => {
                        warn!("Skipping {:?}: {}", entry.path(), err);
                        false
                    }
                }
            });

        Ok(walker.filter_map(move |entry| match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && self.is_audio_file(entry.path()) {
                    Some(entry.into_path())
                } else {
                    None
                }
            }
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                None
            }
        }))
    }

    pub fn is_audio_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}
