//! Manifest discovery.
//!
//! A module is a directory containing `module.toml` (preferred) or
//! `module.json`. Discovery looks at the root itself and its immediate
//! subdirectories.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Preferred manifest file name.
pub const MANIFEST_TOML: &str = "module.toml";
/// Alternative manifest file name.
pub const MANIFEST_JSON: &str = "module.json";

const MAX_DEPTH: usize = 2;

/// A manifest file found on disk. Not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestCandidate {
    /// Path to the manifest file.
    pub manifest_path: PathBuf,
    /// Directory containing it.
    pub module_dir: PathBuf,
}

/// A restartable, lazy walk over a modules root.
///
/// Every call to [`iter`](Self::iter) walks the filesystem again, so the
/// sequence reflects the directory as it is when iterated.
#[derive(Debug, Clone)]
pub struct ManifestDiscovery {
    root: PathBuf,
}

/// Start discovery under `root`.
#[must_use]
pub fn discover(root: impl Into<PathBuf>) -> ManifestDiscovery {
    ManifestDiscovery { root: root.into() }
}

impl ManifestDiscovery {
    /// The root being walked.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the root, yielding candidates in file-name order.
    ///
    /// Unreadable entries are logged and skipped. A `module.json` is
    /// skipped when a `module.toml` sits next to it.
    pub fn iter(&self) -> impl Iterator<Item = ManifestCandidate> + '_ {
        WalkDir::new(&self.root)
            .max_depth(MAX_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "Skipping unreadable entry");
                    None
                },
            })
            .filter_map(candidate)
    }
}

impl<'a> IntoIterator for &'a ManifestDiscovery {
    type Item = ManifestCandidate;
    type IntoIter = Box<dyn Iterator<Item = ManifestCandidate> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

fn candidate(entry: DirEntry) -> Option<ManifestCandidate> {
    if !entry.file_type().is_file() {
        return None;
    }
    let name = entry.file_name().to_str()?;
    let path = entry.path();
    let keep = match name {
        MANIFEST_TOML => true,
        MANIFEST_JSON => !path.with_file_name(MANIFEST_TOML).is_file(),
        _ => false,
    };
    if !keep {
        return None;
    }
    let module_dir = path.parent()?.to_path_buf();
    Some(ManifestCandidate {
        manifest_path: path.to_path_buf(),
        module_dir,
    })
}
