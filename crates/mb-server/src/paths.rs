//! Resolution of client-supplied `(basePathIndex, relativePath)` pairs.
//!
//! Every streaming and file route goes through [`LibraryRoots::resolve`]
//! before anything touches the filesystem contents, so a path can never
//! reach the prober or the transcoder unless it lives inside a configured
//! root.

use std::path::{Component, Path, PathBuf};

use mb_core::{Error, Result};

/// The configured media roots, addressed by index.
#[derive(Debug, Clone, Default)]
pub struct LibraryRoots {
    roots: Vec<PathBuf>,
}

impl LibraryRoots {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Join `relative` onto root `index` and confirm it stays inside.
    ///
    /// The check is lexical first (no `..`, no absolute components), then,
    /// when the target exists, repeated on canonical paths so a symlink
    /// cannot lead outside the root. Existing paths are returned in
    /// canonical form.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for an out-of-range index or empty path.
    /// - [`Error::PathTraversal`] if the path escapes its root.
    pub fn resolve(&self, index: usize, relative: &str) -> Result<PathBuf> {
        let root = self.roots.get(index).ok_or_else(|| {
            Error::Validation(format!(
                "basePathIndex {index} is out of range ({} configured)",
                self.roots.len()
            ))
        })?;

        if relative.trim().is_empty() {
            return Err(Error::Validation("relativePath must not be empty".into()));
        }

        let escapes = Path::new(relative).components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes {
            tracing::warn!(index, relative, "Rejected path outside library root");
            return Err(Error::path_traversal(relative));
        }

        let joined = root.join(relative);
        match joined.canonicalize() {
            Ok(canonical) => {
                let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());
                if !canonical.starts_with(&canonical_root) {
                    tracing::warn!(
                        index,
                        relative,
                        target = %canonical.display(),
                        "Rejected symlink outside library root"
                    );
                    return Err(Error::path_traversal(relative));
                }
                Ok(canonical)
            }
            // Missing files are reported by whoever opens them.
            Err(_) => Ok(joined),
        }
    }
}
