use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Canonical project-relative identity of a source file.
///
/// Two handles are equal iff their normalized relative strings are equal.
/// The stored string always uses `/` separators, regardless of platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHandle(String);

impl FileHandle {
    /// Root a file at `source_root`. Absolute paths are stripped of the root
    /// prefix; relative paths are treated as already root-relative. Returns
    /// `None` for paths that escape the root.
    pub fn create(path: &Path, source_root: &Path) -> Option<FileHandle> {
        let relative = if path.is_absolute() {
            match path.strip_prefix(source_root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => {
                    // The caller may hold a symlinked or non-canonical root.
                    let canonical_root = std::fs::canonicalize(source_root).ok()?;
                    let canonical_path = std::fs::canonicalize(path).ok()?;
                    canonical_path.strip_prefix(&canonical_root).ok()?.to_path_buf()
                }
            }
        } else {
            path.to_path_buf()
        };

        let mut parts: Vec<String> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                // `..` would escape the root.
                _ => return None,
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(FileHandle(parts.join("/")))
    }

    /// Build a handle from an already-relative path string, e.g. the `path`
    /// carried by an error.
    pub fn from_relative(relative: &str) -> FileHandle {
        FileHandle(relative.replace('\\', "/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this handle names a stub file.
    pub fn is_stub(&self) -> bool {
        self.0.ends_with(".pyi")
    }

    /// Absolute on-disk location under `source_root`.
    pub fn to_path(&self, source_root: &Path) -> PathBuf {
        source_root.join(&self.0)
    }

    /// Dotted module identity: `a/b.py` → `a.b`, `a/__init__.py` → `a`.
    pub fn qualifier(&self) -> Qualifier {
        let trimmed = self
            .0
            .strip_suffix(".pyi")
            .or_else(|| self.0.strip_suffix(".py"))
            .unwrap_or(&self.0);
        let dotted = trimmed.replace('/', ".");
        let dotted = dotted.strip_suffix(".__init__").unwrap_or(&dotted);
        Qualifier(dotted.to_string())
    }
}

impl std::fmt::Display for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dotted module identity derived from a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Qualifier(String);

impl Qualifier {
    pub fn new(dotted: impl Into<String>) -> Qualifier {
        Qualifier(dotted.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Qualifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
