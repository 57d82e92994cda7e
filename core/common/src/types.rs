//! Common types used throughout Coffer.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use zeroize::Zeroize;

/// A path inside a store, relative to its base directory.
///
/// Construction rejects anything that could escape the base directory:
/// `..` components, and absolute paths that do not live under the base.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    components: Vec<String>,
}

impl StorePath {
    /// Parse a relative `/`-separated path.
    ///
    /// # Errors
    /// - Returns error on `..` components or an absolute path
    pub fn parse(path: &str) -> crate::Result<Self> {
        Self::from_relative(Path::new(path))
    }

    /// Resolve a caller-supplied path against `base`.
    ///
    /// Relative paths are taken as-is; absolute paths must lie under `base`.
    pub fn from_path(base: &Path, path: &Path) -> crate::Result<Self> {
        if path.is_absolute() {
            let relative = path.strip_prefix(base).map_err(|_| {
                crate::Error::InvalidInput(format!(
                    "Path {} is outside the store at {}",
                    path.display(),
                    base.display()
                ))
            })?;
            Self::from_relative(relative)
        } else {
            Self::from_relative(path)
        }
    }

    fn from_relative(path: &Path) -> crate::Result<Self> {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        crate::Error::InvalidInput(format!(
                            "Path is not valid UTF-8: {}",
                            path.display()
                        ))
                    })?;
                    components.push(part.to_string());
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(crate::Error::InvalidInput(format!(
                        "Path may not contain '..': {}",
                        path.display()
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(crate::Error::InvalidInput(format!(
                        "Expected a relative path: {}",
                        path.display()
                    )));
                }
            }
        }
        Ok(Self { components })
    }

    /// Check if this is the base directory itself.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the file/directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// File extension of the last component, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name()?;
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        if child.is_empty() || child == ".." || child == "." {
            return Err(crate::Error::InvalidInput(format!(
                "Invalid child component: {:?}",
                child
            )));
        }
        if child.contains('/') || child.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Child component cannot contain separators".to_string(),
            ));
        }
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Whether any directory above the final component is named `dir`.
    pub fn has_ancestor_named(&self, dir: &str) -> bool {
        match self.components.split_last() {
            Some((_, dirs)) => dirs.iter().any(|c| c == dir),
            None => false,
        }
    }

    /// Map onto the filesystem under `base`.
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        let mut fs_path = base.to_path_buf();
        for component in &self.components {
            fs_path.push(component);
        }
        fs_path
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.components.join("/"))
        }
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for SensitiveBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}
