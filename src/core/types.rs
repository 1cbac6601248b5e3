//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Revnum`] - Immutable snapshot identifier, monotonically increasing
//! - [`RevisionSpec`] - A revision request ("head" or a specific number)
//! - [`NodeKind`] - Kind of a tree node (none/file/dir/unknown)
//! - [`RelPath`] - Validated repository-relative path
//! - [`PropName`] / [`PropValue`] - Node property key and value
//! - [`Dirent`] - Read-only directory entry summary
//! - [`Checksum`] - SHA-256 content checksum
//! - [`CopySource`] - Copy-history origin for added nodes
//!
//! # Validation
//!
//! Path and property types enforce validity at construction time. Invalid
//! values cannot be represented, which keeps the editor grammar checks and
//! the storage layer free of path-sanitizing special cases.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error as ThisError;

use crate::core::error::{Error, ErrorCode};

/// Errors from type validation.
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid property name: {0}")]
    InvalidPropName(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),
}

impl From<TypeError> for Error {
    #[track_caller]
    fn from(err: TypeError) -> Self {
        Error::new(ErrorCode::Validation, err.to_string())
    }
}

/// A revision number: a non-negative integer identifying an immutable
/// snapshot of the whole tree.
///
/// Revision numbers increase monotonically over a repository's lifetime and
/// are never reused. Revision 0 is the empty tree every repository starts
/// from. "Unspecified" is expressed as `Option<Revnum>` at API seams rather
/// than a numeric sentinel.
///
/// # Example
///
/// ```
/// use treewire::core::types::Revnum;
///
/// let r = Revnum::new(4);
/// assert_eq!(r.get(), 4);
/// assert_eq!(r.to_string(), "r4");
/// assert!(Revnum::new(3) < r);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Revnum(u64);

impl Revnum {
    /// The empty-tree revision every repository starts from.
    pub const ZERO: Revnum = Revnum(0);

    /// Create a revision number.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the raw number.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The next revision number.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A revision request at a driver or CLI seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionSpec {
    /// The youngest revision at the time the operation starts.
    Head,
    /// A specific revision.
    Number(Revnum),
}

impl RevisionSpec {
    /// Parse from an optional CLI argument; absent means head.
    pub fn from_arg(arg: Option<u64>) -> Self {
        match arg {
            Some(n) => RevisionSpec::Number(Revnum::new(n)),
            None => RevisionSpec::Head,
        }
    }
}

impl From<Option<Revnum>> for RevisionSpec {
    fn from(revision: Option<Revnum>) -> Self {
        match revision {
            Some(rev) => RevisionSpec::Number(rev),
            None => RevisionSpec::Head,
        }
    }
}

/// The kind of a node in the versioned tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Absent.
    None,
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Something is there, but its kind is not known.
    Unknown,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::None => "none",
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
            NodeKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A validated repository-relative path.
///
/// Rules:
/// - No leading or trailing `/`
/// - No empty, `.`, or `..` components
/// - No ASCII control characters or backslashes
/// - The empty string is the root and is only constructible via
///   [`RelPath::root`]
///
/// # Example
///
/// ```
/// use treewire::core::types::RelPath;
///
/// let p = RelPath::new("trunk/src/main.rs").unwrap();
/// assert_eq!(p.name(), "main.rs");
/// assert_eq!(p.parent().unwrap().as_str(), "trunk/src");
///
/// assert!(RelPath::new("/absolute").is_err());
/// assert!(RelPath::new("a/../b").is_err());
/// assert!(RelPath::root().is_root());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    /// The root of the edited tree.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Create a new validated relative path.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidPath` naming the offending value.
    pub fn new(path: impl Into<String>) -> Result<Self, TypeError> {
        let path = path.into();
        Self::validate(&path)?;
        Ok(Self(path))
    }

    fn validate(path: &str) -> Result<(), TypeError> {
        if path.is_empty() {
            return Err(TypeError::InvalidPath(
                "empty path denotes the root; use RelPath::root()".into(),
            ));
        }
        if path.starts_with('/') || path.ends_with('/') {
            return Err(TypeError::InvalidPath(format!(
                "'{}' must not start or end with '/'",
                path
            )));
        }
        for c in path.chars() {
            if c.is_ascii_control() || c == '\\' {
                return Err(TypeError::InvalidPath(format!(
                    "'{}' contains a forbidden character",
                    path.escape_default()
                )));
            }
        }
        for component in path.split('/') {
            if component.is_empty() {
                return Err(TypeError::InvalidPath(format!(
                    "'{}' contains an empty component",
                    path
                )));
            }
            if component == "." || component == ".." {
                return Err(TypeError::InvalidPath(format!(
                    "'{}' contains a relative component",
                    path
                )));
            }
        }
        Ok(())
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a single component.
    ///
    /// # Errors
    ///
    /// Fails if the component itself is not a valid single-segment path.
    pub fn join(&self, component: &str) -> Result<Self, TypeError> {
        if component.contains('/') {
            return Err(TypeError::InvalidPath(format!(
                "'{}' is not a single component",
                component
            )));
        }
        if self.is_root() {
            Self::new(component)
        } else {
            Self::new(format!("{}/{}", self.0, component))
        }
    }

    /// The last component, or `""` for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// The parent path, or `None` for the root.
    ///
    /// The parent of a single-component path is the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Whether `self` equals `ancestor` or lives below it.
    pub fn starts_with(&self, ancestor: &RelPath) -> bool {
        if ancestor.is_root() {
            return true;
        }
        self.0 == ancestor.0 || self.0.starts_with(&format!("{}/", ancestor.0))
    }

    /// Path components, empty for the root.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Get the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RelPath {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            Ok(Self::root())
        } else {
            Self::new(s)
        }
    }
}

impl From<RelPath> for String {
    fn from(p: RelPath) -> Self {
        p.0
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// A validated property name.
///
/// Property names are non-empty and contain no control characters or
/// whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropName(String);

impl PropName {
    /// Create a new validated property name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::InvalidPropName(
                "property name cannot be empty".into(),
            ));
        }
        if name
            .chars()
            .any(|c| c.is_ascii_control() || c.is_whitespace())
        {
            return Err(TypeError::InvalidPropName(format!(
                "'{}' contains forbidden characters",
                name.escape_default()
            )));
        }
        Ok(Self(name))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PropName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PropName> for String {
    fn from(n: PropName) -> Self {
        n.0
    }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A property value: opaque bytes.
///
/// A property change carries `Option<PropValue>`; `None` deletes the
/// property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropValue(Vec<u8>);

impl PropValue {
    /// Create a property value from bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// A read-only directory entry summary.
///
/// Returned by listing and stat operations; never mutated once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dirent {
    /// Node kind.
    pub kind: NodeKind,
    /// Length of file text, 0 for directories.
    pub size: u64,
    /// Whether the node carries properties.
    pub has_props: bool,
    /// Last revision in which this node changed.
    pub created_rev: Revnum,
    /// Timestamp of `created_rev`.
    pub time: Option<DateTime<Utc>>,
    /// Author of `created_rev`.
    pub last_author: Option<String>,
}

/// A SHA-256 checksum over file content, hex-rendered.
///
/// Presented at `close_file` so editors can verify the reconstructed text.
///
/// # Example
///
/// ```
/// use treewire::core::types::Checksum;
///
/// let c = Checksum::of(b"hello");
/// assert_eq!(c, Checksum::of(b"hello"));
/// assert_ne!(c, Checksum::of(b"world"));
/// assert_eq!(c.as_str().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Compute the checksum of a byte slice.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a hex digest.
    pub fn parse(hex_digest: impl Into<String>) -> Result<Self, TypeError> {
        let digest = hex_digest.into().to_ascii_lowercase();
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidChecksum(format!(
                "expected 64 hex characters, got '{}'",
                digest
            )));
        }
        Ok(Self(digest))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Checksum {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Copy-history origin for a node added with history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySource {
    /// Source path of the copy.
    pub path: RelPath,
    /// Source revision of the copy.
    pub revision: Revnum,
}
