//! core
//!
//! Domain types shared by every layer: the error chain model, validated
//! path/revision/property types, the lock record, and configuration.

pub mod config;
pub mod error;
pub mod lock;
pub mod types;

pub use error::{Error, ErrorCode, Result, ResultExt};
pub use lock::{Lock, LockToken};
pub use types::{
    Checksum, CopySource, Dirent, NodeKind, PropName, PropValue, RelPath, RevisionSpec, Revnum,
};
