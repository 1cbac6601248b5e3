//! core::error
//!
//! Chain-of-causes error model used by every operation in Treewire.
//!
//! # Architecture
//!
//! Every fallible operation returns [`Result`]. Failure is an [`Error`]: a
//! status code, a human-readable message, and an optional boxed cause. Causes
//! form a singly-linked chain, most recent first, so wrapping at each layer
//! records the full causal history without losing the lower-level detail.
//!
//! The canonical success value is `Ok(())` — a compile-time constant, never
//! allocated per call, so success checks on the hot path are free. There is
//! no separate "no error" sentinel object.
//!
//! # Ownership
//!
//! An error owns its entire chain. Whichever scope holds the outermost error
//! owns everything it wraps; dropping it releases the chain as a unit. A
//! chain has no cycles (ownership makes them unrepresentable) and always
//! terminates in a cause-less error. Retaining part of a chain across a
//! scope boundary requires a deep copy (`Clone`).
//!
//! # Propagation policy
//!
//! Intermediate layers either pass an error through unchanged (`?`) or wrap
//! it with added context ([`ResultExt::context`]); they never silently drop
//! a non-success result. Only the top level renders a chain for humans
//! ([`Error::render`]).
//!
//! # Example
//!
//! ```
//! use treewire::core::error::{Error, ErrorCode, Result, ResultExt};
//!
//! fn read_node() -> Result<()> {
//!     Err(Error::new(ErrorCode::Storage, "node table truncated"))
//! }
//!
//! let err = read_node()
//!     .context(ErrorCode::Storage, "cannot read 'trunk/a.txt' at r4")
//!     .unwrap_err();
//!
//! assert_eq!(err.code(), ErrorCode::Storage);
//! assert_eq!(err.chain().count(), 2);
//! assert_eq!(err.root_cause().message(), "node table truncated");
//! ```

use std::fmt;
use std::panic::Location;

/// Result alias used throughout the crate.
///
/// `Ok(())` is the canonical, allocation-free success value.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Failure taxonomy.
///
/// Codes classify an error link for programmatic handling; the message
/// carries the specifics. Codes are deliberately payload-free so they stay
/// `Copy` and cheap to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Grammar misuse in the editor protocol (double close, use of a closed
    /// baton, add over an existing entry). Always fatal to the current edit,
    /// never retried.
    ProtocolViolation,
    /// Storage read/write fault. The driver aborts the edit; the whole edit
    /// may be retried at a higher layer, never mid-edit.
    Storage,
    /// Transport fault between a remote driver and editor.
    Transport,
    /// Lock missing, expired, or token mismatch on a lock-protected path.
    /// Distinguished so callers can offer to steal/break or refresh.
    LockConflict,
    /// Cooperative cancellation. Never treated as a generic failure.
    Cancelled,
    /// Malformed input (path, property name, revision range, checksum
    /// mismatch). The message names the offending value.
    Validation,
}

impl ErrorCode {
    /// Short stable identifier used in rendered chains.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ProtocolViolation => "protocol-violation",
            ErrorCode::Storage => "storage",
            ErrorCode::Transport => "transport",
            ErrorCode::LockConflict => "lock-conflict",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One link in an error chain.
///
/// Immutable once constructed. The source location of the constructing call
/// is captured via `#[track_caller]` and rendered only in debug builds.
#[derive(Debug, Clone)]
pub struct Error {
    code: ErrorCode,
    message: String,
    cause: Option<Box<Error>>,
    location: &'static Location<'static>,
}

impl Error {
    /// Create a new cause-less error.
    #[track_caller]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            location: Location::caller(),
        }
    }

    /// Wrap an existing error with additional context.
    ///
    /// The cause is preserved in full; the new link becomes the head of the
    /// chain.
    #[track_caller]
    pub fn wrap(code: ErrorCode, message: impl Into<String>, cause: Error) -> Self {
        Self {
            code,
            message: message.into(),
            cause: Some(Box::new(cause)),
            location: Location::caller(),
        }
    }

    /// Shorthand for a cancellation error.
    #[track_caller]
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "operation cancelled")
    }

    /// The code of the outermost link.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The message of the outermost link.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wrapped cause, if any.
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// Iterate over the chain, outermost link first.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// The innermost (original) error of the chain.
    pub fn root_cause(&self) -> &Error {
        let mut cur = self;
        while let Some(cause) = cur.cause() {
            cur = cause;
        }
        cur
    }

    /// Whether any link in the chain is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.chain().any(|e| e.code == ErrorCode::Cancelled)
    }

    /// Render the full chain for human consumption, outermost first.
    ///
    /// Source locations are included in debug builds only.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, link) in self.chain().enumerate() {
            if i == 0 {
                out.push_str(&format!("error[{}]: {}", link.code, link.message));
            } else {
                out.push_str(&format!("\n  caused by [{}]: {}", link.code, link.message));
            }
            if cfg!(debug_assertions) {
                out.push_str(&format!(
                    " ({}:{})",
                    link.location.file(),
                    link.location.line()
                ));
            }
        }
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as _)
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorCode::Storage, err.to_string())
    }
}

/// Iterator over an error chain, outermost first.
pub struct Chain<'a> {
    next: Option<&'a Error>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Error;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next?;
        self.next = cur.cause();
        Some(cur)
    }
}

/// Context-attaching extension for `Result`.
///
/// Mirrors the `anyhow::Context` calling convention the CLI layer uses, but
/// keeps the typed chain.
pub trait ResultExt<T> {
    /// Wrap the error with a new outermost link.
    fn context(self, code: ErrorCode, message: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily-built message.
    fn with_context<F, S>(self, code: ErrorCode, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn context(self, code: ErrorCode, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::wrap(code, message, e.into()))
    }

    #[track_caller]
    fn with_context<F, S>(self, code: ErrorCode, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::wrap(code, f(), e.into()))
    }
}
