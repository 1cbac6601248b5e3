//! delta::window
//!
//! Streaming text-delta windows.
//!
//! # Design
//!
//! A content change is never passed as one in-memory buffer. Instead the
//! driver delivers a sequence of [`DeltaWindow`]s to the editor, each a list
//! of instructions against (a) a fixed baseline and (b) freshly supplied
//! literal bytes:
//!
//! - [`WindowOp::CopySource`] - copy N bytes from a baseline offset
//! - [`WindowOp::Insert`] - append literal bytes carried by the window
//!
//! Applying the windows in order reconstructs the new content incrementally,
//! so both sides handle arbitrarily large files in bounded memory. The
//! driver signals completion by pushing `None` instead of a window; an empty
//! window mid-stream is legal and means "no-op increment".
//!
//! # Example
//!
//! ```
//! use treewire::delta::window::{apply_windows, build_windows, DeltaWindow, WindowOp};
//!
//! // Pure insertion against the empty baseline.
//! let w = DeltaWindow::insert(b"hello".to_vec());
//! assert_eq!(apply_windows(b"", &[w]).unwrap(), b"hello");
//!
//! // Builder + apply round-trips arbitrary edits.
//! let base = b"the quick brown fox";
//! let target = b"the slow brown fox";
//! let windows = build_windows(base, target, 8);
//! assert_eq!(apply_windows(base, &windows).unwrap(), target);
//! ```

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorCode, Result};

/// Preferred number of new-content bytes carried per window.
///
/// 100 KiB: large enough to amortize per-window overhead, small enough to
/// keep peak memory flat while streaming.
pub const DEFAULT_CHUNK_SIZE: usize = 102_400;

/// One instruction inside a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowOp {
    /// Copy `len` bytes from `offset` in the baseline.
    CopySource {
        /// Byte offset into the baseline.
        offset: u64,
        /// Number of bytes to copy.
        len: u64,
    },
    /// Append these literal bytes.
    Insert(#[serde(with = "serde_bytes_vec")] Vec<u8>),
}

/// One increment of a streamed content diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaWindow {
    /// Instructions applied in order.
    pub ops: Vec<WindowOp>,
}

impl DeltaWindow {
    /// A window holding a single literal insertion.
    pub fn insert(bytes: Vec<u8>) -> Self {
        Self {
            ops: vec![WindowOp::Insert(bytes)],
        }
    }

    /// Total bytes this window appends to the output.
    pub fn output_len(&self) -> u64 {
        self.ops
            .iter()
            .map(|op| match op {
                WindowOp::CopySource { len, .. } => *len,
                WindowOp::Insert(bytes) => bytes.len() as u64,
            })
            .sum()
    }
}

/// Apply one window against a baseline, appending to `out`.
///
/// # Errors
///
/// A copy instruction reaching past the end of the baseline is a
/// `Validation` error naming the offending range.
pub fn apply_window(baseline: &[u8], window: &DeltaWindow, out: &mut Vec<u8>) -> Result {
    for op in &window.ops {
        match op {
            WindowOp::CopySource { offset, len } => {
                let start = usize::try_from(*offset).map_err(range_error(*offset, *len))?;
                let count = usize::try_from(*len).map_err(range_error(*offset, *len))?;
                let end = start.checked_add(count).ok_or_else(|| {
                    Error::new(
                        ErrorCode::Validation,
                        format!("copy range {}+{} overflows", offset, len),
                    )
                })?;
                if end > baseline.len() {
                    return Err(Error::new(
                        ErrorCode::Validation,
                        format!(
                            "copy range {}..{} exceeds baseline of {} bytes",
                            start,
                            end,
                            baseline.len()
                        ),
                    ));
                }
                out.extend_from_slice(&baseline[start..end]);
            }
            WindowOp::Insert(bytes) => out.extend_from_slice(bytes),
        }
    }
    Ok(())
}

fn range_error(offset: u64, len: u64) -> impl FnOnce(std::num::TryFromIntError) -> Error {
    move |_| {
        Error::new(
            ErrorCode::Validation,
            format!("copy range {}+{} does not fit in memory", offset, len),
        )
    }
}

/// Apply a full window sequence against a baseline.
///
/// Convenience for tests and in-memory editors; streaming consumers apply
/// windows one at a time as they arrive.
pub fn apply_windows(baseline: &[u8], windows: &[DeltaWindow]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for window in windows {
        apply_window(baseline, window, &mut out)?;
    }
    Ok(out)
}

/// Build a window sequence transforming `baseline` into `target`.
///
/// Shared prefix and suffix become copy instructions; the differing middle
/// is emitted as literal insertions chunked at `chunk_size` bytes so no
/// window exceeds the configured size. Against an empty baseline this
/// degenerates to chunked pure insertion.
pub fn build_windows(baseline: &[u8], target: &[u8], chunk_size: usize) -> Vec<DeltaWindow> {
    assert!(chunk_size > 0, "chunk_size must be positive");

    let prefix = common_prefix_len(baseline, target);
    // The suffix must not overlap the prefix on either side.
    let max_suffix = (baseline.len() - prefix).min(target.len() - prefix);
    let suffix = common_suffix_len(baseline, target, max_suffix);

    let middle = &target[prefix..target.len() - suffix];
    let mut windows = Vec::new();

    if prefix > 0 {
        windows.push(DeltaWindow {
            ops: vec![WindowOp::CopySource {
                offset: 0,
                len: prefix as u64,
            }],
        });
    }
    for chunk in middle.chunks(chunk_size) {
        windows.push(DeltaWindow::insert(chunk.to_vec()));
    }
    if suffix > 0 {
        windows.push(DeltaWindow {
            ops: vec![WindowOp::CopySource {
                offset: (baseline.len() - suffix) as u64,
                len: suffix as u64,
            }],
        });
    }
    windows
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn common_suffix_len(a: &[u8], b: &[u8], max: usize) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take(max)
        .take_while(|(x, y)| x == y)
        .count()
}

/// Serde helper: byte vectors as JSON arrays stay readable in dump files,
/// but a dedicated module keeps the representation swappable.
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        bytes.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(de)
    }
}
