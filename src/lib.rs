//! Treewire - a streaming tree-delta editor protocol and its drivers
//!
//! Treewire expresses the difference between two tree snapshots as a fixed
//! grammar of editor calls: one side (the driver) walks a source of truth
//! and narrates the change, the other side (the editor) applies it without
//! ever seeing why. File content travels inside the same call stream as
//! bounded windows, so arbitrarily large trees move in flat memory.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates down)
//! - [`session`] - Drivers: checkout, update, commit, with the
//!   close-or-abort guarantee and cooperative cancellation
//! - [`delta`] - The editor capability trait, batons, text-delta windows,
//!   grammar validation, and the in-memory reference editor
//! - [`log`] - The change-log receiver protocol
//! - [`storage`] - The repository oracle boundary and its in-memory
//!   implementation
//! - [`core`] - Domain types, the error chain model, lock records, config
//! - [`ui`] - Output utilities
//!
//! # Correctness Invariants
//!
//! Treewire maintains the following invariants:
//!
//! 1. Every drive ends in exactly one of `close_edit` or `abort_edit`
//! 2. Editor calls follow the grammar; the validating wrapper rejects
//!    anything else before it reaches a real editor
//! 3. A failed or cancelled checkout leaves no partial destination
//! 4. Lock-protected paths are never mutated past a failed token check

pub mod cli;
pub mod core;
pub mod delta;
pub mod log;
pub mod session;
pub mod storage;
pub mod ui;
