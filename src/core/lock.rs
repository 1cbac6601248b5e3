//! core::lock
//!
//! Server-issued exclusive-claim records over single paths.
//!
//! # Architecture
//!
//! A [`Lock`] represents the exclusive right to add, delete, or modify one
//! path. Locks are created by the repository, which wholly controls them;
//! at most one valid (unexpired) lock exists per path at a time from the
//! repository's point of view. The driver and editor treat a lock purely as
//! a capability: the [`LockToken`] is presented alongside mutating calls
//! and validated by the backing store.
//!
//! # Invariants
//!
//! - A lock never changes once issued; "refreshing" means issuing a new one
//! - An absent expiration timestamp means the lock never expires
//! - Because locks are immutable, clients may cache the whole record, not
//!   just the token
//!
//! # Example
//!
//! ```
//! use treewire::core::lock::Lock;
//! use treewire::core::types::RelPath;
//! use chrono::Utc;
//!
//! let lock = Lock::issue(
//!     RelPath::new("trunk/a.txt").unwrap(),
//!     "alice",
//!     Some("editing intro"),
//!     None,
//! );
//! assert_eq!(lock.owner, "alice");
//! assert!(!lock.is_expired(Utc::now()));
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::types::RelPath;

/// Opaque token uniquely identifying a lock.
///
/// Tokens are UUIDs minted at issue time. Possession of the token is what
/// authorizes mutation of the locked path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    /// Mint a fresh token.
    pub fn mint() -> Self {
        Self(format!("opaquelocktoken:{}", Uuid::new_v4()))
    }

    /// Reconstruct a token from its string form (e.g. from a client cache).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable exclusive-claim record over a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// The path this lock applies to.
    pub path: RelPath,
    /// Unique token identifying the lock.
    pub token: LockToken,
    /// The username which owns the lock.
    pub owner: String,
    /// Optional description of the lock.
    pub comment: Option<String>,
    /// When the lock was made.
    pub created_at: DateTime<Utc>,
    /// When the lock will expire; `None` means never.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Lock {
    /// Issue a new lock with a fresh token, created now.
    pub fn issue(
        path: RelPath,
        owner: impl Into<String>,
        comment: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            path,
            token: LockToken::mint(),
            owner: owner.into(),
            comment: comment.map(String::from),
            created_at: Utc::now(),
            expires_at,
        }
    }

    /// Whether the lock has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now >= expiry,
            None => false,
        }
    }

    /// Whether `token` authorizes use of this lock at `now`.
    ///
    /// A valid presentation is an exact token match on an unexpired lock.
    pub fn authorizes(&self, token: &LockToken, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && &self.token == token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_lock(expires_at: Option<DateTime<Utc>>) -> Lock {
        Lock::issue(
            RelPath::new("trunk/a.txt").unwrap(),
            "alice",
            Some("testing"),
            expires_at,
        )
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(LockToken::mint(), LockToken::mint());
    }

    #[test]
    fn token_string_roundtrip() {
        let t = LockToken::mint();
        assert_eq!(LockToken::from_string(t.as_str()), t);
    }

    #[test]
    fn no_expiry_never_expires() {
        let lock = test_lock(None);
        assert!(!lock.is_expired(Utc::now() + Duration::days(10_000)));
    }

    #[test]
    fn expiry_in_past_is_expired() {
        let lock = test_lock(Some(Utc::now() - Duration::hours(1)));
        assert!(lock.is_expired(Utc::now()));
    }

    #[test]
    fn expiry_in_future_is_valid() {
        let lock = test_lock(Some(Utc::now() + Duration::hours(1)));
        assert!(!lock.is_expired(Utc::now()));
    }

    #[test]
    fn authorizes_matching_unexpired_token() {
        let lock = test_lock(None);
        let token = lock.token.clone();
        assert!(lock.authorizes(&token, Utc::now()));
    }

    #[test]
    fn rejects_wrong_token() {
        let lock = test_lock(None);
        assert!(!lock.authorizes(&LockToken::mint(), Utc::now()));
    }

    #[test]
    fn rejects_expired_even_with_right_token() {
        let lock = test_lock(Some(Utc::now() - Duration::minutes(1)));
        let token = lock.token.clone();
        assert!(!lock.authorizes(&token, Utc::now()));
    }

    #[test]
    fn serde_roundtrip() {
        let lock = test_lock(Some(Utc::now() + Duration::hours(2)));
        let json = serde_json::to_string(&lock).unwrap();
        let parsed: Lock = serde_json::from_str(&json).unwrap();
        assert_eq!(lock, parsed);
    }
}
