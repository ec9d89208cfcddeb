//! Process-wide call identifiers
//!
//! Every recorded invocation gets a [`CallId`] from one shared
//! [`CallIdAllocator`]. Ids are strictly increasing in issuance order across
//! all threads, never reused, and may have gaps (ids handed to entries that a
//! recorder later drops are simply never seen).
//!
//! # Performance
//!
//! `next()` is a single atomic `fetch_add`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one recorded invocation; the first id issued is 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic call-id counter shared by every thread of one recorder
///
/// # Example
///
/// ```
/// use rastreo::call_id::CallIdAllocator;
///
/// let ids = CallIdAllocator::new();
/// let a = ids.next();
/// let b = ids.next();
/// assert!(a < b);
/// ```
#[derive(Debug, Default)]
pub struct CallIdAllocator {
    counter: AtomicU64,
}

impl CallIdAllocator {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Issue the next id
    pub fn next(&self) -> CallId {
        CallId(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Number of ids issued so far
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
