//! Process-wide and per-reader monotonic id generation (C2).
//!
//! The only guarantee this module makes is uniqueness across all readers in
//! one process, which simplifies debugging and lets `(archive_id,
//! member_id)` double as a cross-reader identity check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::types::{ArchiveId, MemberId};

static NEXT_ARCHIVE_ID: AtomicU64 = AtomicU64::new(1);

/// Mint a new, never-reused archive id.
pub fn next_archive_id() -> ArchiveId {
    ArchiveId(NEXT_ARCHIVE_ID.fetch_add(1, Ordering::Relaxed))
}

/// A reader-local counter for member ids, starting at 1.
///
/// Guarded by a plain `Mutex` rather than an atomic: registration already
/// takes the registry lock for the rest of its work, and a `Mutex` keeps the
/// "increment and assign" step trivially inspectable and panic-safe.
#[derive(Debug, Default)]
pub struct MemberIdGenerator {
    counter: Mutex<u64>,
}

impl MemberIdGenerator {
    /// Create a fresh generator, the first id it produces will be 1.
    pub fn new() -> Self {
        Self {
            counter: Mutex::new(0),
        }
    }

    /// Mint the next member id for this reader.
    pub fn next(&self) -> MemberId {
        let mut counter = self.counter.lock().expect("member id mutex poisoned");
        *counter += 1;
        MemberId(*counter)
    }
}
