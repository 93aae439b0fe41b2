//! Condensed replay log for the low-power resume path.
//!
//! Host-visible pointer writes must be repeated when the machine wakes
//! from a low-power state, because the transport's items do not survive
//! it. The loader records every successful `write_pointer` in condensed
//! form (item, width, offset, value) *before* performing the transport
//! write, so a log that reaches the host is always a superset of the
//! writes the host observed, never a subset.

use crate::error::LoaderError;
use crate::transport::ItemId;

/// One condensed `write_pointer` effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerWrite {
    pub item: ItemId,
    pub width: u8,
    pub offset: u32,
    pub value: u64,
}

/// An append-only sink for condensed pointer writes.
///
/// On a successful run the loader commits the log, transferring ownership
/// to the platform; committing is the last undoable step, and a commit
/// failure still triggers full rollback. A log that is never committed is
/// simply dropped, which releases it.
pub trait ReplayLog {
    /// Record a pointer write. A failure here aborts the `write_pointer`
    /// before any transport byte moves.
    fn append(&mut self, write: &PointerWrite) -> Result<(), LoaderError>;

    /// Hand the finished log to the platform.
    fn commit(self: Box<Self>) -> Result<(), LoaderError>;
}
