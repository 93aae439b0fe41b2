//! Error types for the table loader.
//!
//! A single crate-wide enum keeps the propagation story simple: every
//! fallible step in the loader returns [`LoaderError`], the orchestrator
//! returns the first error encountered, and the caller sees which stage
//! failed from the variant. Collaborator implementations (transport,
//! allocator, table registry, replay log) surface their own failures
//! through the `Transport`/`Allocator`/`Registry`/`Replay` variants
//! verbatim.

use crate::mem::MemoryError;
use thiserror::Error;

/// Errors produced while running a loader script.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// A named transport item does not exist.
    #[error("transport item \"{0}\" not found")]
    NotFound(String),

    /// The script violated a structural, range, or uniqueness rule.
    #[error("malformed loader script: {0}")]
    BadScript(String),

    /// An allocate command requested an alignment above the page size.
    #[error("unsupported blob alignment {0:#x}")]
    UnsupportedAlignment(u32),

    /// The page allocator could not satisfy a request.
    #[error("out of memory: {pages} pages below {ceiling:#x}")]
    OutOfMemory { pages: u64, ceiling: u64 },

    /// The installed-table cap was reached.
    #[error("cannot install more than {0} tables")]
    TooMany(usize),

    /// Machine memory access failed.
    #[error("machine memory: {0}")]
    Memory(#[from] MemoryError),

    /// The transport failed during an I/O sequence.
    #[error("transport: {0}")]
    Transport(String),

    /// The page allocator failed for a reason other than exhaustion.
    #[error("page allocator: {0}")]
    Allocator(String),

    /// The table registry rejected an install or uninstall.
    #[error("table registry: {0}")]
    Registry(String),

    /// The replay log could not record a pointer write.
    #[error("replay log: {0}")]
    Replay(String),
}
