//! Unified teardown for both outcomes.
//!
//! A failing script run must leave no trace: installed tables are removed
//! newest first, every pointer slot the host already saw is zeroed again
//! in reverse script order, and all blob pages go back to the allocator.
//! A successful run shares the same drain: blobs whose bytes were wholly
//! absorbed into installed tables are freed, opaque blobs are retained.
//! Nothing on this path propagates errors; reversal is best-effort and
//! failures are logged.

use crate::acpi::TableKey;
use crate::blob::{BlobName, BlobRegistry};
use crate::script::{Command, Script, WritePointer};
use crate::transport::Transport;
use log::{debug, warn};

use super::Platform;

/// Zero the slot a successful `write_pointer` filled in.
fn undo_write_pointer(cmd: &WritePointer, transport: &mut dyn Transport) {
    // The command passed full validation in the first pass, so failures
    // here mean the platform is in worse shape than we can repair.
    let name = match BlobName::parse(&cmd.pointer_file) {
        Ok(name) => name,
        Err(_) => return,
    };
    let zeros = [0u8; 8];
    let result = transport.find(name.as_str()).and_then(|(item, _)| {
        transport.select(item)?;
        transport.skip(cmd.pointer_offset)?;
        transport.write(&zeros[..cmd.pointer_size as usize])
    });
    match result {
        Ok(()) => debug!(
            "reverted pointer write in \"{}\" + {:#x} ({} bytes)",
            name, cmd.pointer_offset, cmd.pointer_size
        ),
        Err(e) => warn!("failed to revert pointer write in \"{name}\": {e}"),
    }
}

/// Teardown statistics for the run report.
pub(super) struct DrainStats {
    pub freed: usize,
    pub retained: usize,
}

/// Undo side effects as far as the run got, then drain the registry.
///
/// `write_watermark` is the record index one past the last successful
/// `write_pointer`; only that prefix is re-walked for reversal.
pub(super) fn teardown(
    failed: bool,
    script: &Script,
    write_watermark: usize,
    installed: &mut Vec<TableKey>,
    registry: &mut BlobRegistry,
    platform: &mut Platform<'_>,
) -> DrainStats {
    if failed {
        while let Some(key) = installed.pop() {
            if let Err(e) = platform.tables.uninstall(key) {
                warn!("failed to uninstall table {key:?}: {e}");
            }
        }

        for index in (0..write_watermark).rev() {
            if let Command::WritePointer(cmd) = script.get(index) {
                undo_write_pointer(&cmd, platform.transport);
            }
        }
    }

    let mut stats = DrainStats {
        freed: 0,
        retained: 0,
    };
    for blob in registry.drain() {
        if failed || !blob.opaque {
            debug!("freeing \"{}\"", blob.name);
            if let Err(e) = platform.allocator.free_pages(blob.base, blob.pages) {
                warn!("failed to free pages of \"{}\": {e}", blob.name);
            }
            stats.freed += 1;
        } else {
            debug!("retaining \"{}\" at {:#x}", blob.name, blob.base);
            stats.retained += 1;
        }
    }
    stats
}
