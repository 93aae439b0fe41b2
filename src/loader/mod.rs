//! Two-pass loader script interpreter.
//!
//! The hypervisor publishes ACPI table fragments as named blobs plus a
//! loader script that says how to materialise them: which blobs to place
//! in machine memory, which fields to patch with absolute addresses,
//! where to store header checksums, and which addresses to write back so
//! the host knows them at runtime. This module interprets that script and
//! registers the resulting tables with the platform.
//!
//! # Execution model
//!
//! 1. **Load**: fetch `etc/table-loader`, validate framing, measure it.
//! 2. **Restriction scan**: any blob targeted by a pointer narrower than
//!    8 bytes must be allocated below 4 GiB; a pre-scan collects those
//!    names so the allocation ceiling is known before the first command
//!    runs.
//! 3. **First pass**: execute every command in order, building the blob
//!    registry and patching bytes. The index one past the last
//!    successful `write_pointer` is tracked so host-visible writes can be
//!    reverted precisely.
//! 4. **Second pass**: re-walk the `add_pointer` commands; every unique
//!    patched target is classified and, if it is a table other than the
//!    RSDT or XSDT, installed through the platform registry.
//! 5. **Commit or roll back**: on success the replay log is handed to
//!    the platform (the last undoable step) and blobs consumed entirely
//!    into tables are freed; on any error, installed tables are removed
//!    newest first, host-visible pointer slots are zeroed again, and all
//!    pages are returned.
//!
//! The interpreter is single-threaded and fully synchronous: the
//! transport cursor is re-selected before every contiguous I/O sequence
//! and no collaborator is invoked re-entrantly.

mod exec;
mod install;
mod rollback;

pub use install::INSTALLED_MAX;

use crate::acpi::{TableKey, TableRegistry};
use crate::alloc::PageAllocator;
use crate::blob::{BlobName, BlobRegistry};
use crate::error::LoaderError;
use crate::mem::MachineMemory;
use crate::measure::{MeasureKind, MeasurementSink};
use crate::replay::ReplayLog;
use crate::script::{Command, Script, SCRIPT_ITEM};
use crate::transport::Transport;
use log::{debug, info};

use std::collections::BTreeSet;

/// The collaborators a script run executes against.
pub struct Platform<'a> {
    /// Machine memory the allocator's addresses point into.
    pub mem: &'a MachineMemory,
    /// Firmware-configuration transport.
    pub transport: &'a mut dyn Transport,
    /// Page allocator for blob backing memory.
    pub allocator: &'a mut dyn PageAllocator,
    /// Platform ACPI table registry.
    pub tables: &'a mut dyn TableRegistry,
    /// Attestation sink for hypervisor-provided bytes.
    pub measure: &'a mut dyn MeasurementSink,
}

/// Outcome summary of a committed script run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoaderReport {
    /// Tables installed through the platform registry.
    pub installed: usize,
    /// Blobs retained because the host or a table still references them.
    pub retained_blobs: usize,
    /// Blobs whose pages were returned to the allocator.
    pub freed_blobs: usize,
}

/// Names of blobs that must be allocated in the 32-bit address space:
/// every pointee of an `add_pointer` whose field is narrower than 8
/// bytes. Duplicate mentions are fine; unterminated names are not.
fn collect_restricted(script: &Script) -> Result<BTreeSet<BlobName>, LoaderError> {
    let mut restricted = BTreeSet::new();
    for command in script.commands() {
        if let Command::AddPointer(cmd) = command {
            if cmd.pointer_size >= 8 {
                continue;
            }
            let name = BlobName::parse(&cmd.pointee_file)?;
            if restricted.insert(name) {
                debug!("restricting blob \"{name}\" from 64-bit allocation");
            }
        }
    }
    Ok(restricted)
}

/// Both interpreter passes; side effects accumulate in the out-params so
/// the caller can revert them whether this returns early or not.
fn run_script(
    platform: &mut Platform<'_>,
    script: &Script,
    restricted: &BTreeSet<BlobName>,
    registry: &mut BlobRegistry,
    installed: &mut Vec<TableKey>,
    write_watermark: &mut usize,
    replay: &mut Option<Box<dyn ReplayLog>>,
) -> Result<(), LoaderError> {
    for (index, command) in script.commands().enumerate() {
        match command {
            Command::Allocate(cmd) => exec::allocate(&cmd, restricted, registry, platform)?,
            Command::AddPointer(cmd) => exec::add_pointer(&cmd, registry, platform)?,
            Command::AddChecksum(cmd) => exec::add_checksum(&cmd, registry, platform)?,
            Command::WritePointer(cmd) => {
                exec::write_pointer(&cmd, registry, platform, replay)?;
                *write_watermark = index + 1;
            }
            Command::Unknown(kind) => {
                debug!("unknown loader command {kind:#x}, skipping");
            }
        }
    }

    let mut seen = BTreeSet::new();
    for command in script.commands() {
        if let Command::AddPointer(cmd) = command {
            install::install_pointee(
                &cmd,
                registry,
                platform.mem,
                &mut *platform.tables,
                installed,
                &mut seen,
            )?;
        }
    }
    Ok(())
}

/// Run the loader script published by the hypervisor.
///
/// Fetches `etc/table-loader` from the transport, executes both
/// interpreter passes, and either commits (tables installed, host-known
/// blobs retained, replay log transferred) or rolls every visible side
/// effect back and returns the first error. Pass `replay` when the
/// platform needs `write_pointer` effects re-applied on a low-power
/// resume; the log is committed only after both passes succeed.
pub fn install_tables(
    platform: &mut Platform<'_>,
    mut replay: Option<Box<dyn ReplayLog>>,
) -> Result<LoaderReport, LoaderError> {
    let (script_item, script_size) = platform.transport.find(SCRIPT_ITEM)?;
    let mut raw = vec![0u8; script_size as usize];
    platform.transport.select(script_item)?;
    platform.transport.read(&mut raw)?;
    let script = Script::parse(raw)?;

    // Measure before interpreting; the script buffer itself is never
    // patched, but the attested value must be the hypervisor's bytes.
    platform
        .measure
        .measure(MeasureKind::LoaderScript, script.as_bytes());

    let restricted = collect_restricted(&script)?;

    let mut registry = BlobRegistry::new();
    let mut installed: Vec<TableKey> = Vec::new();
    let mut write_watermark = 0usize;

    let mut result = run_script(
        platform,
        &script,
        &restricted,
        &mut registry,
        &mut installed,
        &mut write_watermark,
        &mut replay,
    );

    // Handing the replay log over is the last step that cannot be undone,
    // so it only happens once everything else has succeeded. A commit
    // failure still gets the full rollback.
    if result.is_ok() {
        if let Some(log) = replay.take() {
            result = log.commit();
        }
    }

    let failed = result.is_err();
    let stats = rollback::teardown(
        failed,
        &script,
        write_watermark,
        &mut installed,
        &mut registry,
        platform,
    );

    result.map(|()| {
        let report = LoaderReport {
            installed: installed.len(),
            retained_blobs: stats.retained,
            freed_blobs: stats.freed,
        };
        info!(
            "installed {} tables ({} blobs retained, {} freed)",
            report.installed, report.retained_blobs, report.freed_blobs
        );
        report
    })
}
