//! Second-pass table discovery and installation.
//!
//! After the first pass every pointer field carries its final absolute
//! value, so re-walking the `add_pointer` commands enumerates every
//! location the tables point at. Each unique target address is classified
//! once: a recognised ACPI table is installed through the platform
//! registry, the two root tables are acknowledged but skipped, and
//! anything else marks its blob as opaque so the bytes survive commit.

use crate::acpi::{probe_table, TableKey, TableRegistry};
use crate::blob::{BlobName, BlobRegistry};
use crate::error::LoaderError;
use crate::mem::MachineMemory;
use crate::script::AddPointer;
use log::debug;

use std::collections::BTreeSet;

/// Upper bound on tables installed by one script run.
pub const INSTALLED_MAX: usize = 128;

/// Process one `add_pointer` command in the second pass.
///
/// `seen` tracks the absolute addresses already classified; repeats are
/// skipped outright. On an installation failure the address is removed
/// from `seen` again so the caller's rollback sees consistent state.
pub(super) fn install_pointee(
    cmd: &AddPointer,
    registry: &mut BlobRegistry,
    mem: &MachineMemory,
    tables: &mut dyn TableRegistry,
    installed: &mut Vec<TableKey>,
    seen: &mut BTreeSet<u64>,
) -> Result<(), LoaderError> {
    let pointer_name = BlobName::parse(&cmd.pointer_file)?;
    let pointee_name = BlobName::parse(&cmd.pointee_file)?;

    // The first pass vouched for both blobs and the slot bounds.
    let pointer_blob = registry.get(&pointer_name).ok_or_else(|| {
        LoaderError::BadScript(format!("invalid blob reference \"{pointer_name}\""))
    })?;
    let value = mem.read_le(
        pointer_blob.base + u64::from(cmd.pointer_offset),
        cmd.pointer_size,
    )?;

    if !seen.insert(value) {
        debug!("pointer target {value:#x} already processed, skipping");
        return Ok(());
    }

    let pointee = registry.get_mut(&pointee_name).ok_or_else(|| {
        LoaderError::BadScript(format!("invalid blob reference \"{pointee_name}\""))
    })?;
    debug_assert!(value >= pointee.base && value < pointee.base + pointee.size);
    let remaining = pointee.base + pointee.size - value;

    let info = match probe_table(mem, value, remaining)? {
        Some(info) => info,
        None => {
            debug!(
                "no table at {:#x} in \"{}\"; marking blob as opaque",
                value, pointee_name
            );
            pointee.opaque = true;
            return Ok(());
        }
    };

    debug!(
        "found \"{}\" size {:#x} at {:#x}",
        info.signature.escape_ascii(),
        info.length,
        value
    );

    // The platform registry synthesises the root tables itself.
    if info.is_root_table() {
        return Ok(());
    }

    if installed.len() == INSTALLED_MAX {
        seen.remove(&value);
        return Err(LoaderError::TooMany(INSTALLED_MAX));
    }

    let mut table = vec![0u8; info.length as usize];
    mem.read(value, &mut table)?;
    match tables.install(&table) {
        Ok(key) => {
            installed.push(key);
            Ok(())
        }
        Err(e) => {
            seen.remove(&value);
            Err(e)
        }
    }
}
