//! First-pass command handlers.
//!
//! Each handler validates its command against the current registry state
//! and performs the side effect: materialising a blob, patching a pointer
//! field, storing a checksum, or publishing an address to the host. Range
//! arithmetic is written in the `size - width >= offset` form so it cannot
//! wrap, and every name field is checked for NUL termination before use.

use crate::acpi::checksum8;
use crate::alloc::MemoryClass;
use crate::blob::{Blob, BlobName, BlobRegistry};
use crate::error::LoaderError;
use crate::mem::{size_to_pages, PAGE_SIZE};
use crate::measure::MeasureKind;
use crate::replay::{PointerWrite, ReplayLog};
use crate::script::{AddChecksum, AddPointer, Allocate, WritePointer};
use log::debug;

use super::Platform;
use std::collections::BTreeSet;

/// Widths a pointer field may have, in bytes.
fn valid_pointer_size(size: u8) -> bool {
    matches!(size, 1 | 2 | 4 | 8)
}

/// True when `value` fits in `width` bytes.
fn fits_width(value: u64, width: u8) -> bool {
    width >= 8 || value >> (u32::from(width) * 8) == 0
}

/// Materialise the named transport item into freshly allocated pages and
/// register it.
pub(super) fn allocate(
    cmd: &Allocate,
    restricted: &BTreeSet<BlobName>,
    registry: &mut BlobRegistry,
    platform: &mut Platform<'_>,
) -> Result<(), LoaderError> {
    let name = BlobName::parse(&cmd.file)?;

    if u64::from(cmd.alignment) > PAGE_SIZE {
        return Err(LoaderError::UnsupportedAlignment(cmd.alignment));
    }

    let (item, size) = platform.transport.find(name.as_str())?;
    let pages = size_to_pages(u64::from(size));

    let ceiling = if restricted.contains(&name) {
        u64::from(u32::MAX)
    } else {
        u64::MAX
    };
    let base = platform
        .allocator
        .alloc_pages(MemoryClass::AcpiNvs, pages, ceiling)?;

    let blob = Blob {
        name,
        size: u64::from(size),
        base,
        pages,
        opaque: false,
    };
    if let Err(e) = registry.insert(blob) {
        // Not ours after all; the colliding entry keeps its own pages.
        let _ = platform.allocator.free_pages(base, pages);
        return Err(e);
    }

    let mut data = vec![0u8; size as usize];
    platform.transport.select(item)?;
    platform.transport.read(&mut data)?;
    platform.mem.write(base, &data)?;
    platform
        .mem
        .zero(base + u64::from(size), pages * PAGE_SIZE - u64::from(size))?;

    debug!(
        "allocate: file \"{}\" alignment {:#x} zone {} size {:#x} base {:#x}",
        name, cmd.alignment, cmd.zone, size, base
    );

    // Measure the hypervisor-provided bytes before any patch touches them.
    platform.measure.measure(MeasureKind::TableData, &data);

    Ok(())
}

/// Patch a pointer field inside one registered blob to carry the absolute
/// address of a location inside another.
pub(super) fn add_pointer(
    cmd: &AddPointer,
    registry: &BlobRegistry,
    platform: &Platform<'_>,
) -> Result<(), LoaderError> {
    let pointer_name = BlobName::parse(&cmd.pointer_file)?;
    let pointee_name = BlobName::parse(&cmd.pointee_file)?;

    let (pointer_blob, pointee_blob) =
        match (registry.get(&pointer_name), registry.get(&pointee_name)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(LoaderError::BadScript(format!(
                    "invalid blob reference(s) \"{pointer_name}\" / \"{pointee_name}\""
                )))
            }
        };

    let width = cmd.pointer_size;
    if !valid_pointer_size(width)
        || pointer_blob.size < u64::from(width)
        || pointer_blob.size - u64::from(width) < u64::from(cmd.pointer_offset)
    {
        return Err(LoaderError::BadScript(format!(
            "invalid pointer location or size in \"{pointer_name}\""
        )));
    }

    let slot = pointer_blob.base + u64::from(cmd.pointer_offset);
    let value = platform.mem.read_le(slot, width)?;
    if value >= pointee_blob.size {
        return Err(LoaderError::BadScript(format!(
            "invalid pointer value in \"{pointer_name}\""
        )));
    }

    // The allocator never hands out a range whose end wraps.
    debug_assert!(pointee_blob.base <= u64::MAX - pointee_blob.size);
    let value = value + pointee_blob.base;
    if !fits_width(value, width) {
        return Err(LoaderError::BadScript(format!(
            "relocated pointer value unrepresentable in \"{pointer_name}\""
        )));
    }

    platform.mem.write_le(slot, width, value)?;

    debug!(
        "add_pointer: \"{}\" + {:#x} ({} bytes) -> \"{}\"",
        pointer_name, cmd.pointer_offset, width, pointee_name
    );
    Ok(())
}

/// Store the 8-bit checksum of a blob range at a result offset inside the
/// same blob.
pub(super) fn add_checksum(
    cmd: &AddChecksum,
    registry: &BlobRegistry,
    platform: &Platform<'_>,
) -> Result<(), LoaderError> {
    let name = BlobName::parse(&cmd.file)?;
    let blob = registry.get(&name).ok_or_else(|| {
        LoaderError::BadScript(format!("invalid blob reference \"{name}\""))
    })?;

    if blob.size <= u64::from(cmd.result_offset)
        || blob.size < u64::from(cmd.length)
        || blob.size - u64::from(cmd.length) < u64::from(cmd.start)
    {
        return Err(LoaderError::BadScript(format!(
            "invalid checksum range in \"{name}\""
        )));
    }

    let mut range = vec![0u8; cmd.length as usize];
    platform.mem.read(blob.base + u64::from(cmd.start), &mut range)?;
    platform
        .mem
        .write(blob.base + u64::from(cmd.result_offset), &[checksum8(&range)])?;

    debug!(
        "add_checksum: \"{}\" result {:#x} start {:#x} length {:#x}",
        name, cmd.result_offset, cmd.start, cmd.length
    );
    Ok(())
}

/// Publish a blob address to the host by writing it into a transport item.
pub(super) fn write_pointer(
    cmd: &WritePointer,
    registry: &mut BlobRegistry,
    platform: &mut Platform<'_>,
    replay: &mut Option<Box<dyn ReplayLog>>,
) -> Result<(), LoaderError> {
    let pointer_name = BlobName::parse(&cmd.pointer_file)?;
    let pointee_name = BlobName::parse(&cmd.pointee_file)?;

    // The pointer file is a transport item, not a blob. A lookup miss is a
    // script defect here, unlike the allocate path.
    let found = platform.transport.find(pointer_name.as_str()).ok();
    let (item, item_size) = match (found, registry.contains(&pointee_name)) {
        (Some(found), true) => found,
        _ => {
            return Err(LoaderError::BadScript(format!(
                "invalid transport item or blob reference \"{pointer_name}\" / \"{pointee_name}\""
            )))
        }
    };

    let width = cmd.pointer_size;
    if !valid_pointer_size(width)
        || u64::from(item_size) < u64::from(width)
        || u64::from(item_size) - u64::from(width) < u64::from(cmd.pointer_offset)
    {
        return Err(LoaderError::BadScript(format!(
            "invalid pointer location or size in \"{pointer_name}\""
        )));
    }

    let pointee = registry
        .get_mut(&pointee_name)
        .ok_or_else(|| LoaderError::BadScript(format!("invalid blob reference \"{pointee_name}\"")))?;
    if u64::from(cmd.pointee_offset) >= pointee.size {
        return Err(LoaderError::BadScript(format!(
            "invalid pointee offset in \"{pointee_name}\""
        )));
    }

    debug_assert!(pointee.base <= u64::MAX - pointee.size);
    let value = pointee.base + u64::from(cmd.pointee_offset);
    if !fits_width(value, width) {
        return Err(LoaderError::BadScript(format!(
            "pointer value unrepresentable in \"{pointer_name}\""
        )));
    }

    // The condensed record must be durable before the host can observe
    // the write; an append failure aborts with the transport untouched.
    if let Some(log) = replay {
        log.append(&PointerWrite {
            item,
            width,
            offset: cmd.pointer_offset,
            value,
        })?;
    }

    platform.transport.select(item)?;
    platform.transport.skip(cmd.pointer_offset)?;
    platform
        .transport
        .write(&value.to_le_bytes()[..width as usize])?;

    // The host now knows this blob's address; it must survive commit.
    pointee.opaque = true;

    debug!(
        "write_pointer: \"{}\" + {:#x} ({} bytes) <- \"{}\" + {:#x}",
        pointer_name, cmd.pointer_offset, width, pointee_name, cmd.pointee_offset
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_pointer_sizes() {
        for size in [1u8, 2, 4, 8] {
            assert!(valid_pointer_size(size));
        }
        for size in [0u8, 3, 5, 6, 7, 9, 16] {
            assert!(!valid_pointer_size(size));
        }
    }

    #[test]
    fn test_fits_width() {
        assert!(fits_width(0xff, 1));
        assert!(!fits_width(0x100, 1));
        assert!(fits_width(0xffff_ffff, 4));
        assert!(!fits_width(0x1_0000_0000, 4));
        assert!(fits_width(u64::MAX, 8));
    }
}
