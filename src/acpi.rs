//! ACPI table recognition and the platform table registry interface.
//!
//! The second loader pass has to decide, for an arbitrary patched address
//! inside a blob, whether it points at an ACPI table. A standard table
//! starts with a 36-byte header (signature, 32-bit length, revision,
//! checksum, OEM identifiers) and its bytes sum to zero modulo 256 over
//! the whole length. The FACS breaks the pattern: it carries only a
//! signature and length, no checksum, and a 64-byte minimum size, so it
//! gets probed first with its own rule.

use crate::error::LoaderError;
use crate::mem::MachineMemory;

/// Size of the standard ACPI table header.
pub const HEADER_LEN: u64 = 36;

/// Minimum size of the firmware ACPI control structure.
pub const FACS_MIN_LEN: u64 = 64;

/// Signature of the firmware ACPI control structure.
pub const FACS_SIGNATURE: [u8; 4] = *b"FACS";

/// Root System Description Table signature.
pub const RSDT_SIGNATURE: [u8; 4] = *b"RSDT";

/// Extended System Description Table signature.
pub const XSDT_SIGNATURE: [u8; 4] = *b"XSDT";

/// Wrapping 8-bit sum of a byte slice.
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// The byte that makes the sum of `data` plus itself equal zero.
pub fn checksum8(data: &[u8]) -> u8 {
    let sum = sum8(data);
    (!sum).wrapping_add(1)
}

/// A recognised table candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableInfo {
    pub signature: [u8; 4],
    pub length: u32,
}

impl TableInfo {
    /// True for the two root tables the platform registry synthesises
    /// itself; the loader must not install these.
    pub fn is_root_table(&self) -> bool {
        self.signature == RSDT_SIGNATURE || self.signature == XSDT_SIGNATURE
    }
}

/// Probe the memory at `addr` for an ACPI table, using at most
/// `remaining` bytes.
///
/// Tries the FACS layout first (signature match, length within
/// `[64, remaining]`, no checksum), then the standard header (length
/// within `[36, remaining]` and a zero 8-bit sum over the whole table).
/// Returns `None` when neither matches; the region is then opaque data.
pub fn probe_table(
    mem: &MachineMemory,
    addr: u64,
    remaining: u64,
) -> Result<Option<TableInfo>, LoaderError> {
    if remaining < HEADER_LEN {
        return Ok(None);
    }

    let mut head = [0u8; 8];
    mem.read(addr, &mut head)?;
    let signature = [head[0], head[1], head[2], head[3]];
    let length = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);

    if remaining >= FACS_MIN_LEN
        && signature == FACS_SIGNATURE
        && u64::from(length) >= FACS_MIN_LEN
        && u64::from(length) <= remaining
    {
        return Ok(Some(TableInfo { signature, length }));
    }

    if u64::from(length) >= HEADER_LEN && u64::from(length) <= remaining {
        let mut table = vec![0u8; length as usize];
        mem.read(addr, &mut table)?;
        if sum8(&table) == 0 {
            return Ok(Some(TableInfo { signature, length }));
        }
    }

    Ok(None)
}

/// Opaque handle for an installed table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableKey(pub u64);

/// The platform's ACPI table registry.
///
/// The registry synthesises the RSDT and XSDT itself from the installed
/// set, which is why the loader skips candidates with those signatures.
pub trait TableRegistry {
    /// Install a table from its raw bytes, returning a handle for
    /// [`TableRegistry::uninstall`].
    fn install(&mut self, table: &[u8]) -> Result<TableKey, LoaderError>;

    /// Remove a previously installed table.
    fn uninstall(&mut self, key: TableKey) -> Result<(), LoaderError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a standard table with a valid checksum at byte 9.
    pub(crate) fn make_table(signature: &[u8; 4], length: usize) -> Vec<u8> {
        assert!(length >= HEADER_LEN as usize);
        let mut table = vec![0u8; length];
        table[..4].copy_from_slice(signature);
        table[4..8].copy_from_slice(&(length as u32).to_le_bytes());
        table[9] = checksum8(&table);
        table
    }

    /// Build a FACS image; the signature/length header is all that counts.
    pub(crate) fn make_facs(length: usize) -> Vec<u8> {
        assert!(length >= FACS_MIN_LEN as usize);
        let mut facs = vec![0u8; length];
        facs[..4].copy_from_slice(&FACS_SIGNATURE);
        facs[4..8].copy_from_slice(&(length as u32).to_le_bytes());
        facs
    }

    fn mem_with(bytes: &[u8]) -> MachineMemory {
        let mem = MachineMemory::new(0x10000).unwrap();
        mem.write(0x1000, bytes).unwrap();
        mem
    }

    #[test]
    fn test_checksum_cancels_sum() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let checksum = checksum8(&data);
        let mut whole = data.to_vec();
        whole.push(checksum);
        assert_eq!(sum8(&whole), 0);
    }

    #[test]
    fn test_probe_standard_table() {
        let table = make_table(b"SSDT", 100);
        let mem = mem_with(&table);
        let info = probe_table(&mem, 0x1000, 100).unwrap().unwrap();
        assert_eq!(info.signature, *b"SSDT");
        assert_eq!(info.length, 100);
    }

    #[test]
    fn test_probe_rejects_bad_checksum() {
        let mut table = make_table(b"SSDT", 100);
        table[20] ^= 1;
        let mem = mem_with(&table);
        assert!(probe_table(&mem, 0x1000, 100).unwrap().is_none());
    }

    #[test]
    fn test_probe_rejects_truncated_region() {
        let table = make_table(b"SSDT", 100);
        let mem = mem_with(&table);
        // Length says 100 but only 50 bytes remain in the blob.
        assert!(probe_table(&mem, 0x1000, 50).unwrap().is_none());
        assert!(probe_table(&mem, 0x1000, 35).unwrap().is_none());
    }

    #[test]
    fn test_probe_facs_skips_checksum() {
        let facs = make_facs(64);
        let mem = mem_with(&facs);
        // A FACS never checksums to zero by construction here; the FACS
        // rule must accept it anyway.
        assert_ne!(sum8(&facs), 0);
        let info = probe_table(&mem, 0x1000, 64).unwrap().unwrap();
        assert_eq!(info.signature, FACS_SIGNATURE);
        assert_eq!(info.length, 64);
    }

    #[test]
    fn test_probe_facs_needs_64_bytes() {
        let facs = make_facs(64);
        let mem = mem_with(&facs);
        assert!(probe_table(&mem, 0x1000, 63).unwrap().is_none());
    }

    #[test]
    fn test_root_table_detection() {
        let rsdt = TableInfo {
            signature: RSDT_SIGNATURE,
            length: 36,
        };
        let ssdt = TableInfo {
            signature: *b"SSDT",
            length: 36,
        };
        assert!(rsdt.is_root_table());
        assert!(!ssdt.is_root_table());
    }
}
