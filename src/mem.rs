//! Machine memory access using the vm-memory crate.
//!
//! The loader patches hypervisor-provided blobs in place, so it needs
//! byte-level access to the machine address space the page allocator hands
//! out addresses in. `MachineMemory` wraps `vm_memory::GuestMemoryMmap` to
//! provide bounded reads and writes at absolute addresses, plus the
//! variable-width little-endian codec the pointer commands rely on.
//!
//! Addresses are unsigned 64-bit throughout. A firmware build maps the
//! whole address space identity-style; tests and the dry-run harness map
//! only the windows they need, which also makes it cheap to place a region
//! above 4 GiB and exercise the narrow-pointer placement rules for real.

use thiserror::Error;
use vm_memory::{Bytes, GuestAddress, GuestMemoryMmap};

/// Machine page size in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Number of whole pages needed to hold `size` bytes.
pub fn size_to_pages(size: u64) -> u64 {
    size.div_ceil(PAGE_SIZE)
}

/// Errors from machine memory setup and access.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("failed to map memory: {0}")]
    Map(String),

    #[error("access out of bounds at {addr:#x} ({len} bytes)")]
    OutOfBounds { addr: u64, len: usize },
}

/// A set of mmap-backed machine memory regions.
pub struct MachineMemory {
    inner: GuestMemoryMmap,
}

impl MachineMemory {
    /// Map a single region of `size` bytes starting at address 0.
    pub fn new(size: u64) -> Result<Self, MemoryError> {
        Self::with_regions(&[(0, size)])
    }

    /// Map one region per `(base, size)` entry.
    ///
    /// Regions must not overlap. Accesses that straddle a region boundary
    /// or touch an unmapped address fail with `OutOfBounds`.
    pub fn with_regions(regions: &[(u64, u64)]) -> Result<Self, MemoryError> {
        let ranges: Vec<(GuestAddress, usize)> = regions
            .iter()
            .map(|&(base, size)| (GuestAddress(base), size as usize))
            .collect();

        let inner = GuestMemoryMmap::from_ranges(&ranges)
            .map_err(|e| MemoryError::Map(e.to_string()))?;

        Ok(Self { inner })
    }

    /// Write bytes at an absolute machine address.
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<(), MemoryError> {
        self.inner
            .write_slice(data, GuestAddress(addr))
            .map_err(|_| MemoryError::OutOfBounds {
                addr,
                len: data.len(),
            })
    }

    /// Read bytes from an absolute machine address into a buffer.
    pub fn read(&self, addr: u64, data: &mut [u8]) -> Result<(), MemoryError> {
        self.inner
            .read_slice(data, GuestAddress(addr))
            .map_err(|_| MemoryError::OutOfBounds {
                addr,
                len: data.len(),
            })
    }

    /// Zero `len` bytes starting at `addr`.
    pub fn zero(&self, addr: u64, len: u64) -> Result<(), MemoryError> {
        let chunk = [0u8; 512];
        let mut done = 0u64;
        while done < len {
            let n = (len - done).min(chunk.len() as u64) as usize;
            self.write(addr + done, &chunk[..n])?;
            done += n as u64;
        }
        Ok(())
    }

    /// Read a `width`-byte little-endian value, zero-extended to 64 bits.
    ///
    /// `width` must be in `1..=8`.
    pub fn read_le(&self, addr: u64, width: u8) -> Result<u64, MemoryError> {
        debug_assert!((1..=8).contains(&width));
        let mut bytes = [0u8; 8];
        self.read(addr, &mut bytes[..width as usize])?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Write the low `width` bytes of `value` in little-endian order.
    ///
    /// The caller is responsible for checking that `value` fits in `width`
    /// bytes; the high bytes are silently truncated here.
    pub fn write_le(&self, addr: u64, width: u8, value: u64) -> Result<(), MemoryError> {
        debug_assert!((1..=8).contains(&width));
        self.write(addr, &value.to_le_bytes()[..width as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_vec(mem: &MachineMemory, addr: u64, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        mem.read(addr, &mut data).unwrap();
        data
    }

    #[test]
    fn test_write_read() {
        let mem = MachineMemory::new(4096).unwrap();
        mem.write(16, &[1, 2, 3, 4]).unwrap();
        assert_eq!(read_vec(&mem, 16, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mem = MachineMemory::new(100).unwrap();
        assert!(mem.write(99, &[1, 2]).is_err());
        let mut buf = [0u8; 2];
        assert!(mem.read(99, &mut buf).is_err());
    }

    #[test]
    fn test_high_region() {
        let high = 1u64 << 32;
        let mem = MachineMemory::with_regions(&[(0, 4096), (high, 4096)]).unwrap();
        mem.write(high + 8, &[0xaa]).unwrap();
        assert_eq!(read_vec(&mem, high + 8, 1), vec![0xaa]);
        // The gap between regions is unmapped.
        assert!(mem.write(0x10_0000, &[0]).is_err());
    }

    #[test]
    fn test_zero() {
        let mem = MachineMemory::new(4096).unwrap();
        mem.write(0, &[0xff; 1024]).unwrap();
        mem.zero(100, 800).unwrap();
        assert_eq!(read_vec(&mem, 99, 1), vec![0xff]);
        assert_eq!(read_vec(&mem, 100, 800), vec![0u8; 800]);
        assert_eq!(read_vec(&mem, 900, 1), vec![0xff]);
    }

    #[test]
    fn test_read_le_widths() {
        let mem = MachineMemory::new(4096).unwrap();
        mem.write(0, &[0x78, 0x56, 0x34, 0x12, 0xff, 0xff, 0xff, 0xff])
            .unwrap();
        assert_eq!(mem.read_le(0, 1).unwrap(), 0x78);
        assert_eq!(mem.read_le(0, 2).unwrap(), 0x5678);
        assert_eq!(mem.read_le(0, 4).unwrap(), 0x1234_5678);
        assert_eq!(mem.read_le(0, 8).unwrap(), 0xffff_ffff_1234_5678);
    }

    #[test]
    fn test_write_le_widths() {
        let mem = MachineMemory::new(4096).unwrap();
        mem.write_le(8, 4, 0x1234_5678).unwrap();
        assert_eq!(read_vec(&mem, 8, 4), vec![0x78, 0x56, 0x34, 0x12]);
        mem.write_le(16, 2, 0xbeef).unwrap();
        assert_eq!(read_vec(&mem, 16, 2), vec![0xef, 0xbe]);
    }

    #[test]
    fn test_size_to_pages() {
        assert_eq!(size_to_pages(0), 0);
        assert_eq!(size_to_pages(1), 1);
        assert_eq!(size_to_pages(PAGE_SIZE), 1);
        assert_eq!(size_to_pages(PAGE_SIZE + 1), 2);
    }
}
