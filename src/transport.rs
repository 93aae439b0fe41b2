//! Firmware-configuration transport interface.
//!
//! The hypervisor exposes named byte items through a key/value transport
//! with an implicit selected-item cursor: the firmware looks an item up by
//! name, selects it, then reads, skips, or writes sequentially from the
//! cursor. The loader re-selects before every contiguous I/O sequence and
//! never interleaves transport work with anything that could move the
//! cursor, so implementations only need one cursor of state.
//!
//! [`MemTransport`] is the in-memory reference implementation used by the
//! dry-run harness and the tests.

use crate::error::LoaderError;

/// Opaque transport item selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ItemId(pub u16);

/// A key/value firmware-configuration transport.
pub trait Transport {
    /// Look up an item by name, returning its selector and byte size.
    fn find(&mut self, name: &str) -> Result<(ItemId, u32), LoaderError>;

    /// Select an item, resetting the cursor to its first byte.
    fn select(&mut self, item: ItemId) -> Result<(), LoaderError>;

    /// Read exactly `buf.len()` bytes from the cursor, advancing it.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), LoaderError>;

    /// Advance the cursor by `n` bytes without transferring data.
    fn skip(&mut self, n: u32) -> Result<(), LoaderError>;

    /// Write `buf` at the cursor, advancing it.
    fn write(&mut self, buf: &[u8]) -> Result<(), LoaderError>;
}

/// In-memory transport: named byte items with a single cursor.
///
/// Items are assigned selectors in insertion order. Writes persist and are
/// visible through [`MemTransport::data`], which is what the rollback
/// tests use to check that reverted pointer slots read back as zero.
#[derive(Default)]
pub struct MemTransport {
    items: Vec<(String, Vec<u8>)>,
    selected: Option<(usize, usize)>,
}

impl MemTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item; later duplicates shadow nothing and are never found.
    pub fn add(&mut self, name: &str, data: Vec<u8>) {
        self.items.push((name.to_string(), data));
    }

    /// Current bytes of a named item, if present.
    pub fn data(&self, name: &str) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }

    fn cursor(&mut self) -> Result<(usize, usize), LoaderError> {
        self.selected
            .ok_or_else(|| LoaderError::Transport("no item selected".into()))
    }
}

impl Transport for MemTransport {
    fn find(&mut self, name: &str) -> Result<(ItemId, u32), LoaderError> {
        self.items
            .iter()
            .position(|(n, _)| n == name)
            .map(|idx| (ItemId(idx as u16), self.items[idx].1.len() as u32))
            .ok_or_else(|| LoaderError::NotFound(name.to_string()))
    }

    fn select(&mut self, item: ItemId) -> Result<(), LoaderError> {
        let idx = item.0 as usize;
        if idx >= self.items.len() {
            return Err(LoaderError::Transport(format!(
                "selector {:#x} out of range",
                item.0
            )));
        }
        self.selected = Some((idx, 0));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), LoaderError> {
        let (idx, pos) = self.cursor()?;
        let data = &self.items[idx].1;
        if data.len() - pos < buf.len() {
            return Err(LoaderError::Transport(format!(
                "read of {} bytes past end of \"{}\"",
                buf.len(),
                self.items[idx].0
            )));
        }
        buf.copy_from_slice(&data[pos..pos + buf.len()]);
        self.selected = Some((idx, pos + buf.len()));
        Ok(())
    }

    fn skip(&mut self, n: u32) -> Result<(), LoaderError> {
        let (idx, pos) = self.cursor()?;
        let end = pos + n as usize;
        if end > self.items[idx].1.len() {
            return Err(LoaderError::Transport(format!(
                "skip past end of \"{}\"",
                self.items[idx].0
            )));
        }
        self.selected = Some((idx, end));
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), LoaderError> {
        let (idx, pos) = self.cursor()?;
        let data = &mut self.items[idx].1;
        if data.len() - pos < buf.len() {
            return Err(LoaderError::Transport(format!(
                "write of {} bytes past end of \"{}\"",
                buf.len(),
                self.items[idx].0
            )));
        }
        data[pos..pos + buf.len()].copy_from_slice(buf);
        self.selected = Some((idx, pos + buf.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_reports_size() {
        let mut t = MemTransport::new();
        t.add("etc/acpi/tables", vec![0u8; 100]);
        t.add("etc/acpi/rsdp", vec![0u8; 20]);
        let (item, size) = t.find("etc/acpi/rsdp").unwrap();
        assert_eq!(item, ItemId(1));
        assert_eq!(size, 20);
    }

    #[test]
    fn test_find_miss() {
        let mut t = MemTransport::new();
        assert!(matches!(
            t.find("etc/nope"),
            Err(LoaderError::NotFound(_))
        ));
    }

    #[test]
    fn test_read_skip_sequence() {
        let mut t = MemTransport::new();
        t.add("item", (0u8..10).collect());
        let (item, _) = t.find("item").unwrap();
        t.select(item).unwrap();
        t.skip(3).unwrap();
        let mut buf = [0u8; 4];
        t.read(&mut buf).unwrap();
        assert_eq!(buf, [3, 4, 5, 6]);
        t.read(&mut buf[..3]).unwrap();
        assert_eq!(&buf[..3], &[7, 8, 9]);
        assert!(t.read(&mut buf[..1]).is_err());
    }

    #[test]
    fn test_select_resets_cursor() {
        let mut t = MemTransport::new();
        t.add("item", vec![1, 2, 3, 4]);
        let (item, _) = t.find("item").unwrap();
        t.select(item).unwrap();
        t.skip(2).unwrap();
        t.select(item).unwrap();
        let mut b = [0u8; 1];
        t.read(&mut b).unwrap();
        assert_eq!(b[0], 1);
    }

    #[test]
    fn test_write_persists() {
        let mut t = MemTransport::new();
        t.add("anchor", vec![0u8; 8]);
        let (item, _) = t.find("anchor").unwrap();
        t.select(item).unwrap();
        t.skip(2).unwrap();
        t.write(&[0xaa, 0xbb]).unwrap();
        assert_eq!(t.data("anchor").unwrap(), &[0, 0, 0xaa, 0xbb, 0, 0, 0, 0]);
    }

    #[test]
    fn test_io_without_selection() {
        let mut t = MemTransport::new();
        t.add("item", vec![0u8; 4]);
        let mut buf = [0u8; 1];
        assert!(t.read(&mut buf).is_err());
        assert!(t.write(&buf).is_err());
        assert!(t.skip(1).is_err());
    }
}
