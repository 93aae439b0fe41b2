//! Loader script wire format.
//!
//! The hypervisor publishes an ordered command sequence under the
//! `etc/table-loader` transport item. Each command occupies a fixed
//! 128-byte record: a 4-byte little-endian discriminator followed by a
//! command-specific payload, padded to the record size. File name fields
//! are 56-byte ASCII buffers padded with NUL.
//!
//! The parser validates only the outer framing (total length must be a
//! whole number of records). Field-level rules, such as NUL termination
//! of names and offset bounds, are enforced by the command handlers, so a
//! malformed record fails exactly when it is executed, and records after a
//! failing one are never interpreted. Records with an unrecognised
//! discriminator decode to [`Command::Unknown`] and are skipped by the
//! executor.

use crate::error::LoaderError;

/// Transport item holding the loader script itself.
pub const SCRIPT_ITEM: &str = "etc/table-loader";

/// Fixed size of a file name field, including the terminating NUL.
pub const FNAME_SIZE: usize = 56;

/// Fixed size of one command record.
pub const RECORD_SIZE: usize = 128;

/// An unvalidated file name field, exactly as it appears on the wire.
pub type RawName = [u8; FNAME_SIZE];

/// Materialise a blob from a transport item.
#[derive(Clone, Copy, Debug)]
pub struct Allocate {
    pub file: RawName,
    pub alignment: u32,
    pub zone: u8,
}

/// Relocate a pointer field inside one blob to target another blob.
#[derive(Clone, Copy, Debug)]
pub struct AddPointer {
    pub pointer_file: RawName,
    pub pointee_file: RawName,
    pub pointer_offset: u32,
    pub pointer_size: u8,
}

/// Store an 8-bit checksum over a byte range of a blob.
#[derive(Clone, Copy, Debug)]
pub struct AddChecksum {
    pub file: RawName,
    pub result_offset: u32,
    pub start: u32,
    pub length: u32,
}

/// Write a blob address back into a host-visible transport item.
#[derive(Clone, Copy, Debug)]
pub struct WritePointer {
    pub pointer_file: RawName,
    pub pointee_file: RawName,
    pub pointer_offset: u32,
    pub pointee_offset: u32,
    pub pointer_size: u8,
}

/// One decoded script record.
#[derive(Clone, Copy, Debug)]
pub enum Command {
    Allocate(Allocate),
    AddPointer(AddPointer),
    AddChecksum(AddChecksum),
    WritePointer(WritePointer),
    /// Unrecognised discriminator; carried for diagnostics, never executed.
    Unknown(u32),
}

const KIND_ALLOCATE: u32 = 1;
const KIND_ADD_POINTER: u32 = 2;
const KIND_ADD_CHECKSUM: u32 = 3;
const KIND_WRITE_POINTER: u32 = 4;

/// A validated loader script: a whole number of fixed-size records.
pub struct Script {
    bytes: Vec<u8>,
}

impl Script {
    /// Wrap raw script bytes, checking the outer framing.
    pub fn parse(bytes: Vec<u8>) -> Result<Self, LoaderError> {
        if bytes.len() % RECORD_SIZE != 0 {
            return Err(LoaderError::BadScript(format!(
                "script size {:#x} is not a multiple of the {}-byte record size",
                bytes.len(),
                RECORD_SIZE
            )));
        }
        Ok(Self { bytes })
    }

    /// The raw script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of records in the script.
    pub fn len(&self) -> usize {
        self.bytes.len() / RECORD_SIZE
    }

    /// True if the script holds no records.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the record at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn get(&self, index: usize) -> Command {
        let rec = &self.bytes[index * RECORD_SIZE..(index + 1) * RECORD_SIZE];
        decode(rec)
    }

    /// Iterate over the records in script order.
    pub fn commands(&self) -> impl Iterator<Item = Command> + '_ {
        self.bytes.chunks_exact(RECORD_SIZE).map(decode)
    }
}

fn read_u32(rec: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([rec[offset], rec[offset + 1], rec[offset + 2], rec[offset + 3]])
}

fn read_name(rec: &[u8], offset: usize) -> RawName {
    let mut name = [0u8; FNAME_SIZE];
    name.copy_from_slice(&rec[offset..offset + FNAME_SIZE]);
    name
}

fn decode(rec: &[u8]) -> Command {
    debug_assert_eq!(rec.len(), RECORD_SIZE);
    match read_u32(rec, 0) {
        KIND_ALLOCATE => Command::Allocate(Allocate {
            file: read_name(rec, 4),
            alignment: read_u32(rec, 60),
            zone: rec[64],
        }),
        KIND_ADD_POINTER => Command::AddPointer(AddPointer {
            pointer_file: read_name(rec, 4),
            pointee_file: read_name(rec, 60),
            pointer_offset: read_u32(rec, 116),
            pointer_size: rec[120],
        }),
        KIND_ADD_CHECKSUM => Command::AddChecksum(AddChecksum {
            file: read_name(rec, 4),
            result_offset: read_u32(rec, 60),
            start: read_u32(rec, 64),
            length: read_u32(rec, 68),
        }),
        KIND_WRITE_POINTER => Command::WritePointer(WritePointer {
            pointer_file: read_name(rec, 4),
            pointee_file: read_name(rec, 60),
            pointer_offset: read_u32(rec, 116),
            pointee_offset: read_u32(rec, 120),
            pointer_size: rec[124],
        }),
        kind => Command::Unknown(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_bytes(s: &str) -> RawName {
        let mut name = [0u8; FNAME_SIZE];
        name[..s.len()].copy_from_slice(s.as_bytes());
        name
    }

    fn record(kind: u32, fill: impl FnOnce(&mut [u8])) -> Vec<u8> {
        let mut rec = vec![0u8; RECORD_SIZE];
        rec[..4].copy_from_slice(&kind.to_le_bytes());
        fill(&mut rec);
        rec
    }

    #[test]
    fn test_rejects_partial_record() {
        assert!(Script::parse(vec![0u8; RECORD_SIZE + 1]).is_err());
        assert!(Script::parse(vec![0u8; RECORD_SIZE - 4]).is_err());
    }

    #[test]
    fn test_empty_script() {
        let script = Script::parse(Vec::new()).unwrap();
        assert!(script.is_empty());
        assert_eq!(script.commands().count(), 0);
    }

    #[test]
    fn test_decode_allocate() {
        let rec = record(1, |r| {
            r[4..8].copy_from_slice(b"dsdt");
            r[60..64].copy_from_slice(&4096u32.to_le_bytes());
            r[64] = 2;
        });
        let script = Script::parse(rec).unwrap();
        match script.get(0) {
            Command::Allocate(a) => {
                assert_eq!(a.file, name_bytes("dsdt"));
                assert_eq!(a.alignment, 4096);
                assert_eq!(a.zone, 2);
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn test_decode_add_pointer() {
        let rec = record(2, |r| {
            r[4..8].copy_from_slice(b"rsdt");
            r[60..64].copy_from_slice(b"dsdt");
            r[116..120].copy_from_slice(&36u32.to_le_bytes());
            r[120] = 4;
        });
        let script = Script::parse(rec).unwrap();
        match script.get(0) {
            Command::AddPointer(p) => {
                assert_eq!(p.pointer_file, name_bytes("rsdt"));
                assert_eq!(p.pointee_file, name_bytes("dsdt"));
                assert_eq!(p.pointer_offset, 36);
                assert_eq!(p.pointer_size, 4);
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn test_decode_add_checksum() {
        let rec = record(3, |r| {
            r[4..8].copy_from_slice(b"dsdt");
            r[60..64].copy_from_slice(&9u32.to_le_bytes());
            r[64..68].copy_from_slice(&0u32.to_le_bytes());
            r[68..72].copy_from_slice(&0x1000u32.to_le_bytes());
        });
        let script = Script::parse(rec).unwrap();
        match script.get(0) {
            Command::AddChecksum(c) => {
                assert_eq!(c.result_offset, 9);
                assert_eq!(c.start, 0);
                assert_eq!(c.length, 0x1000);
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn test_decode_write_pointer() {
        let rec = record(4, |r| {
            r[4..12].copy_from_slice(b"etc/anch");
            r[60..64].copy_from_slice(b"blob");
            r[116..120].copy_from_slice(&8u32.to_le_bytes());
            r[120..124].copy_from_slice(&16u32.to_le_bytes());
            r[124] = 8;
        });
        let script = Script::parse(rec).unwrap();
        match script.get(0) {
            Command::WritePointer(w) => {
                assert_eq!(w.pointer_file, name_bytes("etc/anch"));
                assert_eq!(w.pointee_file, name_bytes("blob"));
                assert_eq!(w.pointer_offset, 8);
                assert_eq!(w.pointee_offset, 16);
                assert_eq!(w.pointer_size, 8);
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_kind() {
        let rec = record(0x77, |_| {});
        let script = Script::parse(rec).unwrap();
        assert!(matches!(script.get(0), Command::Unknown(0x77)));
    }

    #[test]
    fn test_multiple_records() {
        let mut bytes = record(1, |_| {});
        bytes.extend(record(3, |_| {}));
        bytes.extend(record(9, |_| {}));
        let script = Script::parse(bytes).unwrap();
        assert_eq!(script.len(), 3);
        let kinds: Vec<_> = script.commands().collect();
        assert!(matches!(kinds[0], Command::Allocate(_)));
        assert!(matches!(kinds[1], Command::AddChecksum(_)));
        assert!(matches!(kinds[2], Command::Unknown(9)));
    }
}
