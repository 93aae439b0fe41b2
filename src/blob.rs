//! Named blob records and the registry that owns them.
//!
//! Every `allocate` command materialises one blob: a transport item copied
//! into page-aligned machine memory. The registry maps blob names to their
//! records for the pointer and checksum commands, and is drained during
//! teardown, when each blob's pages are freed or retained depending on the
//! outcome and the blob's `opaque` flag.

use crate::error::LoaderError;
use crate::script::{RawName, FNAME_SIZE};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

/// A bounded, NUL-terminated ASCII blob name; the registry ordering key.
///
/// The buffer is normalised on parse: bytes after the first NUL are
/// cleared, so derived ordering and equality agree with C-string
/// comparison of the wire field.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlobName([u8; FNAME_SIZE]);

impl BlobName {
    /// Validate and normalise a wire name field.
    ///
    /// Fails `BadScript` unless the final byte is NUL, which guarantees
    /// the buffer holds a terminated string.
    pub fn parse(raw: &RawName) -> Result<Self, LoaderError> {
        if raw[FNAME_SIZE - 1] != 0 {
            return Err(LoaderError::BadScript(
                "unterminated file name field".into(),
            ));
        }
        let mut name = [0u8; FNAME_SIZE];
        let len = raw.iter().position(|&b| b == 0).unwrap_or(0);
        name[..len].copy_from_slice(&raw[..len]);
        Ok(Self(name))
    }

    /// Build a name from a string; `None` if it does not fit.
    pub fn new(s: &str) -> Option<Self> {
        if s.len() >= FNAME_SIZE || !s.is_ascii() {
            return None;
        }
        let mut name = [0u8; FNAME_SIZE];
        name[..s.len()].copy_from_slice(s.as_bytes());
        Some(Self(name))
    }

    /// The name as a string slice, without the NUL padding.
    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(0);
        // Normalised in parse()/new(); names are ASCII on the wire.
        std::str::from_utf8(&self.0[..len]).unwrap_or("")
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobName({:?})", self.as_str())
    }
}

/// A transport item materialised into page-aligned machine memory.
#[derive(Debug)]
pub struct Blob {
    /// Registry key; unique.
    pub name: BlobName,
    /// Byte length as reported by the transport at allocate time.
    pub size: u64,
    /// Absolute machine address of the backing allocation.
    pub base: u64,
    /// Whole pages allocated; the tail beyond `size` is zeroed.
    pub pages: u64,
    /// False while the blob hosts only bytes that are directly part of
    /// ACPI tables. Set once the host learns the blob's address through a
    /// `write_pointer`, or once the second pass finds a pointed-to region
    /// that is not a table. Opaque blobs survive a successful run.
    pub opaque: bool,
}

/// Ordered map of blobs keyed by name.
///
/// Iteration and drain order is the name order, which keeps teardown
/// logging deterministic.
#[derive(Default)]
pub struct BlobRegistry {
    blobs: BTreeMap<BlobName, Blob>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a blob under its name; duplicate names fail `BadScript`
    /// without replacing the existing entry.
    pub fn insert(&mut self, blob: Blob) -> Result<(), LoaderError> {
        match self.blobs.entry(blob.name) {
            btree_map::Entry::Occupied(_) => Err(LoaderError::BadScript(format!(
                "duplicated file \"{}\"",
                blob.name
            ))),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(blob);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &BlobName) -> Option<&Blob> {
        self.blobs.get(name)
    }

    pub fn get_mut(&mut self, name: &BlobName) -> Option<&mut Blob> {
        self.blobs.get_mut(name)
    }

    pub fn contains(&self, name: &BlobName) -> bool {
        self.blobs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Blob> {
        self.blobs.values()
    }

    /// Remove and yield every blob in name order.
    pub fn drain(&mut self) -> impl Iterator<Item = Blob> + '_ {
        std::mem::take(&mut self.blobs).into_values()
    }
}
