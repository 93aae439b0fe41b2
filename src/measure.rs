//! Measurement interface for attestation.
//!
//! Hypervisor-provided bytes are measured into the platform's attestation
//! sink before the loader patches them, so the attested values always
//! match what the hypervisor actually supplied. The sink observes the raw
//! loader script once and each blob's initial contents once.

/// What a measured byte payload is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeasureKind {
    /// The raw loader script.
    LoaderScript,
    /// A blob's contents as read from the transport, before patching.
    TableData,
}

/// An attestation sink.
///
/// Measurement is infallible from the loader's point of view: a sink that
/// cannot record an event keeps that state to itself, and the loader's
/// commit-or-rollback guarantees do not extend to it.
pub trait MeasurementSink {
    fn measure(&mut self, kind: MeasureKind, data: &[u8]);
}

/// Sink for platforms without attestation.
#[derive(Default)]
pub struct NullSink;

impl MeasurementSink for NullSink {
    fn measure(&mut self, _kind: MeasureKind, _data: &[u8]) {}
}
