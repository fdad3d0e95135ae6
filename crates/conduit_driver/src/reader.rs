//! Privileged-Namespace Stream Reader
//!
//! Consumer of the shared stream from the capture backend's side. The
//! kernel addresses the producer's named section through the NT object
//! namespace (`\BaseNamedObjects\ConduitAudio`), which from user mode is
//! the `Global\` prefix; everything else - header validation, memory
//! ordering, partial reads - is bit-identical to the in-process
//! receiver, because both sides of the region must emit the same fences
//! or each corrupts the other.

use std::sync::Arc;

use conduit_protocol::{Namespace, SharedRegion, SharedRing, SHM_NAME};

use crate::error::DriverResult;

/// One capture stream's view of the shared region.
pub struct DriverReader {
    ring: SharedRing,
}

impl DriverReader {
    /// Open the well-known region through the privileged namespace.
    pub fn open() -> DriverResult<Self> {
        Self::open_named(SHM_NAME, Namespace::Global)
    }

    /// Open an explicitly named region (tests run unprivileged).
    pub fn open_named(name: &str, namespace: Namespace) -> DriverResult<Self> {
        let region = Arc::new(SharedRegion::attach_in_namespace(name, namespace)?);
        let ring = SharedRing::attach(region)?;

        tracing::info!(
            name,
            sample_rate = ring.sample_rate(),
            channels = ring.channels(),
            buffer_frames = ring.buffer_frames(),
            "capture reader attached"
        );

        Ok(Self { ring })
    }

    /// Read up to `max_frames` interleaved float32 frames.
    ///
    /// Safe to call from the periodic capture tick: no allocation, no
    /// blocking. Returns 0 when no data is available; the caller emits
    /// silence for the remainder of its period.
    pub fn read(&mut self, dst: &mut [f32], max_frames: usize) -> usize {
        self.ring.read(dst, max_frames)
    }

    /// Whether the producer still claims liveness (acquire).
    pub fn producer_active(&self) -> bool {
        self.ring.producer_active()
    }

    pub fn sample_rate(&self) -> u32 {
        self.ring.sample_rate()
    }

    pub fn channels(&self) -> u32 {
        self.ring.channels()
    }

    pub fn available_frames(&self) -> u32 {
        self.ring.available_read()
    }
}
