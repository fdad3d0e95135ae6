//! Conduit Driver - Capture Backend
//!
//! The consumer that exposes the shared stream as a system microphone.
//! In the shipped product this logic lives in a kernel-mode audio
//! driver; this crate holds everything about it that is independent of
//! the driver model, with the same behavior the kernel side must
//! reproduce bit-for-bit:
//! - Attach through the privileged object namespace ([`DriverReader`])
//! - The advertised format matrix and float32 → PCM conversion
//!   ([`CaptureFormat`], [`convert_from_f32`])
//! - A ~5 ms periodic pump from region to sink ([`CaptureService`]),
//!   the analog of the driver's timer DPC filling the DMA buffer
//!
//! Driver-model plumbing (PnP, power, filter factories, pin descriptors)
//! stays with the driver project; only the transport consumer is here.

mod capture;
mod error;
mod format;
mod reader;

pub use capture::{CaptureService, CaptureSink, POLL_INTERVAL};
pub use error::{DriverError, DriverResult};
pub use format::{convert_from_f32, CaptureFormat, SampleFormat, SUPPORTED_RATES};
pub use reader::DriverReader;

// Re-export namespace selection for embedders wiring up attach paths
pub use conduit_protocol::Namespace;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify public API is accessible
        assert_eq!(SUPPORTED_RATES, [44_100, 48_000]);
        assert_eq!(POLL_INTERVAL.as_millis(), 5);
    }
}
