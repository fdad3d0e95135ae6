//! Shared Region Header
//!
//! Fixed 128-byte layout at the start of the shared region. The two
//! position counters each own a cache line so the producer and consumer
//! never false-share:
//!
//! ```text
//! Offset   Size  Field
//! 0        8     write_pos        (producer-owned, monotonic frames)
//! 64       8     read_pos         (consumer-owned, monotonic frames)
//! 72       4     sample_rate      (immutable after creation)
//! 76       4     channels         (1 or 2, immutable)
//! 80       4     buffer_frames    (power of two, immutable)
//! 84       4     version          (protocol version, currently 1)
//! 88       4     producer_active  (0/1 liveness flag, producer-owned)
//! 92       36    reserved         (zeroed)
//! 128            interleaved f32 sample data
//! ```
//!
//! The header is never cast to a struct across the process boundary;
//! [`HeaderView`] reads and writes each field at its wire offset through
//! atomics over the raw base pointer.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::ProtocolError;

/// Protocol version. Bumped for any ABI-breaking change to the header
/// or ring format.
pub const PROTOCOL_VERSION: u32 = 1;

/// Well-known name of the shared region in the OS named-object namespace.
/// The kernel consumer addresses the same object with a namespace prefix
/// (e.g. `\BaseNamedObjects\ConduitAudio` on Windows).
pub const SHM_NAME: &str = "ConduitAudio";

/// Total header size in bytes. Sample data starts at this offset.
pub const HEADER_BYTES: usize = 128;

/// Smallest accepted ring capacity in frames.
pub const MIN_BUFFER_FRAMES: u32 = 64;

/// Largest accepted ring capacity in frames (2^20, ~21s at 48kHz).
pub const MAX_BUFFER_FRAMES: u32 = 1 << 20;

/// Default channel count when the producer doesn't specify one.
pub const DEFAULT_CHANNELS: u32 = 2;

/// Default ring capacity when the producer doesn't specify one.
pub const DEFAULT_BUFFER_FRAMES: u32 = 32_768;

const BYTES_PER_SAMPLE: usize = 4; // f32

// Wire offsets. Part of the protocol contract - do not reorder.
const OFFSET_WRITE_POS: usize = 0;
const OFFSET_READ_POS: usize = 64;
const OFFSET_SAMPLE_RATE: usize = 72;
const OFFSET_CHANNELS: usize = 76;
const OFFSET_BUFFER_FRAMES: usize = 80;
const OFFSET_VERSION: usize = 84;
const OFFSET_PRODUCER_ACTIVE: usize = 88;

/// Total region size for a given geometry: header plus interleaved
/// float32 sample storage.
pub fn region_bytes(buffer_frames: u32, channels: u32) -> usize {
    HEADER_BYTES + buffer_frames as usize * channels as usize * BYTES_PER_SAMPLE
}

/// Immutable stream parameters, written once by the producer at region
/// creation and validated by every consumer on attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u32,
    pub buffer_frames: u32,
}

impl StreamParams {
    /// Check geometry without touching a region (used by producers
    /// before creating one).
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.buffer_frames.is_power_of_two()
            || self.buffer_frames < MIN_BUFFER_FRAMES
            || self.buffer_frames > MAX_BUFFER_FRAMES
        {
            return Err(ProtocolError::BadGeometry(format!(
                "buffer_frames {} must be a power of two in [{}, {}]",
                self.buffer_frames, MIN_BUFFER_FRAMES, MAX_BUFFER_FRAMES
            )));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(ProtocolError::BadGeometry(format!(
                "channels {} must be 1 or 2",
                self.channels
            )));
        }
        Ok(())
    }

    /// Total region size for these parameters.
    pub fn region_bytes(&self) -> usize {
        region_bytes(self.buffer_frames, self.channels)
    }
}

/// Typed view over the raw header bytes.
///
/// Copyable handle; all mutation happens through atomics inside the
/// mapped region, never through `&mut self`.
#[derive(Clone, Copy)]
pub struct HeaderView {
    base: NonNull<u8>,
}

// The view only dereferences through atomics; cross-thread (and
// cross-process) access is governed by the SPSC protocol.
unsafe impl Send for HeaderView {}
unsafe impl Sync for HeaderView {}

impl HeaderView {
    /// Construct a view over a mapped region.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`HEADER_BYTES`] of mapped memory,
    /// 8-byte aligned (mappings are page aligned in practice), valid
    /// for as long as the view is used.
    pub unsafe fn from_base(base: NonNull<u8>) -> Self {
        Self { base }
    }

    fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        // SAFETY: offset is a compile-time constant inside the header,
        // 8-aligned; validity guaranteed by the from_base contract.
        unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU64) }
    }

    fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: as above, 4-aligned constant offsets.
        unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU32) }
    }

    /// Producer-owned monotonic write counter.
    pub fn write_pos(&self) -> &AtomicU64 {
        self.atomic_u64(OFFSET_WRITE_POS)
    }

    /// Consumer-owned monotonic read counter.
    pub fn read_pos(&self) -> &AtomicU64 {
        self.atomic_u64(OFFSET_READ_POS)
    }

    pub fn sample_rate(&self) -> u32 {
        self.atomic_u32(OFFSET_SAMPLE_RATE).load(Ordering::Relaxed)
    }

    pub fn channels(&self) -> u32 {
        self.atomic_u32(OFFSET_CHANNELS).load(Ordering::Relaxed)
    }

    pub fn buffer_frames(&self) -> u32 {
        self.atomic_u32(OFFSET_BUFFER_FRAMES).load(Ordering::Relaxed)
    }

    pub fn version(&self) -> u32 {
        self.atomic_u32(OFFSET_VERSION).load(Ordering::Relaxed)
    }

    /// Liveness flag. Acquire pairs with the producer's release store so
    /// a consumer observing 1 also observes the initialized header.
    pub fn producer_active(&self) -> bool {
        self.atomic_u32(OFFSET_PRODUCER_ACTIVE)
            .load(Ordering::Acquire)
            != 0
    }

    /// Producer-only. Release ordering publishes everything written
    /// before the flag flips.
    pub fn set_producer_active(&self, active: bool) {
        self.atomic_u32(OFFSET_PRODUCER_ACTIVE)
            .store(u32::from(active), Ordering::Release);
    }

    /// Producer-only: write the immutable fields and zero the position
    /// counters. Must complete before `set_producer_active(true)`.
    pub fn init(&self, params: StreamParams) {
        self.write_pos().store(0, Ordering::Relaxed);
        self.read_pos().store(0, Ordering::Relaxed);
        self.atomic_u32(OFFSET_SAMPLE_RATE)
            .store(params.sample_rate, Ordering::Relaxed);
        self.atomic_u32(OFFSET_CHANNELS)
            .store(params.channels, Ordering::Relaxed);
        self.atomic_u32(OFFSET_BUFFER_FRAMES)
            .store(params.buffer_frames, Ordering::Relaxed);
        self.atomic_u32(OFFSET_VERSION)
            .store(PROTOCOL_VERSION, Ordering::Relaxed);
        self.atomic_u32(OFFSET_PRODUCER_ACTIVE)
            .store(0, Ordering::Relaxed);
    }

    /// Consumer-side validation against the mapped region size.
    ///
    /// Returns a snapshot of the immutable parameters on success. A
    /// consumer observing any failure treats the region as invalid and
    /// detaches.
    pub fn validate(&self, region_len: usize) -> Result<StreamParams, ProtocolError> {
        let version = self.version();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }

        let params = StreamParams {
            sample_rate: self.sample_rate(),
            channels: self.channels(),
            buffer_frames: self.buffer_frames(),
        };
        params.validate()?;

        let needed = params.region_bytes();
        if region_len < needed {
            return Err(ProtocolError::RegionTooSmall {
                actual: region_len,
                needed,
            });
        }

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Page-aligned mappings guarantee the real alignment; tests only
    // need the atomics' 8-byte requirement.
    #[repr(align(64))]
    struct AlignedHeader([u8; HEADER_BYTES]);

    fn view(buf: &mut AlignedHeader) -> HeaderView {
        unsafe { HeaderView::from_base(NonNull::new(buf.0.as_mut_ptr()).unwrap()) }
    }

    fn test_params() -> StreamParams {
        StreamParams {
            sample_rate: 48000,
            channels: 2,
            buffer_frames: 1024,
        }
    }

    #[test]
    fn test_region_bytes() {
        // 128-byte header + frames * channels * 4
        assert_eq!(region_bytes(1024, 2), 128 + 1024 * 2 * 4);
        assert_eq!(region_bytes(64, 1), 128 + 64 * 4);
        assert_eq!(
            region_bytes(DEFAULT_BUFFER_FRAMES, DEFAULT_CHANNELS),
            128 + 32768 * 2 * 4
        );
    }

    #[test]
    fn test_init_then_validate() {
        let mut buf = AlignedHeader([0u8; HEADER_BYTES]);
        let hdr = view(&mut buf);

        hdr.init(test_params());
        let params = hdr
            .validate(region_bytes(1024, 2))
            .expect("freshly initialized header should validate");

        assert_eq!(params, test_params());
        assert_eq!(hdr.version(), PROTOCOL_VERSION);
        assert!(!hdr.producer_active());
        assert_eq!(hdr.write_pos().load(Ordering::Relaxed), 0);
        assert_eq!(hdr.read_pos().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_wire_offsets() {
        let mut buf = AlignedHeader([0u8; HEADER_BYTES]);
        let hdr = view(&mut buf);

        hdr.init(test_params());
        hdr.write_pos().store(0x0102030405060708, Ordering::Relaxed);
        hdr.set_producer_active(true);

        // Field bytes must land at the wire offsets (little-endian).
        assert_eq!(&buf.0[0..8], &0x0102030405060708u64.to_le_bytes());
        assert_eq!(&buf.0[72..76], &48000u32.to_le_bytes());
        assert_eq!(&buf.0[76..80], &2u32.to_le_bytes());
        assert_eq!(&buf.0[80..84], &1024u32.to_le_bytes());
        assert_eq!(&buf.0[84..88], &PROTOCOL_VERSION.to_le_bytes());
        assert_eq!(&buf.0[88..92], &1u32.to_le_bytes());
        // Reserved tail stays zeroed.
        assert!(buf.0[92..128].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_validate_version_mismatch() {
        let mut buf = AlignedHeader([0u8; HEADER_BYTES]);
        let hdr = view(&mut buf);
        hdr.init(test_params());
        buf.0[84..88].copy_from_slice(&2u32.to_le_bytes());

        match hdr.validate(region_bytes(1024, 2)) {
            Err(ProtocolError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, PROTOCOL_VERSION);
                assert_eq!(found, 2);
            }
            other => panic!("expected VersionMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_validate_geometry() {
        let mut buf = AlignedHeader([0u8; HEADER_BYTES]);
        let hdr = view(&mut buf);

        for bad_frames in [0u32, 100, 63, MAX_BUFFER_FRAMES * 2] {
            hdr.init(StreamParams {
                buffer_frames: bad_frames,
                ..test_params()
            });
            assert!(matches!(
                hdr.validate(usize::MAX / 2),
                Err(ProtocolError::BadGeometry(_))
            ));
        }

        hdr.init(StreamParams {
            channels: 3,
            ..test_params()
        });
        assert!(matches!(
            hdr.validate(usize::MAX / 2),
            Err(ProtocolError::BadGeometry(_))
        ));
    }

    #[test]
    fn test_validate_region_too_small() {
        let mut buf = AlignedHeader([0u8; HEADER_BYTES]);
        let hdr = view(&mut buf);
        hdr.init(test_params());

        let needed = region_bytes(1024, 2);
        match hdr.validate(needed - 1) {
            Err(ProtocolError::RegionTooSmall { actual, needed: n }) => {
                assert_eq!(actual, needed - 1);
                assert_eq!(n, needed);
            }
            other => panic!("expected RegionTooSmall, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_params_validate() {
        assert!(test_params().validate().is_ok());
        assert!(StreamParams {
            sample_rate: 44100,
            channels: 1,
            buffer_frames: MIN_BUFFER_FRAMES,
        }
        .validate()
        .is_ok());
    }
}
