//! Capture Format Matrix & Conversion
//!
//! The capture endpoint advertises a discrete format matrix:
//!
//! | Sample Rate | Channels | Encoding      |
//! |-------------|----------|---------------|
//! | 48000 Hz    | 1-2      | 16-bit PCM    |
//! | 48000 Hz    | 1-2      | 24-bit PCM    |
//! | 48000 Hz    | 1-2      | 32-bit float  |
//! | 44100 Hz    | 1-2      | 16-bit PCM    |
//! | 44100 Hz    | 1-2      | 24-bit PCM    |
//! | 44100 Hz    | 1-2      | 32-bit float  |
//!
//! One entry is negotiated at stream open. Reads from the shared region
//! are always float32 internally; conversion to the negotiated encoding
//! happens on the capture side, per tick, into a preallocated byte
//! buffer. All output is little-endian.

use crate::error::{DriverError, DriverResult};

/// Sample rates the endpoint advertises.
pub const SUPPORTED_RATES: [u32; 2] = [44_100, 48_000];

/// Sample encodings the endpoint advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 16-bit signed PCM
    Int16,
    /// 24-bit signed PCM, packed 3 bytes per sample
    Int24,
    /// 32-bit IEEE float
    Float32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 => 3,
            SampleFormat::Float32 => 4,
        }
    }
}

/// A negotiated capture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u32,
    pub format: SampleFormat,
}

impl CaptureFormat {
    /// Negotiate a format at stream open; rejects anything outside the
    /// advertised matrix.
    pub fn negotiate(sample_rate: u32, channels: u32, format: SampleFormat) -> DriverResult<Self> {
        if !SUPPORTED_RATES.contains(&sample_rate) {
            return Err(DriverError::UnsupportedFormat(format!(
                "{sample_rate} Hz"
            )));
        }
        if channels == 0 || channels > 2 {
            return Err(DriverError::UnsupportedFormat(format!(
                "{channels} channels"
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
            format,
        })
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }
}

/// Convert interleaved float32 samples to the negotiated encoding.
///
/// Writes `src.len()` samples into `dst` and returns the number of
/// bytes produced. `dst` must hold at least
/// `src.len() * format.bytes_per_sample()` bytes; the caller sizes it
/// once at stream open, so the conversion itself never allocates.
pub fn convert_from_f32(src: &[f32], format: SampleFormat, dst: &mut [u8]) -> usize {
    match format {
        SampleFormat::Int16 => {
            for (sample, out) in src.iter().zip(dst.chunks_exact_mut(2)) {
                let v = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                out.copy_from_slice(&v.to_le_bytes());
            }
            src.len() * 2
        }
        SampleFormat::Int24 => {
            for (sample, out) in src.iter().zip(dst.chunks_exact_mut(3)) {
                let v = (sample.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                out.copy_from_slice(&v.to_le_bytes()[..3]);
            }
            src.len() * 3
        }
        SampleFormat::Float32 => {
            for (sample, out) in src.iter().zip(dst.chunks_exact_mut(4)) {
                out.copy_from_slice(&sample.to_le_bytes());
            }
            src.len() * 4
        }
    }
}
