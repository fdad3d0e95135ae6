//! Interleaved SPSC Ring over a Shared Region
//!
//! Lock-free single-producer/single-consumer cyclic buffer of interleaved
//! float32 frames. The position counters live in the region header and are
//! monotonic 64-bit frame counts; only the buffer index is taken modulo
//! (`pos & (buffer_frames - 1)`), never the counters themselves.
//!
//! # Memory ordering contract
//!
//! - Producer `write`: load `read_pos` acquire, load `write_pos` relaxed
//!   (producer owns it), copy samples, store `write_pos` release.
//! - Consumer `read`: load `write_pos` acquire, load `read_pos` relaxed
//!   (consumer owns it), copy samples, store `read_pos` release.
//!
//! The release store of a counter publishes the sample bytes copied before
//! it; the matching acquire load on the other side synchronizes with it.
//! The same pairing must be emitted by every consumer of the region,
//! including privileged ones, or the weaker-ordered side corrupts the other.
//!
//! Each side of the stream constructs its *own* `SharedRing` over the
//! mapped region; `write` and `read` take `&mut self` so a single side
//! cannot accidentally share one instance between threads.

use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::ProtocolResult;
use crate::header::{HeaderView, StreamParams, HEADER_BYTES};
use crate::region::SharedRegion;

/// One side's handle to the shared ring.
pub struct SharedRing {
    header: HeaderView,
    data: NonNull<f32>,
    mask: u64,
    capacity: u32,
    channels: u32,
    sample_rate: u32,
    // Keeps the mapping alive for as long as the ring exists.
    _region: Arc<SharedRegion>,
}

// Data access follows the SPSC protocol above.
unsafe impl Send for SharedRing {}

impl SharedRing {
    /// Validate the region header and attach to the ring.
    ///
    /// Used identically by the producer (after initializing the header)
    /// and by consumers (after mapping an existing region).
    pub fn attach(region: Arc<SharedRegion>) -> ProtocolResult<Self> {
        // The carrier guarantees at least HEADER_BYTES are mapped.
        // SAFETY: region base is page aligned and outlives the ring via
        // the Arc held below.
        let header = unsafe { HeaderView::from_base(region.base()) };
        let params = header.validate(region.len())?;

        // SAFETY: validate() confirmed the mapping covers the full
        // header + sample area; data starts at the fixed offset.
        let data = unsafe {
            NonNull::new_unchecked(region.base().as_ptr().add(HEADER_BYTES).cast::<f32>())
        };

        Ok(Self {
            header,
            data,
            mask: u64::from(params.buffer_frames - 1),
            capacity: params.buffer_frames,
            channels: params.channels,
            sample_rate: params.sample_rate,
            _region: region,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn buffer_frames(&self) -> u32 {
        self.capacity
    }

    pub fn params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            buffer_frames: self.capacity,
        }
    }

    /// Producer liveness flag (acquire).
    pub fn producer_active(&self) -> bool {
        self.header.producer_active()
    }

    /// Producer-only (release).
    pub fn set_producer_active(&self, active: bool) {
        self.header.set_producer_active(active);
    }

    /// Snapshot of the producer's monotonic counter (acquire). Used by
    /// consumers for progress watchdogs.
    pub fn write_pos(&self) -> u64 {
        self.header.write_pos().load(Ordering::Acquire)
    }

    /// Frames currently readable, from the consumer's viewpoint.
    pub fn available_read(&self) -> u32 {
        let wp = self.header.write_pos().load(Ordering::Acquire);
        let rp = self.header.read_pos().load(Ordering::Relaxed);
        (wp - rp) as u32
    }

    /// Frames currently writable, from the producer's viewpoint.
    pub fn available_write(&self) -> u32 {
        let wp = self.header.write_pos().load(Ordering::Relaxed);
        let rp = self.header.read_pos().load(Ordering::Acquire);
        self.capacity - (wp - rp) as u32
    }

    /// Write up to `frames` interleaved frames. Producer side only.
    ///
    /// Never blocks, never allocates; returns the number of frames
    /// actually written (`< frames` means the consumer is lagging and
    /// the remainder was dropped).
    ///
    /// `src_channels` must equal the ring's channel count, or be 1 while
    /// the ring is stereo, in which case channel 0 is duplicated into
    /// channel 1 during the same copy. Any other combination writes
    /// nothing (remixing is not this layer's job).
    pub fn write(&mut self, src: &[f32], src_channels: u32, frames: usize) -> usize {
        let mono_expand = src_channels == 1 && self.channels == 2;
        if src_channels != self.channels && !mono_expand {
            return 0;
        }

        let frames = frames.min(src.len() / src_channels as usize);
        let wp = self.header.write_pos().load(Ordering::Relaxed);
        let rp = self.header.read_pos().load(Ordering::Acquire);
        let free = self.capacity as usize - (wp - rp) as usize;
        let to_write = frames.min(free);
        if to_write == 0 {
            return 0;
        }

        let start = (wp & self.mask) as usize;
        let first = to_write.min(self.capacity as usize - start);
        let second = to_write - first;

        if mono_expand {
            // SAFETY: start/first/second stay inside the frame capacity
            // checked above.
            unsafe {
                self.copy_in_mono_expand(start, &src[..first]);
                if second > 0 {
                    self.copy_in_mono_expand(0, &src[first..first + second]);
                }
            }
        } else {
            let ch = self.channels as usize;
            // SAFETY: as above; sample counts are frame counts * channels.
            unsafe {
                self.copy_in(start, &src[..first * ch]);
                if second > 0 {
                    self.copy_in(0, &src[first * ch..(first + second) * ch]);
                }
            }
        }

        self.header
            .write_pos()
            .store(wp + to_write as u64, Ordering::Release);
        to_write
    }

    /// Read up to `frames` interleaved frames into `dst`. Consumer side
    /// only.
    ///
    /// Never blocks, never allocates; returns the number of frames
    /// actually read (`< frames` is an under-run and the caller pads).
    pub fn read(&mut self, dst: &mut [f32], frames: usize) -> usize {
        let ch = self.channels as usize;
        let frames = frames.min(dst.len() / ch);

        let rp = self.header.read_pos().load(Ordering::Relaxed);
        let wp = self.header.write_pos().load(Ordering::Acquire);
        let available = (wp - rp) as usize;
        let to_read = frames.min(available);
        if to_read == 0 {
            return 0;
        }

        let start = (rp & self.mask) as usize;
        let first = to_read.min(self.capacity as usize - start);
        let second = to_read - first;

        // SAFETY: start/first/second stay inside the frame capacity; dst
        // was bounds-checked through the frame clamp above.
        unsafe {
            self.copy_out(start, &mut dst[..first * ch]);
            if second > 0 {
                self.copy_out(0, &mut dst[first * ch..(first + second) * ch]);
            }
        }

        self.header
            .read_pos()
            .store(rp + to_read as u64, Ordering::Release);
        to_read
    }

    /// Copy interleaved samples into the ring starting at `start_frame`.
    ///
    /// # Safety
    ///
    /// `start_frame * channels + src.len()` must not exceed the sample
    /// capacity of the data area.
    unsafe fn copy_in(&mut self, start_frame: usize, src: &[f32]) {
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.data
                    .as_ptr()
                    .add(start_frame * self.channels as usize),
                src.len(),
            );
        }
    }

    /// Copy mono samples into a stereo ring, duplicating channel 0 into
    /// channel 1 in the same pass.
    ///
    /// # Safety
    ///
    /// `start_frame + src.len()` must not exceed the frame capacity.
    unsafe fn copy_in_mono_expand(&mut self, start_frame: usize, src: &[f32]) {
        unsafe {
            let base = self.data.as_ptr().add(start_frame * 2);
            for (i, &sample) in src.iter().enumerate() {
                *base.add(i * 2) = sample;
                *base.add(i * 2 + 1) = sample;
            }
        }
    }

    /// Copy interleaved samples out of the ring starting at `start_frame`.
    ///
    /// # Safety
    ///
    /// `start_frame * channels + dst.len()` must not exceed the sample
    /// capacity of the data area.
    unsafe fn copy_out(&mut self, start_frame: usize, dst: &mut [f32]) {
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.data
                    .as_ptr()
                    .add(start_frame * self.channels as usize),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
    }
}
