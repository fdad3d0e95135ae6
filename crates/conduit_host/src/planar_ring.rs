//! Planar SPSC Ring
//!
//! Same lock-free discipline as the shared-memory ring, but storage is
//! per-channel ("planar") and lives on the heap of a single process. It
//! decouples two audio callback threads inside the producer - the plugin
//! host's callback and the monitor device's callback - each driven by its
//! own hardware clock, without an interleave/deinterleave step on either
//! hot path.
//!
//! `write` and `read` are called concurrently from the two callback
//! threads through a shared reference; positions use the same
//! acquire/release pairing as the shared ring, and each cyclic copy
//! splits at the wrap point into at most two contiguous segments.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Position counter on its own cache line so the two sides never
/// false-share.
#[repr(align(64))]
struct PaddedCounter(AtomicU64);

/// Lock-free SPSC ring of planar float frames.
pub struct PlanarRing {
    data: Box<[UnsafeCell<Box<[f32]>>]>,
    capacity: u32,
    mask: u32,
    channels: usize,
    write_pos: PaddedCounter,
    read_pos: PaddedCounter,
}

// SAFETY: sample storage is only touched by the single producer (frames
// in [read_pos, write_pos) are never written) and the single consumer
// (frames outside that window are never read); the counters publish each
// side's progress with release stores.
unsafe impl Send for PlanarRing {}
unsafe impl Sync for PlanarRing {}

impl PlanarRing {
    /// Allocate a ring. Must not be called from a real-time thread.
    ///
    /// # Panics
    ///
    /// Panics if `capacity_frames` is not a power of two or `channels`
    /// is zero - both are programming errors at setup time.
    pub fn new(capacity_frames: u32, channels: usize) -> Self {
        assert!(
            capacity_frames.is_power_of_two(),
            "ring capacity must be a power of two"
        );
        assert!(channels > 0, "ring needs at least one channel");

        let data = (0..channels)
            .map(|_| UnsafeCell::new(vec![0.0f32; capacity_frames as usize].into_boxed_slice()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            data,
            capacity: capacity_frames,
            mask: capacity_frames - 1,
            channels,
            write_pos: PaddedCounter(AtomicU64::new(0)),
            read_pos: PaddedCounter(AtomicU64::new(0)),
        }
    }

    pub fn capacity_frames(&self) -> u32 {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames readable right now (consumer viewpoint).
    pub fn available_read(&self) -> u32 {
        let wp = self.write_pos.0.load(Ordering::Acquire);
        let rp = self.read_pos.0.load(Ordering::Relaxed);
        (wp - rp) as u32
    }

    /// Frames writable right now (producer viewpoint).
    pub fn available_write(&self) -> u32 {
        let wp = self.write_pos.0.load(Ordering::Relaxed);
        let rp = self.read_pos.0.load(Ordering::Acquire);
        self.capacity - (wp - rp) as u32
    }

    /// Rewind both positions. The caller must guarantee neither side is
    /// inside `write`/`read` while this runs (the monitor bridge gates
    /// it behind its status flag).
    pub fn reset(&self) {
        self.write_pos.0.store(0, Ordering::Relaxed);
        self.read_pos.0.store(0, Ordering::Relaxed);
    }

    /// Write planar frames. RT-safe (no allocation), never blocks.
    ///
    /// Returns the number of frames actually written (`< frames` on
    /// overflow - the consumer is lagging). When the source has fewer
    /// channels than the ring, channel 0 is duplicated into the
    /// remaining ring channels (mono → stereo expansion).
    pub fn write(&self, channel_data: &[&[f32]], frames: usize) -> usize {
        let src_frames = channel_data.iter().map(|c| c.len()).min().unwrap_or(0);
        let frames = frames.min(src_frames);

        let wp = self.write_pos.0.load(Ordering::Relaxed);
        let rp = self.read_pos.0.load(Ordering::Acquire);
        let free = (self.capacity as u64 - (wp - rp)) as usize;
        let to_write = frames.min(free);
        if to_write == 0 {
            return 0;
        }

        let ch_count = channel_data.len().min(self.channels);
        let start = (wp & u64::from(self.mask)) as usize;
        let first = to_write.min(self.capacity as usize - start);
        let second = to_write - first;

        for (ch, src) in channel_data.iter().enumerate().take(ch_count) {
            // SAFETY: producer-exclusive segment inside capacity.
            unsafe {
                self.copy_into(ch, start, &src[..first]);
                if second > 0 {
                    self.copy_into(ch, 0, &src[first..first + second]);
                }
            }
        }

        // Fill extra ring channels from channel 0 (mono → stereo).
        for ch in ch_count..self.channels {
            // SAFETY: same segments as above; source is ring channel 0,
            // destination a distinct channel buffer.
            unsafe {
                self.duplicate_within(ch, start, first);
                if second > 0 {
                    self.duplicate_within(ch, 0, second);
                }
            }
        }

        self.write_pos
            .0
            .store(wp + to_write as u64, Ordering::Release);
        to_write
    }

    /// Read planar frames. RT-safe (no allocation), never blocks.
    ///
    /// Returns the number of frames actually read (`< frames` on
    /// under-run - the caller pads with silence). Extra output channels
    /// beyond the ring's channel count receive a copy of channel 0.
    pub fn read(&self, outputs: &mut [&mut [f32]], frames: usize) -> usize {
        let dst_frames = outputs.iter().map(|c| c.len()).min().unwrap_or(0);
        let frames = frames.min(dst_frames);

        let rp = self.read_pos.0.load(Ordering::Relaxed);
        let wp = self.write_pos.0.load(Ordering::Acquire);
        let available = (wp - rp) as usize;
        let to_read = frames.min(available);
        if to_read == 0 {
            return 0;
        }

        let ch_count = outputs.len().min(self.channels);
        let start = (rp & u64::from(self.mask)) as usize;
        let first = to_read.min(self.capacity as usize - start);
        let second = to_read - first;

        for (ch, dst) in outputs.iter_mut().enumerate().take(ch_count) {
            // SAFETY: consumer-exclusive segment inside capacity.
            unsafe {
                self.copy_from(ch, start, &mut dst[..first]);
                if second > 0 {
                    self.copy_from(ch, 0, &mut dst[first..first + second]);
                }
            }
        }

        // Duplicate channel 0 into extra output channels (mono ring →
        // stereo device).
        if outputs.len() > ch_count {
            if let Some((head, tail)) = outputs.split_first_mut() {
                for dst in tail.iter_mut().skip(ch_count - 1) {
                    dst[..to_read].copy_from_slice(&head[..to_read]);
                }
            }
        }

        self.read_pos
            .0
            .store(rp + to_read as u64, Ordering::Release);
        to_read
    }

    fn channel_ptr(&self, ch: usize) -> *mut f32 {
        // SAFETY: the UnsafeCell grants the raw pointer; segment
        // disjointness is the SPSC contract documented on the type.
        unsafe { (*self.data[ch].get()).as_mut_ptr() }
    }

    /// # Safety
    ///
    /// `start + src.len()` must not exceed the ring capacity and the
    /// segment must be producer-owned.
    unsafe fn copy_into(&self, ch: usize, start: usize, src: &[f32]) {
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.channel_ptr(ch).add(start), src.len());
        }
    }

    /// # Safety
    ///
    /// As `copy_into`, with the segment consumer-owned.
    unsafe fn copy_from(&self, ch: usize, start: usize, dst: &mut [f32]) {
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.channel_ptr(ch).add(start),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
    }

    /// Copy a freshly written segment of ring channel 0 into ring
    /// channel `ch`.
    ///
    /// # Safety
    ///
    /// As `copy_into`; `ch` must not be 0.
    unsafe fn duplicate_within(&self, ch: usize, start: usize, frames: usize) {
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.channel_ptr(0).add(start),
                self.channel_ptr(ch).add(start),
                frames,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: usize, frames: usize) -> Vec<f32> {
        (0..frames).map(|i| (start + i) as f32).collect()
    }

    #[test]
    fn test_round_trip_stereo() {
        let ring = PlanarRing::new(256, 2);
        let left = ramp(0, 100);
        let right = ramp(1000, 100);

        assert_eq!(ring.write(&[&left, &right], 100), 100);
        assert_eq!(ring.available_read(), 100);

        let mut out_l = vec![0.0f32; 100];
        let mut out_r = vec![0.0f32; 100];
        assert_eq!(ring.read(&mut [&mut out_l, &mut out_r], 100), 100);
        assert_eq!(out_l, left);
        assert_eq!(out_r, right);
    }

    #[test]
    fn test_wrap_around() {
        let ring = PlanarRing::new(128, 2);
        let mut sink_l = vec![0.0f32; 128];
        let mut sink_r = vec![0.0f32; 128];

        // Move positions to 100, then write 60 frames across the wrap.
        let pre = ramp(0, 100);
        assert_eq!(ring.write(&[&pre, &pre], 100), 100);
        assert_eq!(ring.read(&mut [&mut sink_l, &mut sink_r], 100), 100);

        let left = ramp(100, 60);
        let right = ramp(2000, 60);
        assert_eq!(ring.write(&[&left, &right], 60), 60);

        let mut out_l = vec![0.0f32; 60];
        let mut out_r = vec![0.0f32; 60];
        assert_eq!(ring.read(&mut [&mut out_l, &mut out_r], 60), 60);
        assert_eq!(out_l, left);
        assert_eq!(out_r, right);
    }

    #[test]
    fn test_overflow_truncates() {
        let ring = PlanarRing::new(64, 2);
        let src = ramp(0, 100);

        // Only capacity frames fit; the rest are dropped, not retried.
        assert_eq!(ring.write(&[&src, &src], 100), 64);
        assert_eq!(ring.available_write(), 0);
        assert_eq!(ring.write(&[&src, &src], 1), 0);
    }

    #[test]
    fn test_mono_source_expands_to_stereo_ring() {
        let ring = PlanarRing::new(128, 2);
        let mono = ramp(0, 50);
        assert_eq!(ring.write(&[&mono], 50), 50);

        let mut out_l = vec![0.0f32; 50];
        let mut out_r = vec![0.0f32; 50];
        assert_eq!(ring.read(&mut [&mut out_l, &mut out_r], 50), 50);
        assert_eq!(out_l, mono);
        assert_eq!(out_r, mono);
    }

    #[test]
    fn test_mono_ring_duplicates_to_stereo_output() {
        let ring = PlanarRing::new(128, 1);
        let mono = ramp(0, 50);
        assert_eq!(ring.write(&[&mono], 50), 50);

        let mut out_l = vec![0.0f32; 50];
        let mut out_r = vec![0.0f32; 50];
        assert_eq!(ring.read(&mut [&mut out_l, &mut out_r], 50), 50);
        assert_eq!(out_l, mono);
        assert_eq!(out_r, mono);
    }

    #[test]
    fn test_reset() {
        let ring = PlanarRing::new(64, 2);
        let src = ramp(0, 30);
        ring.write(&[&src, &src], 30);
        assert_eq!(ring.available_read(), 30);

        ring.reset();
        assert_eq!(ring.available_read(), 0);
        assert_eq!(ring.available_write(), 64);
    }

    #[test]
    fn test_concurrent_write_read() {
        use std::sync::Arc;

        let ring = Arc::new(PlanarRing::new(256, 1));
        const TOTAL: usize = 20_000;

        let producer = Arc::clone(&ring);
        let writer = std::thread::spawn(move || {
            let mut next = 0usize;
            let mut block = [0.0f32; 48];
            while next < TOTAL {
                let want = (TOTAL - next).min(block.len());
                for (i, slot) in block[..want].iter_mut().enumerate() {
                    *slot = (next + i) as f32;
                }
                let written = producer.write(&[&block[..want]], want);
                next += written;
                if written == 0 {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0usize;
        let mut out = [0.0f32; 48];
        while expected < TOTAL {
            let read = ring.read(&mut [&mut out[..]], 48);
            for &sample in &out[..read] {
                assert_eq!(sample, expected as f32);
                expected += 1;
            }
            if read == 0 {
                std::thread::yield_now();
            }
        }

        writer.join().unwrap();
    }
}
