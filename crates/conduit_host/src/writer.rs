//! Producer Stream Writer
//!
//! Publishes the host's audio onto the shared region. Startup and
//! shutdown are control-thread operations; `write_block` is the only
//! method touched by the real-time callback and performs no allocation,
//! locking, logging, or syscalls.
//!
//! Lifecycle: create region → write immutable header fields → zero
//! positions → set `producer_active = 1` → steady state → on drop clear
//! `producer_active`, then release the region.

use std::sync::atomic::{AtomicU64, Ordering};

use conduit_protocol::{SharedRegion, SharedRing, SHM_NAME};

use crate::config::HostConfig;
use crate::error::HostResult;

/// Producer end of the shared audio stream.
pub struct StreamWriter {
    ring: SharedRing,
    scratch: Box<[f32]>,
    max_block_frames: usize,
    channels: usize,
    overflow_frames: AtomicU64,
}

impl StreamWriter {
    /// Create the well-known region and start publishing. Non-RT.
    ///
    /// `max_block_frames` is the largest block the host will ever hand
    /// to [`write_block`](Self::write_block); the interleave scratch is
    /// sized from it here so the hot path never allocates.
    pub fn create(config: &HostConfig, max_block_frames: usize) -> HostResult<Self> {
        Self::create_named(SHM_NAME, config, max_block_frames)
    }

    /// Create under an explicit region name (tests, side-by-side
    /// instances).
    pub fn create_named(
        name: &str,
        config: &HostConfig,
        max_block_frames: usize,
    ) -> HostResult<Self> {
        config
            .validate()
            .map_err(crate::error::HostError::ConfigError)?;

        let region = SharedRegion::create(name, config.region_bytes())?;
        let region = std::sync::Arc::new(region);

        // The region arrives zeroed; publish the immutable fields before
        // anything can observe the liveness flag.
        // SAFETY: create() guarantees at least a header's worth of bytes.
        let header = unsafe { conduit_protocol::HeaderView::from_base(region.base()) };
        header.init(config.stream_params());

        let ring = SharedRing::attach(region)?;
        ring.set_producer_active(true);

        tracing::info!(
            name,
            sample_rate = config.sample_rate,
            channels = config.channels,
            buffer_frames = config.buffer_frames,
            "producer stream active"
        );

        let channels = config.channels as usize;
        Ok(Self {
            ring,
            scratch: vec![0.0f32; max_block_frames * channels].into_boxed_slice(),
            max_block_frames,
            channels,
            overflow_frames: AtomicU64::new(0),
        })
    }

    /// Publish one block of planar audio. RT-safe.
    ///
    /// Interleaves `channel_data` into the preallocated scratch and
    /// writes it to the ring. A mono source feeding a stereo stream is
    /// duplicated into both channels. Returns the number of frames
    /// accepted; the shortfall on overflow is tallied in a counter
    /// rather than signalled on the hot path.
    pub fn write_block(&mut self, channel_data: &[&[f32]], frames: usize) -> usize {
        if channel_data.is_empty() {
            return 0;
        }

        let src_frames = channel_data.iter().map(|c| c.len()).min().unwrap_or(0);
        let frames = frames.min(src_frames).min(self.max_block_frames);
        if frames == 0 {
            return 0;
        }

        let src_channels = channel_data.len().min(self.channels);
        if src_channels == 1 && self.channels == 2 {
            let src = channel_data[0];
            for i in 0..frames {
                self.scratch[i * 2] = src[i];
                self.scratch[i * 2 + 1] = src[i];
            }
        } else {
            for (ch, src) in channel_data.iter().enumerate().take(src_channels) {
                for (i, &sample) in src.iter().enumerate().take(frames) {
                    self.scratch[i * self.channels + ch] = sample;
                }
            }
            // A missing second channel in an already-interleaved layout
            // would leave stale samples behind; clear any channel the
            // source didn't provide.
            for ch in src_channels..self.channels {
                for i in 0..frames {
                    self.scratch[i * self.channels + ch] = 0.0;
                }
            }
        }

        let sample_count = frames * self.channels;
        let written = self
            .ring
            .write(&self.scratch[..sample_count], self.channels as u32, frames);

        if written < frames {
            self.overflow_frames
                .fetch_add((frames - written) as u64, Ordering::Relaxed);
        }
        written
    }

    /// Frames dropped so far because the consumer lagged.
    pub fn overflow_frames(&self) -> u64 {
        self.overflow_frames.load(Ordering::Relaxed)
    }

    /// Frames the ring can currently accept.
    pub fn available_write(&self) -> u32 {
        self.ring.available_write()
    }

    pub fn sample_rate(&self) -> u32 {
        self.ring.sample_rate()
    }

    pub fn channels(&self) -> u32 {
        self.ring.channels()
    }

    pub fn buffer_frames(&self) -> u32 {
        self.ring.buffer_frames()
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        // Clean shutdown: clear the liveness flag first so consumers
        // fade out and detach before the mapping disappears.
        self.ring.set_producer_active(false);
        tracing::info!("producer stream shut down");
    }
}
