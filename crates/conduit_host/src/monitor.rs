//! Monitor Output Bridge
//!
//! Replays the host's main output onto a second audio device (a virtual
//! cable) so downstream applications that expect a microphone can pick
//! it up. Two real-time callbacks run concurrently inside the same
//! process, each driven by its own hardware clock:
//!
//! ```text
//! host RT callback ──write_audio──▶ PlanarRing ──render──▶ cable RT callback
//! ```
//!
//! The bridge owns no resampler: it matches sample rates or refuses.
//! When the cable device starts at a different rate the bridge parks in
//! `SampleRateMismatch` and both callbacks leave the ring untouched -
//! the producer short-circuits on a non-`Active` status before writing,
//! which is what makes restarting the device safe (no torn-state race
//! against `reset`).

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::error::{HostError, HostResult};
use crate::planar_ring::PlanarRing;

/// Ring capacity between the two callbacks, in frames.
pub const MONITOR_RING_FRAMES: u32 = 4096;

/// The bridge always carries stereo.
pub const MONITOR_CHANNELS: usize = 2;

/// Bridge state, shared between both callbacks and the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorStatus {
    NotConfigured = 0,
    Active = 1,
    SampleRateMismatch = 2,
    Error = 3,
}

impl MonitorStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MonitorStatus::Active,
            2 => MonitorStatus::SampleRateMismatch,
            3 => MonitorStatus::Error,
            _ => MonitorStatus::NotConfigured,
        }
    }
}

/// Events surfaced by the device glue to the control thread.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// Cable device callback is running
    Started { sample_rate: u32 },
    /// Cable device stopped or was torn down
    Stopped,
    /// Device error (stream died, setup failed late)
    Error { message: String },
}

/// Lock-free bridge between the host callback and the cable callback.
pub struct MonitorBridge {
    ring: PlanarRing,
    status: AtomicU8,
    configured_rate: f64,
    dropped_frames: AtomicU64,
}

impl MonitorBridge {
    /// `sample_rate` is the host's rate; the cable device must match it
    /// within 1 Hz before the bridge goes `Active`.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            ring: PlanarRing::new(MONITOR_RING_FRAMES, MONITOR_CHANNELS),
            status: AtomicU8::new(MonitorStatus::NotConfigured as u8),
            configured_rate: sample_rate,
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: MonitorStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Frames dropped on the producer side because the cable callback
    /// lagged.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Producer side: called from the host's RT callback, exactly once
    /// per block. RT-safe, non-blocking; dropped frames are counted,
    /// never retried.
    ///
    /// Any status other than `Active` short-circuits to a no-op without
    /// touching the ring.
    pub fn write_audio(&self, channel_data: &[&[f32]], frames: usize) -> usize {
        if self.status() != MonitorStatus::Active {
            return 0;
        }

        let written = self.ring.write(channel_data, frames);
        if written < frames {
            self.dropped_frames
                .fetch_add((frames - written) as u64, Ordering::Relaxed);
        }
        written
    }

    /// Consumer side: produce `frames` output frames for the cable
    /// device's RT callback, padding short reads with silence. RT-safe.
    ///
    /// A non-`Active` status outputs zeros without touching the ring,
    /// which keeps `reset` safe while the device restarts.
    pub fn render(&self, outputs: &mut [&mut [f32]], frames: usize) {
        if self.status() != MonitorStatus::Active {
            for ch in outputs.iter_mut() {
                let n = frames.min(ch.len());
                ch[..n].fill(0.0);
            }
            return;
        }

        let read = self.ring.read(outputs, frames);
        if read < frames {
            for ch in outputs.iter_mut() {
                let n = frames.min(ch.len());
                ch[read..n].fill(0.0);
            }
        }
    }

    /// Cable device is about to start delivering callbacks at
    /// `device_rate`. Publishes `Active` only after the rate check; on
    /// mismatch the bridge parks and outputs silence.
    pub fn device_about_to_start(&self, device_rate: f64) {
        if (device_rate - self.configured_rate).abs() > 1.0 {
            tracing::warn!(
                expected = self.configured_rate,
                actual = device_rate,
                "monitor device sample rate mismatch"
            );
            // Publish the non-Active status before the reset so neither
            // callback can be inside the ring while it rewinds.
            self.set_status(MonitorStatus::SampleRateMismatch);
            self.ring.reset();
            return;
        }

        self.set_status(MonitorStatus::NotConfigured);
        self.ring.reset();
        self.set_status(MonitorStatus::Active);

        tracing::info!(rate = device_rate, "monitor bridge active");
    }

    /// Cable device stopped delivering callbacks.
    pub fn device_stopped(&self) {
        self.set_status(MonitorStatus::NotConfigured);
        tracing::info!("monitor device stopped");
    }

    /// Park the bridge after an unrecoverable device error.
    pub fn mark_error(&self) {
        self.set_status(MonitorStatus::Error);
    }
}

/// Owns the cpal stream that drives the consumer side of a bridge.
///
/// Device *selection* is the embedding application's problem; this glue
/// only turns a chosen output device into a running callback.
pub struct MonitorOutput {
    stream: Option<cpal::Stream>,
    bridge: Arc<MonitorBridge>,
    events: Sender<MonitorEvent>,
}

impl MonitorOutput {
    /// Largest callback the glue is prepared for, per channel.
    const MAX_CALLBACK_FRAMES: usize = 8192;

    /// Open an output stream on `device` and start rendering the bridge
    /// through it.
    pub fn start(
        bridge: Arc<MonitorBridge>,
        device: &cpal::Device,
        events: Sender<MonitorEvent>,
    ) -> HostResult<Self> {
        // The device runs at whatever rate its engine reports; the
        // bridge decides whether that is acceptable.
        let hw_config = device
            .default_output_config()
            .map_err(|e| HostError::StreamBuildError(e.to_string()))?;
        let hw_rate = hw_config.sample_rate().0;

        bridge.device_about_to_start(f64::from(hw_rate));

        let cpal_config = cpal::StreamConfig {
            channels: MONITOR_CHANNELS as u16,
            sample_rate: cpal::SampleRate(hw_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // Planar scratch for the callback, allocated once out here.
        let mut scratch_l = vec![0.0f32; Self::MAX_CALLBACK_FRAMES];
        let mut scratch_r = vec![0.0f32; Self::MAX_CALLBACK_FRAMES];

        let cb_bridge = Arc::clone(&bridge);
        let err_events = events.clone();

        let stream = device
            .build_output_stream(
                &cpal_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Real-time audio callback - NO allocations allowed here
                    let frames = (data.len() / MONITOR_CHANNELS).min(Self::MAX_CALLBACK_FRAMES);

                    {
                        let mut planar = [&mut scratch_l[..frames], &mut scratch_r[..frames]];
                        cb_bridge.render(&mut planar, frames);
                    }

                    for i in 0..frames {
                        data[i * 2] = scratch_l[i];
                        data[i * 2 + 1] = scratch_r[i];
                    }
                    // Anything past the scratch window (shouldn't happen
                    // with sane devices) stays silent.
                    for sample in data[frames * MONITOR_CHANNELS..].iter_mut() {
                        *sample = 0.0;
                    }
                },
                move |err| {
                    let _ = err_events.try_send(MonitorEvent::Error {
                        message: err.to_string(),
                    });
                },
                None,
            )
            .map_err(|e| {
                bridge.mark_error();
                HostError::StreamBuildError(e.to_string())
            })?;

        stream.play().map_err(|e| {
            bridge.mark_error();
            HostError::StreamPlayError(e.to_string())
        })?;

        let _ = events.try_send(MonitorEvent::Started {
            sample_rate: hw_rate,
        });

        Ok(Self {
            stream: Some(stream),
            bridge,
            events,
        })
    }

    pub fn bridge(&self) -> &Arc<MonitorBridge> {
        &self.bridge
    }
}

impl Drop for MonitorOutput {
    fn drop(&mut self) {
        // Stop the producer from writing before the stream dies.
        self.bridge.device_stopped();
        self.stream.take();
        let _ = self.events.try_send(MonitorEvent::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| i as f32).collect()
    }

    #[test]
    fn test_initial_state() {
        let bridge = MonitorBridge::new(48000.0);
        assert_eq!(bridge.status(), MonitorStatus::NotConfigured);
        assert_eq!(bridge.dropped_frames(), 0);
    }

    #[test]
    fn test_write_short_circuits_unless_active() {
        let bridge = MonitorBridge::new(48000.0);
        let block = ramp(64);

        // NotConfigured: no-op, nothing counted.
        assert_eq!(bridge.write_audio(&[&block, &block], 64), 0);
        assert_eq!(bridge.dropped_frames(), 0);

        bridge.device_about_to_start(48000.0);
        assert_eq!(bridge.status(), MonitorStatus::Active);
        assert_eq!(bridge.write_audio(&[&block, &block], 64), 64);
    }

    #[test]
    fn test_render_pads_underrun_with_silence() {
        let bridge = MonitorBridge::new(48000.0);
        bridge.device_about_to_start(48000.0);

        let block = ramp(32);
        bridge.write_audio(&[&block, &block], 32);

        let mut out_l = vec![1.0f32; 64];
        let mut out_r = vec![1.0f32; 64];
        bridge.render(&mut [&mut out_l, &mut out_r], 64);

        assert_eq!(&out_l[..32], &block[..]);
        assert!(out_l[32..].iter().all(|&s| s == 0.0));
        assert!(out_r[32..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_sample_rate_mismatch_parks_bridge() {
        let bridge = MonitorBridge::new(48000.0);
        let block = ramp(64);

        // Prime the ring while active, then restart at the wrong rate.
        bridge.device_about_to_start(48000.0);
        bridge.write_audio(&[&block, &block], 64);

        bridge.device_about_to_start(44100.0);
        assert_eq!(bridge.status(), MonitorStatus::SampleRateMismatch);

        // Ring was reset; producer side refuses to touch it.
        assert_eq!(bridge.write_audio(&[&block, &block], 64), 0);

        // Consumer callback emits zeros.
        let mut out_l = vec![1.0f32; 64];
        let mut out_r = vec![1.0f32; 64];
        bridge.render(&mut [&mut out_l, &mut out_r], 64);
        assert!(out_l.iter().all(|&s| s == 0.0));
        assert!(out_r.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_rate_within_one_hz_is_accepted() {
        let bridge = MonitorBridge::new(48000.0);
        bridge.device_about_to_start(48000.9);
        assert_eq!(bridge.status(), MonitorStatus::Active);
    }

    #[test]
    fn test_restart_resets_ring() {
        let bridge = MonitorBridge::new(48000.0);
        bridge.device_about_to_start(48000.0);

        let block = ramp(64);
        bridge.write_audio(&[&block, &block], 64);

        // Device restart: stale frames must not survive into the new run.
        bridge.device_about_to_start(48000.0);

        let mut out_l = vec![1.0f32; 64];
        let mut out_r = vec![1.0f32; 64];
        bridge.render(&mut [&mut out_l, &mut out_r], 64);
        assert!(out_l.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_dropped_frames_counted() {
        let bridge = MonitorBridge::new(48000.0);
        bridge.device_about_to_start(48000.0);

        let big = ramp(MONITOR_RING_FRAMES as usize);
        assert_eq!(
            bridge.write_audio(&[&big, &big], big.len()),
            MONITOR_RING_FRAMES as usize
        );

        // Ring is full now; the next block is dropped and tallied.
        let block = ramp(64);
        assert_eq!(bridge.write_audio(&[&block, &block], 64), 0);
        assert_eq!(bridge.dropped_frames(), 64);
    }

    #[test]
    fn test_device_stopped_parks_bridge() {
        let bridge = MonitorBridge::new(48000.0);
        bridge.device_about_to_start(48000.0);
        bridge.device_stopped();
        assert_eq!(bridge.status(), MonitorStatus::NotConfigured);
    }
}
