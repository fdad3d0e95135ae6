//! Real-Time Receiver
//!
//! Consumer side of the shared stream, driven from a hard-real-time
//! audio callback in a different process than the producer (a voice,
//! conferencing, or streaming application). The receiver owns three
//! concerns that must compose without glitches:
//!
//! - **Connection state machine**: Disconnected → (polled reconnect
//!   every [`RECONNECT_INTERVAL_BLOCKS`]) → Connected → back to
//!   Disconnected when the producer goes away. Errors on the block path
//!   are state transitions, never panics or logs.
//! - **Clock drift compensation**: producer and consumer run on
//!   independent audio clocks. A faster producer shows up as climbing
//!   ring occupancy; once it crosses the preset's high threshold the
//!   receiver discards down to the target fill. A slower producer shows
//!   up as under-runs, padded with silence.
//! - **Fade-out**: transitions from audio to silence (under-run, stream
//!   loss, producer shutdown) ramp the last held sample down linearly
//!   instead of cutting to zero, which would click.
//!
//! After [`prepare`](Receiver::prepare), the per-block path performs no
//! allocation, no logging, and no locking. Attach attempts do map the
//! region (an OS call); they happen at most once every
//! [`RECONNECT_INTERVAL_BLOCKS`] blocks while disconnected.

use std::sync::Arc;

use conduit_protocol::{ProtocolError, SharedRegion, SharedRing, SHM_NAME};

use crate::params::ReceiverParams;

/// Most channels a stream can carry (stereo).
pub const MAX_CHANNELS: usize = 2;

/// Attempt a reconnect every this many blocks while disconnected.
pub const RECONNECT_INTERVAL_BLOCKS: u32 = 100;

/// Ignore drift for this many blocks after a (re)connect; occupancy
/// needs time to settle around the target before discards mean anything.
pub const DRIFT_WARMUP_BLOCKS: u32 = 50;

/// Treat the producer as dead after this many consecutive blocks with no
/// write-position progress while the liveness flag still reads 1 (covers
/// producers that crashed without clearing it).
pub const STALL_TIMEOUT_BLOCKS: u32 = 500;

/// Per-sample fade decrement; ~20 samples from full scale to silence.
const FADE_STEP: f32 = 0.05;

/// Consumer endpoint for one shared audio stream.
pub struct Receiver {
    region_name: String,

    /// Connected ring; `None` while disconnected.
    ring: Option<SharedRing>,

    /// Latched non-retryable attach failure (version/geometry mismatch).
    /// No further attach attempts until the embedder clears it.
    fatal: Option<ProtocolError>,

    reconnect_counter: u32,
    blocks_since_connect: u32,

    /// Interleaved read scratch, sized in `prepare`.
    scratch: Box<[f32]>,
    max_block_frames: usize,

    // Fade-out state: last block carried audio, current ramp gain, and
    // the held samples the ramp decays from.
    had_audio: bool,
    fade_gain: f32,
    last_sample: [f32; MAX_CHANNELS],

    // Progress watchdog
    last_write_pos: u64,
    stalled_blocks: u32,
}

impl Receiver {
    /// Receiver for the well-known stream name.
    pub fn new() -> Self {
        Self::with_name(SHM_NAME)
    }

    /// Receiver for an explicitly named stream (tests, side-by-side
    /// streams).
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            region_name: name.into(),
            ring: None,
            fatal: None,
            reconnect_counter: 0,
            blocks_since_connect: 0,
            scratch: Box::new([]),
            max_block_frames: 0,
            had_audio: false,
            fade_gain: 0.0,
            last_sample: [0.0; MAX_CHANNELS],
            last_write_pos: 0,
            stalled_blocks: 0,
        }
    }

    /// Size all scratch for the largest block the host will deliver and
    /// make a first connection attempt. Non-RT; must be called before
    /// the stream starts.
    pub fn prepare(&mut self, max_block_frames: usize, params: &ReceiverParams) {
        self.max_block_frames = max_block_frames.max(1);
        self.scratch = vec![0.0f32; self.max_block_frames * MAX_CHANNELS].into_boxed_slice();
        self.had_audio = false;
        self.fade_gain = 0.0;
        self.last_sample = [0.0; MAX_CHANNELS];
        self.blocks_since_connect = 0;
        self.reconnect_counter = 0;
        self.try_connect(params.buffer.target_fill());
    }

    /// Detach from the stream (host is releasing resources).
    pub fn release(&mut self) {
        self.disconnect();
    }

    /// Fill one planar output block. The real-time entry point.
    ///
    /// Always produces exactly `frames` samples per channel (audio,
    /// fade-out tail, or silence); the caller never needs to special-case
    /// a return value.
    pub fn process_block(
        &mut self,
        outputs: &mut [&mut [f32]],
        frames: usize,
        params: &ReceiverParams,
    ) {
        let frames = frames.min(outputs.iter().map(|c| c.len()).min().unwrap_or(0));

        if params.mute {
            Self::silence(outputs, 0, frames);
            self.had_audio = false;
            self.fade_gain = 0.0;
            return;
        }

        if self.fatal.is_some() {
            self.emit_gap(outputs, frames);
            return;
        }

        if self.ring.is_none() {
            self.reconnect_counter += 1;
            if self.reconnect_counter >= RECONNECT_INTERVAL_BLOCKS {
                self.reconnect_counter = 0;
                self.try_connect(params.buffer.target_fill());
            }
            self.emit_gap(outputs, frames);
            return;
        }

        // Liveness and progress checks; the borrow ends before any state
        // transition below.
        let (alive, write_pos) = match self.ring.as_ref() {
            Some(ring) => (ring.producer_active(), ring.write_pos()),
            None => (false, 0),
        };
        if !alive {
            self.disconnect();
            self.emit_gap(outputs, frames);
            return;
        }
        if write_pos == self.last_write_pos {
            self.stalled_blocks += 1;
            if self.stalled_blocks >= STALL_TIMEOUT_BLOCKS {
                self.disconnect();
                self.emit_gap(outputs, frames);
                return;
            }
        } else {
            self.last_write_pos = write_pos;
            self.stalled_blocks = 0;
        }

        self.blocks_since_connect = self.blocks_since_connect.saturating_add(1);

        let mut ring_channels = 0usize;
        let mut read_count = 0usize;
        if let Some(ring) = self.ring.as_mut() {
            ring_channels = ring.channels() as usize;
            let chunk_frames = self.scratch.len() / ring_channels.max(1);

            // Drift compensation: discard down to the target fill once
            // occupancy crosses the high threshold.
            if self.blocks_since_connect > DRIFT_WARMUP_BLOCKS {
                let available = ring.available_read();
                if available > params.buffer.high_threshold() {
                    let mut excess = (available - params.buffer.target_fill()) as usize;
                    while excess > 0 {
                        let chunk = excess.min(chunk_frames);
                        let skipped =
                            ring.read(&mut self.scratch[..chunk * ring_channels], chunk);
                        if skipped == 0 {
                            break;
                        }
                        excess -= skipped.min(excess);
                    }
                }
            }

            let to_read = (ring.available_read() as usize)
                .min(frames)
                .min(chunk_frames);
            if to_read > 0 {
                read_count = ring.read(&mut self.scratch[..to_read * ring_channels], to_read);
            }
        }

        if read_count == 0 {
            // Complete under-run; keep the output continuous.
            self.emit_gap(outputs, frames);
            return;
        }

        // De-interleave [L R L R …] into the planar output; zero-pad the
        // unread tail and any channels the stream doesn't carry.
        for (ch, dst) in outputs.iter_mut().enumerate() {
            if ch < ring_channels {
                for i in 0..read_count {
                    dst[i] = self.scratch[i * ring_channels + ch];
                }
            } else {
                dst[..read_count].fill(0.0);
            }
            dst[read_count..frames].fill(0.0);
        }

        for (ch, held) in self.last_sample.iter_mut().enumerate() {
            if ch < outputs.len() {
                *held = outputs[ch][read_count - 1];
            }
        }
        self.had_audio = true;
        self.fade_gain = 1.0;
    }

    /// Whether a stream is currently attached.
    pub fn is_connected(&self) -> bool {
        self.ring.is_some()
    }

    /// Sample rate of the attached stream.
    pub fn source_sample_rate(&self) -> Option<u32> {
        self.ring.as_ref().map(|r| r.sample_rate())
    }

    /// Channel count of the attached stream.
    pub fn source_channels(&self) -> Option<u32> {
        self.ring.as_ref().map(|r| r.channels())
    }

    /// The latched non-retryable failure, if any.
    pub fn fatal_error(&self) -> Option<&ProtocolError> {
        self.fatal.as_ref()
    }

    /// Clear a latched failure so attach attempts resume (user pressed
    /// "retry", plugin was reloaded, …).
    pub fn clear_fatal(&mut self) {
        self.fatal = None;
        self.reconnect_counter = 0;
    }

    fn disconnect(&mut self) {
        // Dropping the ring releases the mapping; if the stream is lost
        // mid-audio the fade state carries the transition.
        self.ring = None;
        self.reconnect_counter = 0;
    }

    fn try_connect(&mut self, target_fill: u32) {
        let region = match SharedRegion::attach(&self.region_name) {
            Ok(region) => Arc::new(region),
            // Producer absent is the normal disconnected condition.
            Err(e) if e.is_retryable() => return,
            // Permission or size problems won't fix themselves either;
            // latch them for the embedder to surface.
            Err(e) => {
                self.fatal = Some(e);
                return;
            }
        };

        match SharedRing::attach(region) {
            Ok(ring) => {
                if !ring.producer_active() {
                    // Stale region from an unclean exit, or a producer
                    // still mid-startup. Try again later.
                    return;
                }
                self.last_write_pos = ring.write_pos();
                self.stalled_blocks = 0;
                self.blocks_since_connect = 0;
                self.ring = Some(ring);
                self.skip_to_fresh_position(target_fill);
            }
            Err(e) if !e.is_retryable() => {
                // Version or geometry disagreements won't resolve on
                // their own; stop hammering the region until the
                // embedder intervenes.
                self.fatal = Some(e);
                self.ring = None;
            }
            Err(_) => {}
        }
    }

    /// Advance the read position so occupancy equals the target fill.
    ///
    /// The producer has typically been running for a while, so the ring
    /// is nearly full of stale audio; starting from the tail gives
    /// minimum latency on connect.
    fn skip_to_fresh_position(&mut self, target_fill: u32) {
        let Some(ring) = self.ring.as_mut() else {
            return;
        };
        let channels = ring.channels() as usize;
        let chunk_frames = self.scratch.len() / channels.max(1);
        if chunk_frames == 0 {
            return;
        }

        let available = ring.available_read();
        if available <= target_fill {
            return;
        }
        let mut skip = (available - target_fill) as usize;
        while skip > 0 {
            let chunk = skip.min(chunk_frames);
            let read = ring.read(&mut self.scratch[..chunk * channels], chunk);
            if read == 0 {
                break;
            }
            skip -= read.min(skip);
        }
    }

    /// Output for a block with no stream data: fade-out if the previous
    /// block carried audio, plain silence otherwise.
    fn emit_gap(&mut self, outputs: &mut [&mut [f32]], frames: usize) {
        if self.had_audio && self.fade_gain > 0.0 {
            self.apply_fade_out(outputs, frames);
        } else {
            self.had_audio = false;
            Self::silence(outputs, 0, frames);
        }
    }

    /// Linear ramp from the held samples toward zero. The ramp state
    /// persists across blocks; once fully faded, subsequent gap blocks
    /// emit plain zeros.
    fn apply_fade_out(&mut self, outputs: &mut [&mut [f32]], frames: usize) {
        for (ch, dst) in outputs.iter_mut().enumerate() {
            let held = if ch < MAX_CHANNELS {
                self.last_sample[ch]
            } else {
                0.0
            };
            let mut gain = self.fade_gain;
            for slot in dst[..frames].iter_mut() {
                *slot = held * gain;
                gain = (gain - FADE_STEP).max(0.0);
            }
        }

        self.fade_gain -= FADE_STEP * frames as f32;
        if self.fade_gain <= 0.0 {
            self.fade_gain = 0.0;
            self.had_audio = false;
        }
    }

    fn silence(outputs: &mut [&mut [f32]], from: usize, to: usize) {
        for ch in outputs.iter_mut() {
            let end = to.min(ch.len());
            if from < end {
                ch[from..end].fill(0.0);
            }
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ReceiverParams;

    fn process(receiver: &mut Receiver, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![7.0f32; frames];
        let mut right = vec![7.0f32; frames];
        let params = ReceiverParams::default();
        receiver.process_block(&mut [&mut left, &mut right], frames, &params);
        (left, right)
    }

    #[test]
    fn test_disconnected_outputs_silence() {
        let mut receiver = Receiver::with_name("ConduitTest_reader_none");
        receiver.prepare(64, &ReceiverParams::default());
        assert!(!receiver.is_connected());

        let (left, right) = process(&mut receiver, 64);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!(right.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_mute_short_circuits_and_resets_fade() {
        let mut receiver = Receiver::with_name("ConduitTest_reader_mute");
        receiver.prepare(64, &ReceiverParams::default());

        // Force fade state as if audio had just stopped.
        receiver.had_audio = true;
        receiver.fade_gain = 1.0;
        receiver.last_sample = [0.8, 0.8];

        let mut left = vec![7.0f32; 64];
        let mut right = vec![7.0f32; 64];
        let params = ReceiverParams {
            mute: true,
            ..Default::default()
        };
        receiver.process_block(&mut [&mut left, &mut right], 64, &params);

        assert!(left.iter().all(|&s| s == 0.0));
        assert!(!receiver.had_audio);
        assert_eq!(receiver.fade_gain, 0.0);
    }

    #[test]
    fn test_fade_out_ramp_shape() {
        let mut receiver = Receiver::with_name("ConduitTest_reader_fade");
        receiver.prepare(64, &ReceiverParams::default());
        receiver.had_audio = true;
        receiver.fade_gain = 1.0;
        receiver.last_sample = [1.0, 1.0];

        let (left, _) = process(&mut receiver, 64);

        // Linear ramp: 1.0, 0.95, 0.90, … clamped at zero.
        assert!((left[0] - 1.0).abs() < 1e-6);
        assert!((left[1] - 0.95).abs() < 1e-6);
        assert!((left[10] - 0.5).abs() < 1e-6);
        assert_eq!(left[30], 0.0);

        // No click: successive samples never jump by more than the step.
        for pair in left.windows(2) {
            assert!((pair[0] - pair[1]).abs() < 0.1);
        }

        // Ramp completed within the block; the state settles to silence.
        assert!(!receiver.had_audio);
        let (left, _) = process(&mut receiver, 64);
        assert!(left.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fade_state_persists_across_short_blocks() {
        let mut receiver = Receiver::with_name("ConduitTest_reader_fade_short");
        receiver.prepare(8, &ReceiverParams::default());
        receiver.had_audio = true;
        receiver.fade_gain = 1.0;
        receiver.last_sample = [1.0, 1.0];

        // 8-frame blocks only consume 0.4 of the ramp each.
        let mut left = vec![0.0f32; 8];
        let mut right = vec![0.0f32; 8];
        let params = ReceiverParams::default();
        receiver.process_block(&mut [&mut left, &mut right], 8, &params);
        assert!(receiver.had_audio);
        assert!((receiver.fade_gain - 0.6).abs() < 1e-6);

        let prev_last = left[7];
        receiver.process_block(&mut [&mut left, &mut right], 8, &params);
        // The ramp continues from where the previous block stopped.
        assert!((prev_last - left[0]).abs() < 0.1 + 1e-6);
    }

    #[test]
    fn test_clear_fatal_reopens_the_gate() {
        let mut receiver = Receiver::with_name("ConduitTest_reader_gate");
        receiver.fatal = Some(ProtocolError::VersionMismatch {
            expected: 1,
            found: 2,
        });
        assert!(receiver.fatal_error().is_some());

        receiver.clear_fatal();
        assert!(receiver.fatal_error().is_none());
        assert_eq!(receiver.reconnect_counter, 0);
    }
}
