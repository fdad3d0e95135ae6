//! Periodic Capture Service
//!
//! The user-mode analog of the driver's timer DPC: a dedicated thread
//! ticks every ~5 ms, pulls up to one period of frames out of the shared
//! region, converts them to the negotiated format, and hands the bytes
//! to a [`CaptureSink`] - the seam where a real driver would fill the
//! audio engine's DMA-visible buffer.
//!
//! The tick never allocates and never blocks on anything but its timer:
//! all scratch is sized at stream open, absence of the producer degrades
//! to silence, and reconnection is a polled retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use conduit_protocol::{Namespace, SHM_NAME};
use tracing::{info, warn};

use crate::error::{DriverError, DriverResult};
use crate::format::{convert_from_f32, CaptureFormat};
use crate::reader::DriverReader;

/// Tick period. At 48kHz one period is 240 frames, well inside typical
/// engine buffer sizes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Scratch headroom in frames; one period plus margin.
const MAX_PERIOD_FRAMES: usize = 1024;

/// Attempt to (re)attach every this many ticks (~1s).
const RECONNECT_TICKS: u32 = 200;

/// Destination for converted capture audio.
///
/// `deliver` is called once per tick from the capture thread with
/// exactly one period of audio in the negotiated format; silent periods
/// arrive as zero bytes.
pub trait CaptureSink: Send {
    fn deliver(&mut self, data: &[u8], frames: usize);
}

/// Owns the capture thread for one negotiated stream.
pub struct CaptureService {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureService {
    /// Start capturing the well-known stream through the privileged
    /// namespace.
    pub fn start(format: CaptureFormat, sink: Box<dyn CaptureSink>) -> DriverResult<Self> {
        Self::start_named(SHM_NAME, Namespace::Global, format, sink)
    }

    /// Start against an explicitly named region (tests run unprivileged).
    pub fn start_named(
        name: &str,
        namespace: Namespace,
        format: CaptureFormat,
        sink: Box<dyn CaptureSink>,
    ) -> DriverResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let name = name.to_string();

        let thread = thread::Builder::new()
            .name("conduit-capture".into())
            .spawn(move || {
                Self::service_main(&name, namespace, format, sink, &shutdown_clone);
            })
            .map_err(|e| DriverError::ThreadSpawn(e.to_string()))?;

        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "capture service started"
        );

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Stop the capture thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn service_main(
        name: &str,
        namespace: Namespace,
        format: CaptureFormat,
        mut sink: Box<dyn CaptureSink>,
        shutdown: &AtomicBool,
    ) {
        let period_frames =
            (format.sample_rate as usize * POLL_INTERVAL.as_millis() as usize / 1000)
                .min(MAX_PERIOD_FRAMES);
        let out_channels = format.channels as usize;

        // Everything the tick touches is allocated here, once.
        let mut ring_scratch = vec![0.0f32; MAX_PERIOD_FRAMES * 2];
        let mut period = vec![0.0f32; MAX_PERIOD_FRAMES * out_channels];
        let mut bytes = vec![0u8; MAX_PERIOD_FRAMES * out_channels * 4];

        let mut reader: Option<DriverReader> = None;
        // Attempt the first attach on the first tick.
        let mut retry_ticks = RECONNECT_TICKS;
        let mut warned_rate = false;

        while !shutdown.load(Ordering::Acquire) {
            if reader.is_none() {
                retry_ticks += 1;
                if retry_ticks >= RECONNECT_TICKS {
                    retry_ticks = 0;
                    reader = Self::try_open(name, namespace, &format, &mut warned_rate);
                }
            }

            let mut read = 0usize;
            let mut ring_channels = 0usize;
            let mut lost = false;
            if let Some(r) = reader.as_mut() {
                if r.producer_active() {
                    ring_channels = r.channels() as usize;
                    read = r.read(
                        &mut ring_scratch[..period_frames * ring_channels],
                        period_frames,
                    );
                } else {
                    lost = true;
                }
            }
            if lost {
                info!("producer went away; capture falls back to silence");
                reader = None;
                retry_ticks = 0;
            }

            // Adapt channel counts into the period buffer and pad the
            // under-run tail with silence.
            for frame in 0..period_frames {
                for ch in 0..out_channels {
                    let sample = if frame < read {
                        match (ring_channels, out_channels) {
                            // Stereo delivered to a mono endpoint: take
                            // channel 0.
                            (2, 1) => ring_scratch[frame * 2],
                            // Mono stream on a stereo endpoint:
                            // duplicate.
                            (1, 2) => ring_scratch[frame],
                            _ => ring_scratch[frame * ring_channels + ch],
                        }
                    } else {
                        0.0
                    };
                    period[frame * out_channels + ch] = sample;
                }
            }

            let n = convert_from_f32(
                &period[..period_frames * out_channels],
                format.format,
                &mut bytes,
            );
            sink.deliver(&bytes[..n], period_frames);

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn try_open(
        name: &str,
        namespace: Namespace,
        format: &CaptureFormat,
        warned_rate: &mut bool,
    ) -> Option<DriverReader> {
        let reader = DriverReader::open_named(name, namespace).ok()?;

        // No resampler on this path: the stream must already run at the
        // negotiated rate, otherwise keep polling (the producer may come
        // back at the right rate).
        if reader.sample_rate() != format.sample_rate {
            if !*warned_rate {
                warn!(
                    stream = reader.sample_rate(),
                    negotiated = format.sample_rate,
                    "stream sample rate differs from negotiated capture rate"
                );
                *warned_rate = true;
            }
            return None;
        }

        if !reader.producer_active() {
            return None;
        }

        *warned_rate = false;
        Some(reader)
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use conduit_host::{HostConfig, StreamWriter};
    use std::sync::Mutex;

    struct CollectingSink {
        delivered: Arc<Mutex<Vec<u8>>>,
        frames: Arc<Mutex<usize>>,
    }

    impl CaptureSink for CollectingSink {
        fn deliver(&mut self, data: &[u8], frames: usize) {
            self.delivered.lock().unwrap().extend_from_slice(data);
            *self.frames.lock().unwrap() += frames;
        }
    }

    fn make_sink() -> (Box<CollectingSink>, Arc<Mutex<Vec<u8>>>, Arc<Mutex<usize>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let frames = Arc::new(Mutex::new(0));
        let sink = Box::new(CollectingSink {
            delivered: Arc::clone(&delivered),
            frames: Arc::clone(&frames),
        });
        (sink, delivered, frames)
    }

    fn unique_name(tag: &str) -> String {
        format!("ConduitTest_capture_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_absent_producer_yields_silence() {
        let name = unique_name("absent");
        let (sink, delivered, frames) = make_sink();

        let format = CaptureFormat::negotiate(48_000, 2, SampleFormat::Int16).unwrap();
        let service =
            CaptureService::start_named(&name, Namespace::Global, format, sink).unwrap();
        thread::sleep(Duration::from_millis(40));
        service.stop();

        assert!(*frames.lock().unwrap() > 0, "ticks must keep delivering");
        assert!(delivered.lock().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_captures_and_converts_stream_audio() {
        let name = unique_name("stream");
        let config = HostConfig {
            sample_rate: 48000,
            channels: 2,
            buffer_frames: 8192,
        };
        let mut writer = StreamWriter::create_named(&name, &config, 1024).unwrap();

        // Full-scale tone so 16-bit conversion is unmistakable.
        let tone = vec![1.0f32; 1024];
        writer.write_block(&[&tone, &tone], 1024);

        let (sink, delivered, frames) = make_sink();
        let format = CaptureFormat::negotiate(48_000, 2, SampleFormat::Int16).unwrap();
        let service =
            CaptureService::start_named(&name, Namespace::Global, format, sink).unwrap();

        // A few ticks, topping the ring up as the service drains it.
        for _ in 0..10 {
            writer.write_block(&[&tone[..256], &tone[..256]], 256);
            thread::sleep(Duration::from_millis(10));
        }
        service.stop();

        assert!(*frames.lock().unwrap() > 0);
        let bytes = delivered.lock().unwrap();
        // Full-scale f32 becomes i16::MAX little-endian (0xFF 0x7F).
        let full_scale = bytes
            .chunks_exact(2)
            .filter(|c| i16::from_le_bytes([c[0], c[1]]) == 32767)
            .count();
        assert!(full_scale > 0, "converted audio must reach the sink");
    }

    #[test]
    fn test_rejects_unsupported_negotiation() {
        assert!(matches!(
            CaptureFormat::negotiate(96_000, 2, SampleFormat::Float32),
            Err(DriverError::UnsupportedFormat(_))
        ));
    }
}
