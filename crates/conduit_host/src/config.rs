//! Host Stream Configuration

use serde::{Deserialize, Serialize};

use conduit_protocol::{region_bytes, StreamParams, DEFAULT_BUFFER_FRAMES, DEFAULT_CHANNELS};

/// Geometry of the shared stream a host publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Sample rate in Hz, inherited from the plugin host
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u32,

    /// Ring capacity in frames. Must be a power of two.
    pub buffer_frames: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: DEFAULT_CHANNELS,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        }
    }
}

impl HostConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192_000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        self.stream_params().validate().map_err(|e| e.to_string())
    }

    /// Immutable header parameters for this configuration
    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            buffer_frames: self.buffer_frames,
        }
    }

    /// Total shared-region size for this configuration
    pub fn region_bytes(&self) -> usize {
        region_bytes(self.buffer_frames, self.channels)
    }

    /// Worst-case transport latency if the ring ever filled completely
    pub fn max_latency_ms(&self) -> f32 {
        (self.buffer_frames as f32 / self.sample_rate as f32) * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.buffer_frames, 32768);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let invalid_rate = HostConfig {
            sample_rate: 100,
            ..Default::default()
        };
        assert!(invalid_rate.validate().is_err());

        let invalid_frames = HostConfig {
            buffer_frames: 1000, // not a power of two
            ..Default::default()
        };
        assert!(invalid_frames.validate().is_err());

        let invalid_channels = HostConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(invalid_channels.validate().is_err());
    }

    #[test]
    fn test_region_bytes() {
        let config = HostConfig {
            sample_rate: 48000,
            channels: 2,
            buffer_frames: 1024,
        };
        assert_eq!(config.region_bytes(), 128 + 1024 * 2 * 4);
    }

    #[test]
    fn test_config_serialization() {
        let config = HostConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: HostConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.sample_rate, deserialized.sample_rate);
        assert_eq!(config.buffer_frames, deserialized.buffer_frames);
    }
}
