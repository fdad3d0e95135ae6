//! Receiver Parameters
//!
//! The receiver exposes two user-facing parameters, persisted across
//! sessions by the settings module: a mute switch and a buffer preset
//! trading latency against tolerance to clock drift.

use serde::{Deserialize, Serialize};

/// Buffer preset: how much audio the receiver tries to keep buffered.
///
/// `target_fill` is the steady-state occupancy the receiver steers
/// toward; `high_threshold` is the occupancy at which it starts
/// discarding to compensate a faster producer clock. At 48kHz the
/// target fill roughly equals latency in ms × 48.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferPreset {
    /// 256 frames (~5ms)
    UltraLow,
    /// 512 frames (~10ms)
    Low,
    /// 1024 frames (~21ms)
    Medium,
    /// 2048 frames (~43ms)
    High,
    /// 4096 frames (~85ms)
    Safe,
}

/// `(target_fill, high_threshold)` per preset, indexed by
/// [`BufferPreset::index`].
const PRESET_TABLE: [(u32, u32); 5] = [
    (256, 768),
    (512, 1536),
    (1024, 3072),
    (2048, 6144),
    (4096, 12288),
];

impl BufferPreset {
    /// All presets in UI order.
    pub const ALL: [BufferPreset; 5] = [
        BufferPreset::UltraLow,
        BufferPreset::Low,
        BufferPreset::Medium,
        BufferPreset::High,
        BufferPreset::Safe,
    ];

    /// Stable parameter index (0..4) for host automation.
    pub fn index(self) -> usize {
        match self {
            BufferPreset::UltraLow => 0,
            BufferPreset::Low => 1,
            BufferPreset::Medium => 2,
            BufferPreset::High => 3,
            BufferPreset::Safe => 4,
        }
    }

    /// Preset for a parameter index; out-of-range falls back to the
    /// default.
    pub fn from_index(index: usize) -> Self {
        Self::ALL.get(index).copied().unwrap_or_default()
    }

    /// Steady-state occupancy goal in frames.
    pub fn target_fill(self) -> u32 {
        PRESET_TABLE[self.index()].0
    }

    /// Occupancy above which drift compensation discards.
    pub fn high_threshold(self) -> u32 {
        PRESET_TABLE[self.index()].1
    }

    pub fn label(self) -> &'static str {
        match self {
            BufferPreset::UltraLow => "Ultra Low (256)",
            BufferPreset::Low => "Low (512)",
            BufferPreset::Medium => "Medium (1024)",
            BufferPreset::High => "High (2048)",
            BufferPreset::Safe => "Safe (4096)",
        }
    }
}

impl Default for BufferPreset {
    fn default() -> Self {
        BufferPreset::Low
    }
}

/// The receiver's user parameters, read on every block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReceiverParams {
    /// Short-circuit the block to silence
    #[serde(default)]
    pub mute: bool,

    /// Buffering preset
    #[serde(default)]
    pub buffer: BufferPreset,
}

impl Default for ReceiverParams {
    fn default() -> Self {
        Self {
            mute: false,
            buffer: BufferPreset::default(),
        }
    }
}
