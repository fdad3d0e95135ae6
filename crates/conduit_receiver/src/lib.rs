//! Conduit Receiver - Consumer Side
//!
//! The receiver runs inside an independent consumer application (a
//! voice, conferencing, or streaming app hosting it as a plugin) and
//! pulls the producer's audio out of the shared region inside that
//! application's real-time callback.
//!
//! # Architecture
//!
//! ```text
//!                shared region (other process)
//!                          │
//!                          ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │ Receiver                                             │
//!  │  Disconnected ──every 100 blocks──▶ attach + validate│
//!  │       ▲                                  │           │
//!  │       │ producer_active = 0 /            ▼           │
//!  │       │ stalled write_pos          Connected         │
//!  │       └──────── fade-out ◀── drift comp + read       │
//!  └──────────────────────────────────────────────────────┘
//! ```
//!
//! The per-block path is allocation-free and lock-free; every error it
//! can observe becomes a state transition with a fade-out, never a
//! glitch. User parameters (`mute`, buffer preset) persist across
//! sessions through [`ReceiverSettings`].

mod params;
mod reader;
mod settings;

pub use params::{BufferPreset, ReceiverParams};
pub use reader::{
    Receiver, DRIFT_WARMUP_BLOCKS, MAX_CHANNELS, RECONNECT_INTERVAL_BLOCKS,
    STALL_TIMEOUT_BLOCKS,
};
pub use settings::ReceiverSettings;

// Re-export what embedders need to interpret failures
pub use conduit_protocol::{ProtocolError, SHM_NAME};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify public API is accessible
        let receiver = Receiver::default();
        assert!(!receiver.is_connected());
        assert_eq!(BufferPreset::default().target_fill(), 512);
    }
}
