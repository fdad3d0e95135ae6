//! Conduit Host - Producer Side
//!
//! This crate is the producer half of the Conduit transport, embedded in
//! a plugin host running inside a DAW or capture application:
//! - Publishing the host's audio onto the shared region ([`StreamWriter`])
//! - An in-process planar ring for decoupling callback threads ([`PlanarRing`])
//! - The monitor output bridge replaying audio onto a virtual cable
//!   device ([`MonitorBridge`], [`MonitorOutput`])
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Producer process                          │
//! │                                                               │
//! │  host RT callback ──┬─▶ StreamWriter ──▶ shared region ──▶ …  │
//! │                     │      (interleave + SPSC write)          │
//! │                     └─▶ MonitorBridge ──▶ cable RT callback   │
//! │                            (PlanarRing, own device clock)     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything reachable from an RT callback is allocation-free and
//! lock-free after construction; control-plane work (region creation,
//! device setup, teardown) stays on ordinary threads.
//!
//! Plugin-format glue (parameters, GUI, presets) and audio device
//! enumeration are the embedding application's responsibility.

mod config;
mod error;
mod monitor;
mod planar_ring;
mod writer;

pub use config::HostConfig;
pub use error::{HostError, HostResult};
pub use monitor::{
    MonitorBridge, MonitorEvent, MonitorOutput, MonitorStatus, MONITOR_CHANNELS,
    MONITOR_RING_FRAMES,
};
pub use planar_ring::PlanarRing;
pub use writer::StreamWriter;

// Re-export the protocol types callers need for attach-side plumbing
pub use conduit_protocol::{ProtocolError, StreamParams, SHM_NAME};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify public API is accessible
        let config = HostConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(MONITOR_RING_FRAMES, 4096);
    }
}
