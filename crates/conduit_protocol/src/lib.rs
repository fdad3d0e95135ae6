//! Conduit Protocol - Shared-Memory Audio Transport
//!
//! This crate defines the wire contract between a Conduit producer (a
//! plugin host feeding audio) and its consumers (a receiver plugin in
//! another process, or a kernel-mode capture driver), plus the pieces
//! that implement it:
//! - Byte-exact region header layout and validation
//! - Named shared-region creation/attach with scoped release
//! - Lock-free SPSC ring of interleaved float32 frames
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐          ┌──────────────────────────────┐
//! │  Producer process        │          │  Consumer process / kernel   │
//! │  RT callback ──write──▶  │  shared  │  ◀──read── RT callback       │
//! │              SharedRing ═╪═ region ═╪═ SharedRing                  │
//! │  (write_pos, release)    │          │  (read_pos, release)         │
//! └──────────────────────────┘          └──────────────────────────────┘
//! ```
//!
//! Synchronization is exclusively acquire/release atomics on the two
//! position counters; there is no mutex, event, or syscall on the hot
//! path. Exactly one producer and one consumer may be attached at a time.

mod error;
mod header;
mod region;
mod ring;

pub use error::{ProtocolError, ProtocolResult};
pub use header::{
    region_bytes, HeaderView, StreamParams, DEFAULT_BUFFER_FRAMES, DEFAULT_CHANNELS,
    HEADER_BYTES, MAX_BUFFER_FRAMES, MIN_BUFFER_FRAMES, PROTOCOL_VERSION, SHM_NAME,
};
pub use region::{Namespace, SharedRegion};
pub use ring::SharedRing;
