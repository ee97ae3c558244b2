//! # PCM Bridge
//!
//! Bidirectional low-latency PCM audio bridging between a raw TCP tunnel
//! and the local audio devices.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           REMOTE DEVICE                              │
//! │        raw TCP byte stream: i16 PCM, 8000 Hz, mono, no framing       │
//! └───────────────┬───────────────────────────────────▲──────────────────┘
//!                 │ downlink                          │ uplink
//!                 ▼                                   │
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            LOCAL HOST                                │
//! │  ┌─────────────────┐                     ┌───────────────────────┐   │
//! │  │ Network Ingress │                     │ Network Egress        │   │
//! │  │ (read thread)   │                     │ (mic callback writer) │   │
//! │  └───────┬─────────┘                     └──────────▲────────────┘   │
//! │          ▼                                          │                │
//! │  ┌─────────────────┐                     ┌──────────┴────────────┐   │
//! │  │ SPSC byte ring  │                     │ Format Converter      │   │
//! │  │ (5 s capacity)  │                     │ mic → 8 kHz mono i16  │   │
//! │  └───────┬─────────┘                     └──────────▲────────────┘   │
//! │          ▼                                          │                │
//! │  ┌─────────────────┐   ┌───────────────┐   ┌────────┴───────────┐   │
//! │  │ Render Loop     ├──▶│ Format Conv.  │   │ Microphone (cpal)  │   │
//! │  │ (200 ms cadence)│   │ 8 kHz → dev   │   └────────────────────┘   │
//! │  └─────────────────┘   └───────┬───────┘                            │
//! │                                ▼                                    │
//! │                        ┌───────────────┐                            │
//! │                        │ Playback sink │                            │
//! │                        │ (cpal output) │                            │
//! │                        └───────────────┘                            │
//! │                                                                     │
//! │  StreamController owns every stage and drives the lifecycle:        │
//! │  Idle → Connecting → Streaming (± Recording) → Closed               │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod format;
pub mod network;
pub mod render;

pub use controller::{StreamController, StreamState};
pub use error::{Error, FaultHandler, Result, StreamFault};
pub use format::{PcmBuffer, PcmFormat, SampleKind};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Sample rate of the tunneled PCM stream
    pub const NETWORK_SAMPLE_RATE: u32 = 8000;

    /// Channel count of the tunneled PCM stream (mono)
    pub const NETWORK_CHANNELS: u16 = 1;

    /// Bytes per network sample (i16)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Default ring buffer depth in seconds of network audio
    pub const DEFAULT_BUFFER_SECONDS: f32 = 5.0;

    /// Render loop cadence
    pub const RENDER_INTERVAL: Duration = Duration::from_millis(200);

    /// Bytes required before the render loop flushes a chunk (~250 ms)
    pub const RENDER_THRESHOLD_BYTES: usize =
        (NETWORK_SAMPLE_RATE as usize / 4) * BYTES_PER_SAMPLE;

    /// Scratch buffer size for socket reads
    pub const READ_CHUNK_BYTES: usize = 4096;
}
