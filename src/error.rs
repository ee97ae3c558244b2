//! Error types for the audio bridge
//!
//! Setup failures (device lookup, stream creation, bad configuration) are
//! ordinary `Result` errors. Runtime faults inside the pipeline never tear
//! it down; they are delivered asynchronously as [`StreamFault`] values
//! through the owner's [`FaultHandler`] callback.

use std::sync::Arc;
use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Playback sink rejected buffer: {0}")]
    SinkRejected(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Socket configuration failed: {0}")]
    SocketConfig(String),
}

/// Format conversion errors
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Incompatible formats: {from} -> {target}")]
    Incompatible { from: String, target: String },

    #[error("Unexpected input format: expected {expected}, got {actual}")]
    UnexpectedInput { expected: String, actual: String },

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

/// Non-fatal pipeline faults, reported through the owner's callback.
///
/// A fault always means the affected chunk was dropped (or, for playback
/// conversion, left in the ring for a later attempt); the pipeline itself
/// keeps running. There is no automatic reconnect: after
/// [`SocketFailedToConnect`](StreamFault::SocketFailedToConnect) or
/// [`PeerDisconnected`](StreamFault::PeerDisconnected) the owner decides
/// whether to call `connect_to` again.
#[derive(Error, Debug, Clone)]
pub enum StreamFault {
    #[error("failed to connect to {addr}: {reason}")]
    SocketFailedToConnect { addr: String, reason: String },

    #[error("playback format conversion failed: {0}")]
    PlaybackConversionFailed(String),

    #[error("capture format conversion failed: {0}")]
    CaptureConversionFailed(String),

    #[error("ring buffer full, dropped {dropped} bytes")]
    RingBufferFull { dropped: usize },

    #[error("peer disconnected: {0}")]
    PeerDisconnected(String),
}

/// Callback used to deliver [`StreamFault`]s to the owner.
///
/// Invoked from pipeline threads and audio callbacks; implementations must
/// be cheap and non-blocking.
pub type FaultHandler = Arc<dyn Fn(StreamFault) + Send + Sync>;

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, Error>;
