//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use buffer::{ring_buffer, RingReader, RingWriter};
pub use capture::MicCapture;
pub use device::{default_input_device, default_output_device, AudioDevice};
pub use playback::{DevicePlayback, MemorySink, PlaybackSink};
