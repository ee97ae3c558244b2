//! Network egress: microphone → socket
//!
//! The capture path pushes each microphone buffer through the format
//! converter (device format → 8 kHz mono i16) and writes the result to the
//! tunnel with a blocking `write_all`. Runs inside the cpal input callback
//! context; see the concurrency notes on [`StreamController`].
//!
//! [`StreamController`]: crate::controller::StreamController

use std::io::Write;
use std::net::TcpStream;

use crate::error::{Error, FaultHandler, StreamFault};
use crate::format::{FormatConverter, PcmBuffer, PcmFormat};

/// Converts and writes microphone frames to the tunnel.
pub struct EgressWriter {
    stream: TcpStream,
    converter: FormatConverter,
    on_fault: FaultHandler,
    frames_converted: u64,
    bytes_written: u64,
    write_errors: u64,
}

impl EgressWriter {
    /// Build a writer for a microphone delivering f32 frames in
    /// `mic_format`.
    pub fn new(
        stream: TcpStream,
        mic_format: PcmFormat,
        on_fault: FaultHandler,
    ) -> Result<Self, Error> {
        let converter = FormatConverter::new(mic_format, PcmFormat::network())?;
        Ok(Self {
            stream,
            converter,
            on_fault,
            frames_converted: 0,
            bytes_written: 0,
            write_errors: 0,
        })
    }

    /// Convert one microphone buffer and write it to the socket.
    ///
    /// Conversion failure is reported through the fault callback and the
    /// buffer dropped, never retried. Write failures are logged and
    /// counted; the matching disconnect surfaces on the ingress side.
    pub fn push(&mut self, samples: &[f32]) {
        let input = PcmBuffer::from_f32(samples.to_vec(), self.converter.source());

        let converted = match self.converter.convert(&input) {
            Ok(buffer) => buffer,
            Err(e) => {
                (self.on_fault)(StreamFault::CaptureConversionFailed(e.to_string()));
                return;
            }
        };

        self.frames_converted += converted.frame_count() as u64;

        let payload = converted.to_ne_bytes();
        match self.stream.write_all(&payload) {
            Ok(()) => self.bytes_written += payload.len() as u64,
            Err(e) => {
                self.write_errors += 1;
                if self.write_errors == 1 {
                    tracing::warn!("uplink write failed: {}", e);
                }
            }
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn frames_converted(&self) -> u64 {
        self.frames_converted
    }
}
