//! Microphone capture feeding the uplink
//!
//! The cpal input stream is built and held on a dedicated named thread
//! (`cpal::Stream` is not `Send`); each callback hands its f32 frames to
//! the [`EgressWriter`], which converts and writes them to the tunnel.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;

use crate::audio::device::default_input_device;
use crate::error::{AudioError, FaultHandler};
use crate::format::{PcmFormat, SampleKind};
use crate::network::EgressWriter;

/// Capture tap installed by `start_recording`
pub struct MicCapture {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    format: PcmFormat,
}

impl MicCapture {
    /// Open the default input device and start pushing frames to `stream`.
    ///
    /// Fails if there is no input device, its format is unusable for the
    /// uplink converter, or the stream cannot be built.
    pub fn start(stream: TcpStream, on_fault: FaultHandler) -> Result<Self, AudioError> {
        let device = default_input_device()?;
        let supported = device.default_input_config()?;
        let config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let format = PcmFormat::new(SampleKind::F32, config.channels, config.sample_rate.0);

        let mut egress = EgressWriter::new(stream, format, on_fault)
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let device = match default_input_device() {
                    Ok(d) => d.into_inner(),
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        egress.push(data);
                    },
                    move |err| {
                        tracing::error!("capture stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                            return;
                        }
                        let _ = ready_tx.send(Ok(()));
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream is dropped here, stopping capture.
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => {
                tracing::info!("capture started: {}", format);
                Ok(Self {
                    running,
                    thread: Some(handle),
                    format,
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                // The thread never reported; tear it down.
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(AudioError::StreamError(
                    "capture thread did not come up".to_string(),
                ))
            }
        }
    }

    /// Microphone stream format
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Stop capturing and join the stream thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
