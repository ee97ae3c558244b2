//! Playback sinks
//!
//! The render loop hands converted device-format buffers to a
//! [`PlaybackSink`]. [`DevicePlayback`] feeds the default cpal output
//! device; [`MemorySink`] collects buffers in memory for tests and
//! headless runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::Mutex;

use crate::audio::device::default_output_device;
use crate::error::AudioError;
use crate::format::{PcmBuffer, PcmFormat, SampleKind};

/// Destination for rendered audio.
///
/// Implementations report their native format (the render loop converts
/// into it), accept buffers for asynchronous playback, and expose a mixer
/// volume. `shutdown` drops anything still scheduled.
pub trait PlaybackSink: Send + Sync {
    /// Native format buffers must arrive in
    fn output_format(&self) -> PcmFormat;

    /// Schedule a buffer for playback. The buffer must already be in
    /// [`output_format`](Self::output_format).
    fn enqueue(&self, buffer: PcmBuffer) -> Result<(), AudioError>;

    /// Set mixer volume, clamped to [0.0, 1.0]
    fn set_volume(&self, level: f32);

    /// Current mixer volume
    fn volume(&self) -> f32;

    /// Stop playback and discard all scheduled audio
    fn shutdown(&self);
}

fn volume_to_bits(level: f32) -> u32 {
    level.clamp(0.0, 1.0).to_bits()
}

struct PlaybackShared {
    /// Interleaved device-format samples awaiting the output callback
    queue: Mutex<VecDeque<f32>>,
    volume_bits: AtomicU32,
    underruns: AtomicU64,
    running: AtomicBool,
}

/// Playback through the default cpal output device.
///
/// `cpal::Stream` is not `Send`, so the stream lives on a dedicated named
/// thread that holds it open while the running flag is set. The output
/// callback drains the shared sample queue, applies the mixer volume, and
/// substitutes silence on underrun.
pub struct DevicePlayback {
    format: PcmFormat,
    shared: Arc<PlaybackShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DevicePlayback {
    /// Open the default output device and start the playback thread.
    pub fn start() -> Result<Self, AudioError> {
        let device = default_output_device()?;
        let supported = device.default_output_config()?;
        let config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let format = PcmFormat::new(SampleKind::F32, config.channels, config.sample_rate.0);

        let shared = Arc::new(PlaybackShared {
            queue: Mutex::new(VecDeque::new()),
            volume_bits: AtomicU32::new(volume_to_bits(1.0)),
            underruns: AtomicU64::new(0),
            running: AtomicBool::new(true),
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || run_playback_thread(device.into_inner(), config, thread_shared))
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!("playback started: {}", format);

        Ok(Self {
            format,
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Samples substituted with silence so far
    pub fn underrun_count(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Device-format samples queued and not yet played
    pub fn queued_samples(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

fn run_playback_thread(
    device: cpal::Device,
    config: cpal::StreamConfig,
    shared: Arc<PlaybackShared>,
) {
    let cb_shared = shared.clone();
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let gain = f32::from_bits(cb_shared.volume_bits.load(Ordering::Relaxed));
            let mut queue = cb_shared.queue.lock();
            let mut missed = 0u64;
            for sample in data.iter_mut() {
                match queue.pop_front() {
                    Some(s) => *sample = s * gain,
                    None => {
                        *sample = 0.0;
                        missed += 1;
                    }
                }
            }
            drop(queue);
            if missed > 0 {
                cb_shared.underruns.fetch_add(missed, Ordering::Relaxed);
            }
        },
        move |err| {
            tracing::error!("playback stream error: {}", err);
        },
        None,
    );

    match stream {
        Ok(stream) => {
            if let Err(e) = stream.play() {
                tracing::error!("failed to start playback stream: {}", e);
                return;
            }
            while shared.running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }
            // Stream is dropped here, stopping output.
        }
        Err(e) => {
            tracing::error!("failed to build playback stream: {}", e);
        }
    }
}

impl PlaybackSink for DevicePlayback {
    fn output_format(&self) -> PcmFormat {
        self.format
    }

    fn enqueue(&self, buffer: PcmBuffer) -> Result<(), AudioError> {
        if buffer.format() != self.format {
            return Err(AudioError::SinkRejected(format!(
                "expected {}, got {}",
                self.format,
                buffer.format()
            )));
        }
        let samples = buffer
            .as_f32()
            .ok_or_else(|| AudioError::SinkRejected("device sink takes f32 samples".into()))?;
        self.shared.queue.lock().extend(samples.iter().copied());
        Ok(())
    }

    fn set_volume(&self, level: f32) {
        self.shared
            .volume_bits
            .store(volume_to_bits(level), Ordering::Relaxed);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }

    fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.queue.lock().clear();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DevicePlayback {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sink that records every buffer it is handed.
///
/// Stands in for the audio device in tests and headless runs; the reported
/// output format is chosen at construction.
pub struct MemorySink {
    format: PcmFormat,
    buffers: Mutex<Vec<PcmBuffer>>,
    volume_bits: AtomicU32,
}

impl MemorySink {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            buffers: Mutex::new(Vec::new()),
            volume_bits: AtomicU32::new(volume_to_bits(1.0)),
        }
    }

    /// Buffers received so far, in arrival order
    pub fn buffers(&self) -> Vec<PcmBuffer> {
        self.buffers.lock().clone()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().len()
    }
}

impl PlaybackSink for MemorySink {
    fn output_format(&self) -> PcmFormat {
        self.format
    }

    fn enqueue(&self, buffer: PcmBuffer) -> Result<(), AudioError> {
        if buffer.format() != self.format {
            return Err(AudioError::SinkRejected(format!(
                "expected {}, got {}",
                self.format,
                buffer.format()
            )));
        }
        self.buffers.lock().push(buffer);
        Ok(())
    }

    fn set_volume(&self, level: f32) {
        self.volume_bits
            .store(volume_to_bits(level), Ordering::Relaxed);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    fn shutdown(&self) {
        self.buffers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects_in_order() {
        let sink = MemorySink::new(PcmFormat::network());
        for i in 0..3i16 {
            sink.enqueue(PcmBuffer::from_i16(vec![i; 4], PcmFormat::network()))
                .unwrap();
        }
        let buffers = sink.buffers();
        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers[1].as_i16().unwrap(), &[1, 1, 1, 1]);
    }

    #[test]
    fn test_memory_sink_rejects_wrong_format() {
        let sink = MemorySink::new(PcmFormat::network());
        let wrong = PcmFormat::new(SampleKind::F32, 2, 48000);
        let result = sink.enqueue(PcmBuffer::from_f32(vec![0.0; 4], wrong));
        assert!(matches!(result, Err(AudioError::SinkRejected(_))));
    }

    #[test]
    fn test_volume_clamped() {
        let sink = MemorySink::new(PcmFormat::network());
        sink.set_volume(3.0);
        assert_eq!(sink.volume(), 1.0);
        sink.set_volume(-1.0);
        assert_eq!(sink.volume(), 0.0);
        sink.set_volume(0.5);
        assert_eq!(sink.volume(), 0.5);
    }

    #[test]
    fn test_shutdown_discards_scheduled_audio() {
        let sink = MemorySink::new(PcmFormat::network());
        sink.enqueue(PcmBuffer::from_i16(vec![1; 4], PcmFormat::network()))
            .unwrap();
        sink.shutdown();
        assert_eq!(sink.buffer_count(), 0);
    }
}
