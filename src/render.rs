//! Render loop: ring buffer → playback sink
//!
//! A dedicated thread drains the ring buffer in ~250 ms chunks and hands
//! them, converted to the sink's device format, to the playback sink. The
//! loop runs for the whole life of the controller — while the ring is
//! empty (idle, connecting, starved) an iteration is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::RingReader;
use crate::audio::playback::PlaybackSink;
use crate::error::{FaultHandler, StreamFault};
use crate::format::{FormatConverter, PcmBuffer, PcmFormat};

/// One render iteration.
///
/// Takes exactly `threshold` bytes when that much is buffered, converts
/// them to the sink format, and consumes them only once the sink has
/// accepted the result — a failed conversion leaves the bytes in place for
/// the next attempt. Below the threshold nothing happens: no blocking, no
/// spinning. Returns whether a chunk was flushed.
pub fn render_once(
    reader: &mut RingReader,
    converter: &FormatConverter,
    sink: &dyn PlaybackSink,
    threshold: usize,
    scratch: &mut [u8],
    on_fault: &FaultHandler,
) -> bool {
    debug_assert_eq!(scratch.len(), threshold);

    if !reader.peek_exact(scratch) {
        return false;
    }

    let chunk = PcmBuffer::from_ne_bytes(scratch, PcmFormat::network());
    let converted = match converter.convert(&chunk) {
        Ok(buffer) => buffer,
        Err(e) => {
            on_fault(StreamFault::PlaybackConversionFailed(e.to_string()));
            return false;
        }
    };

    match sink.enqueue(converted) {
        Ok(()) => {
            reader.consume(threshold);
            true
        }
        Err(e) => {
            // The sink format cannot drift (the converter targets it), but
            // a rejection must not livelock on the same bytes forever.
            on_fault(StreamFault::PlaybackConversionFailed(e.to_string()));
            reader.consume(threshold);
            false
        }
    }
}

/// Handle to the render thread
pub struct RenderLoop {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RenderLoop {
    /// Spawn the render thread.
    ///
    /// Each iteration starts by fixing a deadline `interval` from now on
    /// the monotonic clock, does at most one chunk of work, and sleeps
    /// until that deadline — the cadence stays stable however long the
    /// conversion takes.
    pub fn spawn(
        mut reader: RingReader,
        converter: FormatConverter,
        sink: Arc<dyn PlaybackSink>,
        interval: Duration,
        threshold: usize,
        on_fault: FaultHandler,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new().name("render".to_string()).spawn(move || {
            let mut scratch = vec![0u8; threshold];
            while running_for_loop.load(Ordering::Relaxed) {
                let deadline = Instant::now() + interval;

                render_once(
                    &mut reader,
                    &converter,
                    sink.as_ref(),
                    threshold,
                    &mut scratch,
                    &on_fault,
                );

                // Sleep to the deadline in short slices so a stop request
                // is observed promptly even with a long cadence.
                while running_for_loop.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::sleep((deadline - now).min(Duration::from_millis(20)));
                }
            }
        })?;

        Ok(Self {
            running,
            thread: Some(handle),
        })
    }

    /// Signal the thread to stop and join it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::ring_buffer;
    use crate::audio::playback::MemorySink;
    use crate::format::SampleKind;

    const THRESHOLD: usize = 4000;

    fn identity_converter() -> FormatConverter {
        FormatConverter::new(PcmFormat::network(), PcmFormat::network()).unwrap()
    }

    fn no_faults() -> FaultHandler {
        Arc::new(|f| panic!("unexpected fault: {f}"))
    }

    #[test]
    fn test_iteration_flushes_exactly_one_chunk() {
        let (mut w, mut r) = ring_buffer(80_000);
        let sink = MemorySink::new(PcmFormat::network());
        let converter = identity_converter();
        let mut scratch = vec![0u8; THRESHOLD];

        // Exactly one threshold's worth of a known pattern.
        let samples: Vec<i16> = (0..2000).map(|i| i as i16).collect();
        let bytes = PcmBuffer::from_i16(samples.clone(), PcmFormat::network()).to_ne_bytes();
        assert_eq!(bytes.len(), THRESHOLD);
        assert!(w.write(&bytes));

        let flushed = render_once(
            &mut r,
            &converter,
            &sink,
            THRESHOLD,
            &mut scratch,
            &no_faults(),
        );
        assert!(flushed);
        assert!(r.is_empty());
        let buffers = sink.buffers();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].as_i16().unwrap(), samples.as_slice());
    }

    #[test]
    fn test_below_threshold_is_a_no_op() {
        let (mut w, mut r) = ring_buffer(80_000);
        let sink = MemorySink::new(PcmFormat::network());
        let converter = identity_converter();
        let mut scratch = vec![0u8; THRESHOLD];

        assert!(w.write(&[0u8; THRESHOLD - 2]));
        let flushed = render_once(
            &mut r,
            &converter,
            &sink,
            THRESHOLD,
            &mut scratch,
            &no_faults(),
        );
        assert!(!flushed);
        assert_eq!(r.available(), THRESHOLD - 2);
        assert_eq!(sink.buffer_count(), 0);
    }

    #[test]
    fn test_takes_only_threshold_bytes() {
        let (mut w, mut r) = ring_buffer(80_000);
        let sink = MemorySink::new(PcmFormat::network());
        let converter = identity_converter();
        let mut scratch = vec![0u8; THRESHOLD];

        assert!(w.write(&vec![0u8; THRESHOLD + 100]));
        assert!(render_once(
            &mut r,
            &converter,
            &sink,
            THRESHOLD,
            &mut scratch,
            &no_faults(),
        ));
        assert_eq!(r.available(), 100);
        assert_eq!(sink.buffer_count(), 1);
    }

    #[test]
    fn test_conversion_to_device_format() {
        let (mut w, mut r) = ring_buffer(80_000);
        let device = PcmFormat::new(SampleKind::F32, 2, 48000);
        let sink = MemorySink::new(device);
        let converter = FormatConverter::new(PcmFormat::network(), device).unwrap();
        let mut scratch = vec![0u8; THRESHOLD];

        assert!(w.write(&vec![0u8; THRESHOLD]));
        assert!(render_once(
            &mut r,
            &converter,
            &sink,
            THRESHOLD,
            &mut scratch,
            &no_faults(),
        ));
        let buffers = sink.buffers();
        assert_eq!(buffers.len(), 1);
        // 2000 network frames -> 12000 device frames at 48 kHz stereo.
        assert_eq!(buffers[0].frame_count(), 12000);
        assert!(buffers[0].as_f32().unwrap().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_render_loop_drains_over_time() {
        let (mut w, r) = ring_buffer(80_000);
        let sink = Arc::new(MemorySink::new(PcmFormat::network()));
        let converter = identity_converter();

        assert!(w.write(&vec![0u8; THRESHOLD * 3]));

        let mut render = RenderLoop::spawn(
            r,
            converter,
            sink.clone(),
            Duration::from_millis(10),
            THRESHOLD,
            Arc::new(|f| panic!("unexpected fault: {f}")),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.buffer_count() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        render.stop();

        assert_eq!(sink.buffer_count(), 3);
    }
}
