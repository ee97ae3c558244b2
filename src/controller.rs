//! Stream controller
//!
//! Owns every pipeline stage and drives the lifecycle:
//!
//! ```text
//! Idle ──connect_to──▶ Connecting ──(connected)──▶ Streaming ⇄ Recording
//!   ▲                      │                            │
//!   └──────(disconnect)────┴────────────────────────────┘
//!                        close() from anywhere ──▶ Closed
//! ```
//!
//! The render loop runs from construction to `close()`; connecting and
//! recording only change what feeds the ring buffer and the socket.

use std::fmt;
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::audio::buffer::{ring_buffer, RingWriter};
use crate::audio::capture::MicCapture;
use crate::audio::playback::{DevicePlayback, PlaybackSink};
use crate::config::BridgeConfig;
use crate::error::{Error, FaultHandler, Result, StreamFault};
use crate::format::{FormatConverter, PcmFormat};
use crate::network;
use crate::network::ingress::{run_read_loop, IngressStats, ReadLoopEnd};
use crate::render::RenderLoop;

/// Lifecycle state of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    /// Streaming with the microphone tap installed
    Recording,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::Connecting => "connecting",
            StreamState::Streaming => "streaming",
            StreamState::Recording => "recording",
            StreamState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Counters exposed for status reporting
#[derive(Debug, Clone, Default)]
pub struct ControllerStats {
    pub bytes_received: u64,
    pub chunks_dropped: u64,
}

/// State shared with the ingress thread and audio callbacks
struct Shared {
    state: Mutex<StreamState>,
    /// Cloned handle of the live connection, used by egress setup and by
    /// `close()` to force a blocked read to return
    socket: Mutex<Option<std::net::TcpStream>>,
    /// The single ring producer, parked here between connections
    writer_slot: Mutex<Option<RingWriter>>,
    capture: Mutex<Option<MicCapture>>,
    ingress_running: AtomicBool,
    ingress_stats: IngressStats,
    on_fault: FaultHandler,
}

/// Orchestrates the bidirectional PCM bridge.
///
/// Public operations are safe from any state; anything invalid for the
/// current state is a logged no-op rather than an error, and everything
/// after [`close`](Self::close) is a no-op.
pub struct StreamController {
    config: BridgeConfig,
    shared: Arc<Shared>,
    sink: Arc<dyn PlaybackSink>,
    render: Mutex<Option<RenderLoop>>,
    ingress_thread: Mutex<Option<JoinHandle<()>>>,
}

impl StreamController {
    /// Build the pipeline around an explicit playback sink.
    ///
    /// The sink is primed and the render loop starts immediately; it idles
    /// until a connection fills the ring buffer.
    pub fn new(
        config: BridgeConfig,
        sink: Arc<dyn PlaybackSink>,
        on_fault: FaultHandler,
    ) -> Result<Self> {
        config.validate()?;

        let (writer, reader) = ring_buffer(config.capacity_bytes());
        let converter = FormatConverter::new(PcmFormat::network(), sink.output_format())?;
        let render = RenderLoop::spawn(
            reader,
            converter,
            sink.clone(),
            config.render_interval(),
            config.render_threshold_bytes(),
            on_fault.clone(),
        )?;

        tracing::info!(
            "pipeline ready: {} ring, {}B threshold, {:?} cadence",
            config.capacity_bytes(),
            config.render_threshold_bytes(),
            config.render_interval()
        );

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(StreamState::Idle),
                socket: Mutex::new(None),
                writer_slot: Mutex::new(Some(writer)),
                capture: Mutex::new(None),
                ingress_running: AtomicBool::new(false),
                ingress_stats: IngressStats::default(),
                on_fault,
            }),
            sink,
            render: Mutex::new(Some(render)),
            ingress_thread: Mutex::new(None),
        })
    }

    /// Build the pipeline on the default output device.
    pub fn with_default_output(config: BridgeConfig, on_fault: FaultHandler) -> Result<Self> {
        let sink = Arc::new(DevicePlayback::start()?);
        Self::new(config, sink, on_fault)
    }

    pub fn state(&self) -> StreamState {
        *self.shared.state.lock()
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            bytes_received: self
                .shared
                .ingress_stats
                .bytes_received
                .load(Ordering::Relaxed),
            chunks_dropped: self
                .shared
                .ingress_stats
                .chunks_dropped
                .load(Ordering::Relaxed),
        }
    }

    /// Connect to the remote device and start streaming.
    ///
    /// Returns immediately; the blocking connect runs on the ingress
    /// thread. Success moves the state to `Streaming`. Failure is
    /// reported as [`StreamFault::SocketFailedToConnect`] and leaves the
    /// state in `Connecting` so the owner may call this again — there is
    /// no automatic retry.
    pub fn connect_to(&self, host: &str, port: u16) -> Result<()> {
        // Holding the thread slot across the state check and the spawn
        // keeps close() and a second connect_to from interleaving.
        let mut thread_guard = self.ingress_thread.lock();

        match self.state() {
            StreamState::Closed => {
                tracing::warn!("connect_to after close is a no-op");
                return Ok(());
            }
            StreamState::Streaming | StreamState::Recording => {
                tracing::warn!("connect_to while streaming is a no-op");
                return Ok(());
            }
            StreamState::Idle | StreamState::Connecting => {}
        }

        let previous_alive = thread_guard
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if previous_alive {
            tracing::warn!("connection attempt already in flight");
            return Ok(());
        }
        if let Some(handle) = thread_guard.take() {
            let _ = handle.join();
        }

        *self.shared.state.lock() = StreamState::Connecting;
        self.shared.ingress_running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let host = host.to_string();
        let chunk = self.config.read_chunk_bytes;
        let handle = thread::Builder::new()
            .name("ingress".to_string())
            .spawn(move || ingress_main(shared, host, port, chunk))?;
        *thread_guard = Some(handle);

        Ok(())
    }

    /// Install the microphone tap. No-op unless currently `Streaming`.
    pub fn start_recording(&self) -> Result<()> {
        match self.state() {
            StreamState::Streaming => {}
            StreamState::Recording => return Ok(()),
            other => {
                tracing::warn!("start_recording in state {} is a no-op", other);
                return Ok(());
            }
        }

        let stream = {
            let guard = self.shared.socket.lock();
            match guard.as_ref() {
                Some(s) => s.try_clone().map_err(Error::Io)?,
                None => {
                    tracing::warn!("start_recording without an active connection");
                    return Ok(());
                }
            }
        };

        let capture = MicCapture::start(stream, self.shared.on_fault.clone())?;
        *self.shared.capture.lock() = Some(capture);

        let mut state = self.shared.state.lock();
        if *state == StreamState::Streaming {
            *state = StreamState::Recording;
            drop(state);
            tracing::info!("recording started");
        } else {
            // Disconnected or closed while the capture came up.
            drop(state);
            if let Some(mut capture) = self.shared.capture.lock().take() {
                capture.stop();
            }
        }
        Ok(())
    }

    /// Remove the microphone tap. No-op unless currently `Recording`.
    pub fn stop_recording(&self) {
        let capture = self.shared.capture.lock().take();
        let had_capture = capture.is_some();
        if let Some(mut capture) = capture {
            capture.stop();
        }

        let mut state = self.shared.state.lock();
        if *state == StreamState::Recording {
            *state = StreamState::Streaming;
            drop(state);
            tracing::info!("recording stopped");
        } else if had_capture {
            tracing::debug!("capture tap removed outside recording state");
        }
    }

    /// Set playback volume, clamped to [0.0, 1.0]. Valid in any state.
    pub fn set_volume(&self, level: f32) {
        self.sink.set_volume(level);
    }

    /// Tear the pipeline down. Valid from any state; repeated calls are
    /// safe no-ops.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == StreamState::Closed {
                return;
            }
            *state = StreamState::Closed;
        }

        // Stop the uplink first so nothing writes to a socket being shut.
        if let Some(mut capture) = self.shared.capture.lock().take() {
            capture.stop();
        }

        // Clear the flag, then force the socket shut so a blocked read
        // observes it promptly.
        self.shared.ingress_running.store(false, Ordering::SeqCst);
        let had_socket = {
            let guard = self.shared.socket.lock();
            if let Some(socket) = guard.as_ref() {
                let _ = socket.shutdown(Shutdown::Both);
                true
            } else {
                false
            }
        };

        if let Some(handle) = self.ingress_thread.lock().take() {
            if had_socket || handle.is_finished() {
                let _ = handle.join();
            } else {
                // Still inside the blocking connect; it observes Closed as
                // soon as the connect returns and exits without touching
                // the ring.
                tracing::debug!("leaving ingress thread to finish its connect attempt");
            }
        }
        *self.shared.socket.lock() = None;

        if let Some(mut render) = self.render.lock().take() {
            render.stop();
        }
        self.sink.shutdown();

        tracing::info!("stream closed");
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ingress thread body: blocking connect, then the socket read loop.
fn ingress_main(shared: Arc<Shared>, host: String, port: u16, chunk: usize) {
    let addr = format!("{host}:{port}");

    let mut stream = match network::connect(&host, port) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("connect to {} failed: {}", addr, e);
            (shared.on_fault)(StreamFault::SocketFailedToConnect {
                addr,
                reason: e.to_string(),
            });
            return;
        }
    };

    let clone = match stream.try_clone() {
        Ok(clone) => clone,
        Err(e) => {
            (shared.on_fault)(StreamFault::SocketFailedToConnect {
                addr,
                reason: format!("socket clone failed: {e}"),
            });
            return;
        }
    };
    *shared.socket.lock() = Some(clone);

    {
        let mut state = shared.state.lock();
        if *state == StreamState::Closed {
            drop(state);
            let _ = stream.shutdown(Shutdown::Both);
            *shared.socket.lock() = None;
            return;
        }
        *state = StreamState::Streaming;
    }
    tracing::info!("connected to {}", addr);

    let Some(mut writer) = shared.writer_slot.lock().take() else {
        // Unreachable while connect_to admits one ingress thread at a time.
        tracing::error!("ring writer unavailable, aborting ingress");
        return;
    };

    let end = run_read_loop(
        &mut stream,
        &mut writer,
        chunk,
        &shared.ingress_running,
        &shared.ingress_stats,
        &shared.on_fault,
    );

    *shared.writer_slot.lock() = Some(writer);
    *shared.socket.lock() = None;

    let reason = match end {
        ReadLoopEnd::LocalStop => return,
        ReadLoopEnd::RemoteClosed => "connection closed by peer".to_string(),
        ReadLoopEnd::Failed(e) => e.to_string(),
    };

    // The uplink has nowhere to go; remove the tap.
    if let Some(mut capture) = shared.capture.lock().take() {
        capture.stop();
    }
    {
        let mut state = shared.state.lock();
        if *state != StreamState::Closed {
            *state = StreamState::Idle;
        }
    }

    tracing::warn!("disconnected from {}: {}", addr, reason);
    (shared.on_fault)(StreamFault::PeerDisconnected(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::MemorySink;
    use crossbeam_channel::bounded;
    use std::io::Write as IoWrite;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn test_controller() -> (StreamController, crossbeam_channel::Receiver<StreamFault>) {
        let (tx, rx) = bounded::<StreamFault>(64);
        let on_fault: FaultHandler = Arc::new(move |fault| {
            let _ = tx.try_send(fault);
        });
        let sink = Arc::new(MemorySink::new(PcmFormat::network()));
        let config = BridgeConfig {
            render_interval_ms: 20,
            ..Default::default()
        };
        let controller = StreamController::new(config, sink, on_fault).unwrap();
        (controller, rx)
    }

    fn wait_for_state(controller: &StreamController, state: StreamState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if controller.state() == state {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_starts_idle() {
        let (controller, _rx) = test_controller();
        assert_eq!(controller.state(), StreamState::Idle);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let (controller, _rx) = test_controller();
        controller.close();
        assert_eq!(controller.state(), StreamState::Closed);

        // Every public operation after close is a safe no-op.
        controller.close();
        controller.connect_to("127.0.0.1", 1).unwrap();
        controller.start_recording().unwrap();
        controller.stop_recording();
        controller.set_volume(0.3);
        assert_eq!(controller.state(), StreamState::Closed);
    }

    #[test]
    fn test_set_volume_any_state() {
        let (controller, _rx) = test_controller();
        controller.set_volume(0.5);
        controller.set_volume(7.0);
        controller.close();
        controller.set_volume(0.1);
    }

    #[test]
    fn test_recording_ops_are_no_ops_when_not_streaming() {
        let (controller, _rx) = test_controller();
        controller.start_recording().unwrap();
        assert_eq!(controller.state(), StreamState::Idle);
        controller.stop_recording();
        assert_eq!(controller.state(), StreamState::Idle);
    }

    #[test]
    fn test_failed_connect_reports_fault_and_allows_retry() {
        let (controller, rx) = test_controller();

        // Grab a port with no listener behind it.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        controller.connect_to("127.0.0.1", port).unwrap();
        let fault = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(fault, StreamFault::SocketFailedToConnect { .. }));
        assert_eq!(controller.state(), StreamState::Connecting);

        // The controller accepts another attempt, this time successful.
        // Retry in a loop: the failed ingress thread may still be winding
        // down when the first retry lands, making it a no-op.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = thread::spawn(move || listener.accept().map(|(s, _)| s));
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.state() != StreamState::Streaming && Instant::now() < deadline {
            controller.connect_to("127.0.0.1", port).unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(controller.state(), StreamState::Streaming);
        let _peer = acceptor.join().unwrap().unwrap();
    }

    #[test]
    fn test_disconnect_returns_to_idle() {
        let (controller, rx) = test_controller();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        controller.connect_to("127.0.0.1", port).unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        assert!(wait_for_state(&controller, StreamState::Streaming));

        peer.write_all(&[0u8; 100]).unwrap();
        drop(peer);

        let fault = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(fault, StreamFault::PeerDisconnected(_)));
        assert!(wait_for_state(&controller, StreamState::Idle));
        assert_eq!(controller.stats().bytes_received, 100);
    }

    #[test]
    fn test_close_while_streaming_joins_cleanly() {
        let (controller, _rx) = test_controller();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        controller.connect_to("127.0.0.1", port).unwrap();
        let (_peer, _) = listener.accept().unwrap();
        assert!(wait_for_state(&controller, StreamState::Streaming));

        // The peer is silent; the ingress read is blocked. close() must
        // still return promptly.
        let start = Instant::now();
        controller.close();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(controller.state(), StreamState::Closed);
    }
}
