//! End-to-end pipeline scenarios over a loopback TCP socket.

use std::io::Write;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use pcm_bridge::audio::playback::{MemorySink, PlaybackSink};
use pcm_bridge::config::BridgeConfig;
use pcm_bridge::{PcmFormat, StreamController, StreamFault, StreamState};

struct Harness {
    controller: StreamController,
    sink: Arc<MemorySink>,
    faults: crossbeam_channel::Receiver<StreamFault>,
}

fn harness(config: BridgeConfig) -> Harness {
    let (tx, rx) = bounded::<StreamFault>(256);
    let on_fault: Arc<dyn Fn(StreamFault) + Send + Sync> = Arc::new(move |fault| {
        let _ = tx.try_send(fault);
    });
    let sink = Arc::new(MemorySink::new(PcmFormat::network()));
    let sink_for_controller: Arc<dyn PlaybackSink> = sink.clone();
    let controller = StreamController::new(config, sink_for_controller, on_fault).unwrap();
    Harness {
        controller,
        sink,
        faults: rx,
    }
}

fn wait_for<F: Fn() -> bool>(what: &str, timeout: Duration, check: F) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

/// 2.5 s of audio in 4096-byte chunks must come out as exactly ten
/// 4000-byte render chunks, in order, without a single fault.
#[test]
fn test_forty_thousand_bytes_make_ten_chunks() {
    // Faster cadence than production so the test finishes quickly; the
    // chunk accounting is cadence-independent.
    let h = harness(BridgeConfig {
        render_interval_ms: 20,
        ..Default::default()
    });

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    h.controller.connect_to("127.0.0.1", port).unwrap();
    let (mut peer, _) = listener.accept().unwrap();
    wait_for("streaming state", Duration::from_secs(5), || {
        h.controller.state() == StreamState::Streaming
    });

    // 20000 i16 samples: a known ramp, native-endian on the wire.
    let samples: Vec<i16> = (0..20_000).map(|i| (i % 3000) as i16).collect();
    let mut wire = Vec::with_capacity(40_000);
    for s in &samples {
        wire.extend_from_slice(&s.to_ne_bytes());
    }
    for chunk in wire.chunks(4096) {
        peer.write_all(chunk).unwrap();
    }
    peer.flush().unwrap();

    wait_for("ten rendered chunks", Duration::from_secs(10), || {
        h.sink.buffer_count() >= 10
    });
    // No partial chunk remains below the threshold, so exactly ten.
    thread::sleep(Duration::from_millis(100));
    let buffers = h.sink.buffers();
    assert_eq!(buffers.len(), 10);

    // Reassemble and compare: FIFO with no gaps.
    let mut rendered = Vec::with_capacity(20_000);
    for buffer in &buffers {
        let chunk = buffer.as_i16().unwrap();
        assert_eq!(chunk.len(), 2000);
        rendered.extend_from_slice(chunk);
    }
    assert_eq!(rendered, samples);

    assert!(
        h.faults.try_recv().is_err(),
        "no faults expected for an in-capacity feed"
    );

    h.controller.close();
}

/// Feeding far more than the ring holds while the consumer is effectively
/// paused must surface RingBufferFull and keep the ingress draining.
#[test]
fn test_overflow_reports_and_survives() {
    // A render interval long enough that no chunk is consumed during the
    // flood: the consumer is effectively paused.
    let h = harness(BridgeConfig {
        render_interval_ms: 60_000,
        ..Default::default()
    });

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    h.controller.connect_to("127.0.0.1", port).unwrap();
    let (mut peer, _) = listener.accept().unwrap();
    wait_for("streaming state", Duration::from_secs(5), || {
        h.controller.state() == StreamState::Streaming
    });

    // 10 s of audio against a 5 s ring.
    let wire = vec![0x55u8; 160_000];
    for chunk in wire.chunks(4096) {
        peer.write_all(chunk).unwrap();
    }
    peer.flush().unwrap();

    wait_for("full feed drained", Duration::from_secs(10), || {
        h.controller.stats().bytes_received == 160_000
    });

    let fault = h.faults.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(fault, StreamFault::RingBufferFull { .. }));
    assert!(h.controller.stats().chunks_dropped > 0);

    // The pipeline is still alive: the connection survives the flood.
    assert_eq!(h.controller.state(), StreamState::Streaming);

    drop(peer);
    wait_for("disconnect fault", Duration::from_secs(5), || {
        h.controller.state() == StreamState::Idle
    });

    h.controller.close();
    assert_eq!(h.controller.state(), StreamState::Closed);
}

/// The downlink keeps flowing while the ring starves and refills.
#[test]
fn test_starved_then_bursty_feed() {
    let h = harness(BridgeConfig {
        render_interval_ms: 20,
        ..Default::default()
    });

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    h.controller.connect_to("127.0.0.1", port).unwrap();
    let (mut peer, _) = listener.accept().unwrap();
    wait_for("streaming state", Duration::from_secs(5), || {
        h.controller.state() == StreamState::Streaming
    });

    // Below-threshold trickle: nothing may render.
    peer.write_all(&[0u8; 1000]).unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(h.sink.buffer_count(), 0);

    // Top up past the threshold: exactly one chunk appears.
    peer.write_all(&[0u8; 3000]).unwrap();
    wait_for("one rendered chunk", Duration::from_secs(5), || {
        h.sink.buffer_count() == 1
    });

    h.controller.close();
}
