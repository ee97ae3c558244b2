//! Network ingress: socket → ring buffer
//!
//! One blocking read loop per connection, run on a dedicated thread owned
//! by the controller. The loop never waits for ring space: a full ring
//! drops the newest chunk (freshness over completeness for live audio) and
//! keeps draining the socket so the peer never sees backpressure.

use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::audio::buffer::RingWriter;
use crate::error::{FaultHandler, StreamFault};

/// Counters maintained by the read loop
#[derive(Debug, Default)]
pub struct IngressStats {
    pub bytes_received: AtomicU64,
    pub chunks_dropped: AtomicU64,
}

/// Why the read loop returned
#[derive(Debug)]
pub enum ReadLoopEnd {
    /// Peer closed the stream (`read` returned 0)
    RemoteClosed,
    /// The running flag was cleared locally
    LocalStop,
    /// The socket read failed
    Failed(std::io::Error),
}

/// Drain the socket into the ring buffer until disconnect or stop.
///
/// A `read` result of 0 or an error terminates the loop — looping on a
/// dead socket would spin forever — and the caller surfaces the disconnect
/// to the owner. When `running` was cleared first the result is
/// [`ReadLoopEnd::LocalStop`] regardless of how the read came back, since
/// `close()` shuts the socket down precisely to unblock this read.
pub fn run_read_loop(
    stream: &mut TcpStream,
    writer: &mut RingWriter,
    scratch_len: usize,
    running: &AtomicBool,
    stats: &IngressStats,
    on_fault: &FaultHandler,
) -> ReadLoopEnd {
    let mut scratch = vec![0u8; scratch_len];

    loop {
        if !running.load(Ordering::Relaxed) {
            return ReadLoopEnd::LocalStop;
        }

        let n = match stream.read(&mut scratch) {
            Ok(0) => {
                return if running.load(Ordering::Relaxed) {
                    ReadLoopEnd::RemoteClosed
                } else {
                    ReadLoopEnd::LocalStop
                };
            }
            Ok(n) => n,
            Err(e) => {
                return if running.load(Ordering::Relaxed) {
                    ReadLoopEnd::Failed(e)
                } else {
                    ReadLoopEnd::LocalStop
                };
            }
        };

        stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);

        if !writer.write(&scratch[..n]) {
            stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("ring buffer full, dropping {} bytes", n);
            on_fault(StreamFault::RingBufferFull { dropped: n });
        }
    }
}
