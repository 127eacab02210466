use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::processor::Processor;
use crate::writer::LineWriter;

/// Message from the ingest edge (or the shutdown path) to the processor
/// thread.
pub(crate) enum IngestMessage {
    /// One trimmed, non-empty datagram line.
    Line(Vec<u8>),
    /// Flush once more, then exit.
    Shutdown,
}

/// Drives the single-owner processing loop: drains ingest lines and fires a
/// flush whenever the interval deadline passes.
///
/// The processor is owned by this loop alone; `process` and `flush` are
/// never called from anywhere else, which is what makes the unsynchronized
/// [`Processor`] sound.
pub(crate) struct ProcessorDriver {
    pub processor: Processor,
    pub lines: Receiver<IngestMessage>,
    pub payloads: Sender<Vec<u8>>,
    pub flush_interval: Duration,
    pub percentile: u8,
    pub max_payload_len: usize,
}

impl ProcessorDriver {
    pub fn run(mut self) {
        let interval_ms = self.flush_interval.as_millis() as u64;
        let mut writer = LineWriter::new(self.max_payload_len);
        let mut next_flush = Instant::now() + self.flush_interval;

        loop {
            match self.lines.recv_deadline(next_flush) {
                Ok(IngestMessage::Line(line)) => self.processor.process(&line),
                Ok(IngestMessage::Shutdown) => {
                    self.flush(interval_ms, &mut writer);
                    debug!("shutdown requested; processor exiting");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    next_flush = Instant::now() + self.flush_interval;
                    self.flush(interval_ms, &mut writer);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("ingest channel closed; processor exiting");
                    return;
                }
            }
        }
    }

    fn flush(&mut self, interval_ms: u64, writer: &mut LineWriter) {
        let written_before = writer.lines_written();
        let dropped_before = writer.lines_dropped();
        for emission in self.processor.flush(interval_ms, self.percentile) {
            writer.write(&emission);
        }
        let dropped = writer.lines_dropped() - dropped_before;
        if dropped > 0 {
            warn!(dropped, "lines exceeded the payload cap");
        }
        debug!(lines = writer.lines_written() - written_before, "flushed emission lines");

        let mut payloads = writer.payloads();
        while let Some(payload) = payloads.next_payload() {
            match self.payloads.try_send(payload.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(len = payload.len(), "forward queue full; dropping payload");
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("forwarder gone; dropping remaining payloads");
                    return;
                }
            }
        }
    }
}

/// Handle to a running relay.
///
/// Dropping the handle shuts the relay down: the listener stops accepting
/// datagrams, the processor performs one final flush, and all three threads
/// are joined.
pub struct Relay {
    pub(crate) ingest_addr: std::net::SocketAddr,
    pub(crate) lines: Sender<IngestMessage>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) listener: Option<JoinHandle<()>>,
    pub(crate) processor: Option<JoinHandle<()>>,
    pub(crate) forwarder: Option<JoinHandle<()>>,
}

impl Relay {
    /// The address the ingest socket actually bound to. Useful when the
    /// relay was configured with port 0.
    pub fn ingest_addr(&self) -> std::net::SocketAddr {
        self.ingest_addr
    }

    /// Stops the relay after one final flush and waits for its threads.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.lines.send(IngestMessage::Shutdown);

        for handle in [
            self.listener.take(),
            self.processor.take(),
            self.forwarder.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
