use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, error};

use crate::relay::IngestMessage;

// Largest payload a UDP datagram can carry.
const RECV_BUF_LEN: usize = 65_535;

/// Receives ingest datagrams and hands individual lines to the processor
/// thread.
///
/// Batched datagrams are split on `\n` at this edge, so the processor only
/// ever sees one logical sample per message. The handoff channel is bounded:
/// when the processor falls behind, lines are dropped here (and logged)
/// rather than queued without limit.
///
/// The socket must have a read timeout set; each timeout is used to poll the
/// shutdown flag.
pub(crate) fn run(socket: UdpSocket, lines: Sender<IngestMessage>, shutdown: Arc<AtomicBool>) {
    let mut buf = [0u8; RECV_BUF_LEN];
    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("shutdown requested; listener exiting");
            return;
        }

        let len = match socket.recv_from(&mut buf) {
            Ok((len, _src)) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                error!(error = %e, "failed to receive datagram");
                continue;
            }
        };

        for line in buf[..len].split(|&b| b == b'\n') {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match lines.try_send(IngestMessage::Line(line.to_vec())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("ingest queue full; dropping line");
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("processor gone; listener exiting");
                    return;
                }
            }
        }
    }
}
