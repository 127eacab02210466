use std::{
    io::{self, Write as _},
    net::TcpStream,
};

use crossbeam_channel::Receiver;
use tracing::{debug, error, trace};

use super::ForwarderConfiguration;

enum ClientState {
    // Intermediate state during send attempts.
    Inconsistent,

    // Forwarder is currently disconnected.
    Disconnected(ForwarderConfiguration),

    // Forwarder is connected and ready to send payloads.
    Ready(ForwarderConfiguration, TcpStream),
}

fn connect(config: &ForwarderConfiguration) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(&config.remote_addrs[..])?;
    stream.set_write_timeout(Some(config.write_timeout))?;
    Ok(stream)
}

impl ClientState {
    fn try_send(&mut self, payload: &[u8]) -> io::Result<()> {
        loop {
            let old_state = std::mem::replace(self, ClientState::Inconsistent);
            match old_state {
                ClientState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                ClientState::Disconnected(config) => {
                    let stream = match connect(&config) {
                        Ok(stream) => stream,
                        Err(e) => {
                            *self = ClientState::Disconnected(config);
                            return Err(e);
                        }
                    };
                    *self = ClientState::Ready(config, stream);
                }
                ClientState::Ready(config, mut stream) => {
                    let result = stream.write_all(payload);
                    if result.is_ok() {
                        *self = ClientState::Ready(config, stream);
                    } else {
                        *self = ClientState::Disconnected(config);
                    }

                    return result;
                }
            };
        }
    }
}

/// Ships finished payload buffers to Graphite over TCP.
///
/// Runs on its own thread so a slow or absent collector never blocks the
/// processor: the payload channel is bounded and the flush side drops on
/// overflow. Connections are (re)established lazily; a failed write drops
/// the payload in hand and reconnects on the next one.
pub(crate) struct Forwarder {
    client_state: ClientState,
    payloads: Receiver<Vec<u8>>,
}

impl Forwarder {
    /// Create a new synchronous `Forwarder`.
    pub fn new(config: ForwarderConfiguration, payloads: Receiver<Vec<u8>>) -> Self {
        Forwarder { client_state: ClientState::Disconnected(config), payloads }
    }

    /// Run the forwarder, draining the payload channel until every sender
    /// hangs up.
    pub fn run(mut self) {
        while let Ok(payload) = self.payloads.recv() {
            match self.client_state.try_send(&payload) {
                Ok(()) => trace!(len = payload.len(), "sent payload"),
                Err(e) => {
                    error!(error = %e, len = payload.len(), "failed to send payload; dropping");
                }
            }
        }

        debug!("payload channel closed; forwarder exiting");
    }
}
