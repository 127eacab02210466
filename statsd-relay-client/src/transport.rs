use std::io;
use std::net::{Ipv4Addr, ToSocketAddrs, UdpSocket};

use thiserror::Error;

/// Errors that could occur while setting up a client transport.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying socket could not be created or connected.
    #[error("failed to set up transport: {0}")]
    Transport(#[from] io::Error),
}

/// The endpoint a [`StatsdClient`][crate::StatsdClient] writes datagrams to.
///
/// Injectable so tests (and exotic deployments) can capture packets instead
/// of sending them.
pub trait Transport {
    /// Sends one packet, best effort.
    fn send(&self, payload: &[u8]) -> io::Result<()>;
}

/// UDP transport to a StatsD server.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds an ephemeral local socket and connects it to `addr`.
    ///
    /// # Errors
    ///
    /// If the socket cannot be bound or connected, an error is returned.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(addr)?;
        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.socket.send(payload).map(|_| ())
    }
}
