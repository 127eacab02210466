use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;
use thiserror::Error;
use tracing::debug;

use crate::clock::{system_clock, WallClock};
use crate::forwarder::{self, sync::Forwarder, ForwarderConfiguration};
use crate::listener;
use crate::plugin::MetricFactory;
use crate::processor::Processor;
use crate::relay::{ProcessorDriver, Relay};

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_PERCENTILE: u8 = 90;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PAYLOAD_LEN: usize = 8192;
const DEFAULT_INGEST_QUEUE_LEN: usize = 8192;
const DEFAULT_FORWARD_QUEUE_LEN: usize = 128;

// Smallest payload cap that still fits a realistic line.
const MIN_PAYLOAD_LEN: usize = 64;

// How often the listener wakes from `recv_from` to poll the shutdown flag.
const LISTENER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors that could occur while building a relay.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BuildError {
    /// A generic invalid configuration setting.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the invalid configuration.
        reason: String,
    },

    /// Failed to parse the Graphite address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// Failed to bind or configure the ingest socket.
    #[error("failed to bind ingest socket: {reason}")]
    Bind {
        /// Details about the socket failure.
        reason: String,
    },

    /// Failed to spawn a background thread.
    #[error("failed to spawn background thread for relay")]
    Backend,
}

/// Builder for a StatsD relay.
///
/// Configures the ingest socket, the downstream Graphite collector, the
/// flush cadence, and any plugin aggregators, then spawns the listener,
/// processor, and forwarder threads.
pub struct RelayBuilder {
    listen_addr: SocketAddr,
    graphite_addrs: Vec<SocketAddr>,
    flush_interval: Duration,
    percentile: u8,
    write_timeout: Duration,
    max_payload_len: usize,
    ingest_queue_len: usize,
    forward_queue_len: usize,
    plugins: Vec<Box<dyn MetricFactory>>,
    wall_clock: Option<WallClock>,
}

impl RelayBuilder {
    /// Sets the address the ingest UDP socket binds to.
    ///
    /// Defaults to `0.0.0.0:8125`.
    #[must_use]
    pub fn with_listen_address(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Sets the Graphite collector to forward emissions to.
    ///
    /// Accepts `<host>:<port>` or `tcp://<host>:<port>`. Defaults to
    /// `127.0.0.1:2003`.
    ///
    /// # Errors
    ///
    /// If the given address cannot be parsed or resolved, an error is
    /// returned.
    pub fn with_graphite_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.graphite_addrs = forwarder::parse_remote_addr(addr.as_ref())
            .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        Ok(self)
    }

    /// Sets the flush interval.
    ///
    /// The interval is converted to whole seconds when normalizing counter
    /// rates, so it should be a multiple of one second; intervals under one
    /// second are rejected at build time. Defaults to 10 seconds.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Sets the timer percentile: flushed timer statistics keep the lowest
    /// `percentile`% of samples. At 0, only the lowest sample of each
    /// bucket survives trimming. Defaults to 90.
    #[must_use]
    pub fn with_percentile(mut self, percentile: u8) -> Self {
        self.percentile = percentile;
        self
    }

    /// Sets the write timeout for forwarding payloads to Graphite.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the maximum length of a single forwarded payload buffer.
    ///
    /// Defaults to 8192 bytes.
    ///
    /// # Errors
    ///
    /// If the length is too small to fit a realistic line, an error is
    /// returned.
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Result<Self, BuildError> {
        if max_payload_len < MIN_PAYLOAD_LEN {
            return Err(BuildError::InvalidConfiguration {
                reason: format!(
                    "maximum payload length ({max_payload_len} bytes) below minimum ({MIN_PAYLOAD_LEN} bytes)"
                ),
            });
        }
        self.max_payload_len = max_payload_len;
        Ok(self)
    }

    /// Sets how many ingest lines may queue between the listener and the
    /// processor before new lines are dropped. Defaults to 8192.
    #[must_use]
    pub fn with_ingest_queue_length(mut self, len: usize) -> Self {
        self.ingest_queue_len = len;
        self
    }

    /// Sets how many payload buffers may queue between the processor and the
    /// forwarder before payloads are dropped. Defaults to 128.
    #[must_use]
    pub fn with_forward_queue_length(mut self, len: usize) -> Self {
        self.forward_queue_len = len;
        self
    }

    /// Registers a plugin aggregator under its wire type tag.
    #[must_use]
    pub fn with_plugin(mut self, factory: Box<dyn MetricFactory>) -> Self {
        self.plugins.push(factory);
        self
    }

    /// Overrides the wall clock, mainly for tests and embedding.
    #[must_use]
    pub fn with_wall_clock(mut self, wall_clock: WallClock) -> Self {
        self.wall_clock = Some(wall_clock);
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.flush_interval < Duration::from_secs(1) {
            return Err(BuildError::InvalidConfiguration {
                reason: format!(
                    "flush interval ({:?}) must be at least one second",
                    self.flush_interval
                ),
            });
        }
        if self.percentile > 100 {
            return Err(BuildError::InvalidConfiguration {
                reason: format!("percentile ({}) must be within 0-100", self.percentile),
            });
        }
        if self.ingest_queue_len == 0 || self.forward_queue_len == 0 {
            return Err(BuildError::InvalidConfiguration {
                reason: "queue lengths must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Builds the relay, spawning the listener, processor, and forwarder
    /// threads.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, the ingest socket cannot be bound,
    /// or a background thread cannot be spawned, an error is returned.
    pub fn build(self) -> Result<Relay, BuildError> {
        self.validate()?;

        let wall_clock = self.wall_clock.unwrap_or_else(system_clock);

        debug!(
            listen_addr = %self.listen_addr,
            flush_interval = ?self.flush_interval,
            percentile = self.percentile,
            plugins = self.plugins.len(),
            "building relay"
        );

        let processor = Processor::with_plugins(wall_clock, self.plugins);

        let (line_tx, line_rx) = bounded(self.ingest_queue_len);
        let (payload_tx, payload_rx) = bounded(self.forward_queue_len);
        let shutdown = Arc::new(AtomicBool::new(false));

        let socket = UdpSocket::bind(self.listen_addr)
            .map_err(|e| BuildError::Bind { reason: e.to_string() })?;
        socket
            .set_read_timeout(Some(LISTENER_POLL_INTERVAL))
            .map_err(|e| BuildError::Bind { reason: e.to_string() })?;
        let ingest_addr =
            socket.local_addr().map_err(|e| BuildError::Bind { reason: e.to_string() })?;

        let listener_tx = line_tx.clone();
        let listener_shutdown = Arc::clone(&shutdown);
        let listener = std::thread::Builder::new()
            .name("statsd-relay-listener".to_string())
            .spawn(move || listener::run(socket, listener_tx, listener_shutdown))
            .map_err(|_| BuildError::Backend)?;

        let driver = ProcessorDriver {
            processor,
            lines: line_rx,
            payloads: payload_tx,
            flush_interval: self.flush_interval,
            percentile: self.percentile,
            max_payload_len: self.max_payload_len,
        };
        let processor_handle = std::thread::Builder::new()
            .name("statsd-relay-processor".to_string())
            .spawn(move || driver.run())
            .map_err(|_| BuildError::Backend)?;

        let forwarder_config = ForwarderConfiguration {
            remote_addrs: self.graphite_addrs,
            write_timeout: self.write_timeout,
        };
        let forwarder = Forwarder::new(forwarder_config, payload_rx);
        let forwarder_handle = std::thread::Builder::new()
            .name("statsd-relay-forwarder".to_string())
            .spawn(move || forwarder.run())
            .map_err(|_| BuildError::Backend)?;

        Ok(Relay {
            ingest_addr,
            lines: line_tx,
            shutdown,
            listener: Some(listener),
            processor: Some(processor_handle),
            forwarder: Some(forwarder_handle),
        })
    }
}

impl Default for RelayBuilder {
    fn default() -> Self {
        RelayBuilder {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8125)),
            graphite_addrs: vec![SocketAddr::from(([127, 0, 0, 1], 2003))],
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            percentile: DEFAULT_PERCENTILE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            ingest_queue_len: DEFAULT_INGEST_QUEUE_LEN,
            forward_queue_len: DEFAULT_FORWARD_QUEUE_LEN,
            plugins: Vec::new(),
            wall_clock: None,
        }
    }
}
