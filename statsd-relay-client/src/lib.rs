//! Convenience client for reporting metric samples to a StatsD-compatible
//! relay.
//!
//! The client composes datagrams of the form `<name>:<value>|<type>`,
//! namespaces metric names with a dot-joined prefix, and can either send
//! each sample immediately or buffer pipelined samples and coalesce them
//! into packets of at most 512 bytes on [`flush`][StatsdClient::flush].
//!
//! ```no_run
//! use std::time::Duration;
//! use statsd_relay_client::{StatsdClient, UdpTransport};
//!
//! let transport = UdpTransport::connect("127.0.0.1:8125").expect("connect");
//! let mut client = StatsdClient::new(transport, "myapp");
//!
//! client.increment("requests", 1, 1.0, false);
//! client.gauge("connections", 42.0);
//! client.timing("render", Duration::from_millis(150));
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![deny(missing_docs)]

use std::time::{Duration, Instant};

use tracing::error;

mod transport;
pub use self::transport::{ClientError, Transport, UdpTransport};

// Largest packet we are willing to compose; everything past this boundary
// goes into the next packet.
const MAX_PACKET_LEN: usize = 512;

/// A convenience handle for reporting metric samples to a StatsD server.
pub struct StatsdClient<T> {
    transport: T,
    namespace: String,
    pipeline: Vec<Vec<u8>>,
    last_time: Option<Instant>,
}

impl<T: Transport> StatsdClient<T> {
    /// Creates a client that namespaces every metric under `namespace`.
    ///
    /// An empty namespace leaves names untouched.
    pub fn new(transport: T, namespace: impl Into<String>) -> Self {
        StatsdClient {
            transport,
            namespace: namespace.into(),
            pipeline: Vec::new(),
            last_time: None,
        }
    }

    /// Reports an increase in `name` by `value`.
    ///
    /// With `sample_rate < 1`, the sample is sent with probability
    /// `sample_rate` and tagged `|@<rate>` so the server can recover the
    /// population estimate. Pipelined samples buffer locally until
    /// [`flush`][Self::flush].
    pub fn increment(&mut self, name: &str, value: i64, sample_rate: f64, pipeline: bool) {
        let mut writer = itoa::Buffer::new();
        let data = format!("{}|c", writer.format(value));
        self.send(name, &data, sample_rate, pipeline);
    }

    /// Reports a decrease in `name` by `value`.
    pub fn decrement(&mut self, name: &str, value: i64, sample_rate: f64, pipeline: bool) {
        self.increment(name, -value, sample_rate, pipeline);
    }

    /// Reports that `name` took `duration` to perform.
    pub fn timing(&mut self, name: &str, duration: Duration) {
        self.timing_sampled(name, duration, 1.0, false);
    }

    /// Reports a duration with an explicit sampling rate and pipelining.
    pub fn timing_sampled(
        &mut self,
        name: &str,
        duration: Duration,
        sample_rate: f64,
        pipeline: bool,
    ) {
        let mut writer = ryu::Buffer::new();
        let data = format!("{}|ms", writer.format(duration.as_secs_f64() * 1000.0));
        self.send(name, &data, sample_rate, pipeline);
    }

    /// Resets the duration timer for the next call to
    /// [`elapsed`][Self::elapsed].
    pub fn reset_timing(&mut self) {
        self.last_time = Some(Instant::now());
    }

    /// Reports the elapsed time since the last call to this method or to
    /// [`reset_timing`][Self::reset_timing].
    pub fn elapsed(&mut self, name: &str) {
        let now = Instant::now();
        let duration = self.last_time.map_or(Duration::ZERO, |last| now - last);
        self.last_time = Some(now);
        self.timing(name, duration);
    }

    /// Reports an instantaneous reading of a particular value.
    pub fn gauge(&mut self, name: &str, value: f64) {
        let mut writer = ryu::Buffer::new();
        let data = format!("{}|g", writer.format(value));
        self.send(name, &data, 1.0, false);
    }

    /// Marks the occurrence of `value` events.
    pub fn meter(&mut self, name: &str, value: f64) {
        let mut writer = ryu::Buffer::new();
        let data = format!("{}|m", writer.format(value));
        self.send(name, &data, 1.0, false);
    }

    /// Reports a generic metric.
    ///
    /// Used for server-side plugins without client support: `metric_type` is
    /// the plugin's wire tag and `extra` an optional trailing field.
    pub fn report(&mut self, name: &str, value: &str, metric_type: &str, extra: Option<&str>) {
        let data = match extra {
            Some(extra) => format!("{value}|{metric_type}|{extra}"),
            None => format!("{value}|{metric_type}"),
        };
        self.send(name, &data, 1.0, false);
    }

    /// Reports a service level metric.
    ///
    /// The optional `size` is used with linear-threshold slis; for a
    /// download, say, pass the size in bytes alongside the duration.
    pub fn sli(&mut self, name: &str, duration: f64, size: Option<f64>) {
        let mut duration_writer = ryu::Buffer::new();
        let duration = duration_writer.format(duration);
        match size {
            Some(size) => {
                let mut size_writer = ryu::Buffer::new();
                self.report(name, duration, "sli", Some(size_writer.format(size)));
            }
            None => self.report(name, duration, "sli", None),
        }
    }

    /// Reports an error for a service level metric.
    ///
    /// When something measured for service level errs, no time or size is
    /// required or present.
    pub fn sli_error(&mut self, name: &str) {
        self.report(name, "error", "sli", None);
    }

    /// Flushes any pipelined samples, coalescing lines joined by `\n` into
    /// packets not exceeding 512 bytes.
    pub fn flush(&mut self) {
        let mut queued = std::mem::take(&mut self.pipeline).into_iter();
        let Some(mut data) = queued.next() else {
            return;
        };

        for stat in queued {
            if stat.len() + data.len() + 1 >= MAX_PACKET_LEN {
                self.write(&data);
                data = stat;
            } else {
                data.push(b'\n');
                data.extend_from_slice(&stat);
            }
        }
        self.write(&data);
    }

    fn send(&mut self, name: &str, data: &str, sample_rate: f64, pipeline: bool) {
        let name = self.fully_qualify_name(name);
        let mut line = format!("{name}:{data}");
        if sample_rate < 1.0 {
            if rand::random::<f64>() > sample_rate {
                return;
            }
            let mut writer = ryu::Buffer::new();
            line.push_str("|@");
            line.push_str(writer.format(sample_rate));
        }

        if pipeline {
            self.pipeline.push(line.into_bytes());
        } else {
            self.write(line.as_bytes());
        }
    }

    fn fully_qualify_name(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.namespace, name)
        }
    }

    fn write(&self, payload: &[u8]) {
        if let Err(e) = self.transport.send(payload) {
            error!(error = %e, "failed to send metrics packet");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingTransport {
        packets: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, payload: &[u8]) -> io::Result<()> {
            self.packets.borrow_mut().push(payload.to_vec());
            Ok(())
        }
    }

    fn client() -> (StatsdClient<RecordingTransport>, RecordingTransport) {
        let transport = RecordingTransport::default();
        (StatsdClient::new(transport.clone(), "app"), transport)
    }

    fn packets(transport: &RecordingTransport) -> Vec<String> {
        transport
            .packets
            .borrow()
            .iter()
            .map(|p| String::from_utf8(p.clone()).unwrap())
            .collect()
    }

    #[test]
    fn counters_compose_statsd_lines() {
        let (mut client, transport) = client();
        client.increment("requests", 1, 1.0, false);
        client.decrement("requests", 2, 1.0, false);

        assert_eq!(packets(&transport), vec!["app.requests:1|c", "app.requests:-2|c"]);
    }

    #[test]
    fn empty_namespace_leaves_names_bare() {
        let transport = RecordingTransport::default();
        let mut client = StatsdClient::new(transport.clone(), "");
        client.increment("requests", 1, 1.0, false);

        assert_eq!(packets(&transport), vec!["requests:1|c"]);
    }

    #[test]
    fn gauges_meters_and_timings() {
        let (mut client, transport) = client();
        client.gauge("connections", 42.0);
        client.meter("events", 3.0);
        client.timing("render", Duration::from_millis(1500));

        assert_eq!(
            packets(&transport),
            vec![
                "app.connections:42.0|g",
                "app.events:3.0|m",
                "app.render:1500.0|ms",
            ]
        );
    }

    #[test]
    fn generic_report_with_extra_field() {
        let (mut client, transport) = client();
        client.report("download", "1.5", "sli", Some("2048"));
        client.report("download", "error", "sli", None);

        assert_eq!(
            packets(&transport),
            vec!["app.download:1.5|sli|2048", "app.download:error|sli"]
        );
    }

    #[test]
    fn sli_wraps_the_generic_report() {
        let (mut client, transport) = client();
        client.sli("download", 1.5, Some(2048.0));
        client.sli("render", 0.25, None);
        client.sli_error("render");

        assert_eq!(
            packets(&transport),
            vec![
                "app.download:1.5|sli|2048.0",
                "app.render:0.25|sli",
                "app.render:error|sli",
            ]
        );
    }

    #[test]
    fn pipelined_samples_wait_for_flush() {
        let (mut client, transport) = client();
        client.increment("a", 1, 1.0, true);
        client.increment("b", 2, 1.0, true);
        assert!(packets(&transport).is_empty());

        client.flush();
        assert_eq!(packets(&transport), vec!["app.a:1|c\napp.b:2|c"]);

        // The pipeline is drained; a second flush sends nothing.
        client.flush();
        assert_eq!(packets(&transport).len(), 1);
    }

    #[test]
    fn flush_splits_at_the_packet_boundary() {
        let (mut client, transport) = client();
        // Each line is "app.<24 chars>:1|c" = 32 bytes; 20 of them cannot
        // fit one 512-byte packet.
        for i in 0..20 {
            let name = format!("{i:0>24}");
            client.increment(&name, 1, 1.0, true);
        }
        client.flush();

        let sent = packets(&transport);
        assert_eq!(sent.len(), 2, "packets: {sent:?}");
        let mut lines_seen = 0;
        for packet in &sent {
            assert!(packet.len() < MAX_PACKET_LEN);
            lines_seen += packet.split('\n').count();
        }
        assert_eq!(lines_seen, 20);
    }

    #[test]
    fn sampling_tags_and_thins_the_stream() {
        let (mut client, transport) = client();
        for _ in 0..200 {
            client.increment("sampled", 1, 0.5, false);
        }

        let sent = packets(&transport);
        // Statistically certain bounds for 200 coin flips.
        assert!(!sent.is_empty() && sent.len() < 200, "sent {} packets", sent.len());
        for packet in &sent {
            assert_eq!(packet, "app.sampled:1|c|@0.5");
        }
    }

    #[test]
    fn elapsed_reports_time_since_reset() {
        let (mut client, transport) = client();
        client.reset_timing();
        client.elapsed("step");

        let sent = packets(&transport);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("app.step:"), "{}", sent[0]);
        assert!(sent[0].ends_with("|ms"), "{}", sent[0]);
    }
}
