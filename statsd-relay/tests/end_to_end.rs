use std::io::Read as _;
use std::net::{TcpListener, UdpSocket};
use std::thread::sleep;
use std::time::Duration;

use statsd_relay::RelayBuilder;

fn has_line_starting(received: &str, prefix: &str) -> bool {
    received.lines().any(|line| line.starts_with(prefix))
}

#[test]
fn udp_samples_come_out_as_graphite_lines() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let graphite = TcpListener::bind("127.0.0.1:0").expect("bind graphite listener");
    let graphite_addr = graphite.local_addr().expect("graphite addr");

    let relay = RelayBuilder::default()
        .with_listen_address("127.0.0.1:0".parse().expect("listen addr"))
        .with_graphite_address(graphite_addr.to_string())
        .expect("graphite address should be valid")
        .with_flush_interval(Duration::from_secs(10))
        .build()
        .expect("relay should build");

    let client = UdpSocket::bind("127.0.0.1:0").expect("bind client socket");
    client
        .send_to(b"foo:3|c\nglork:320|ms", relay.ingest_addr())
        .expect("send datagram");
    client.send_to(b"temp:21.5|g", relay.ingest_addr()).expect("send datagram");
    client.send_to(b"not a metric line", relay.ingest_addr()).expect("send datagram");

    // Give the datagrams time to cross the loopback and the ingest queue;
    // shutdown then performs the (only) flush.
    sleep(Duration::from_millis(500));
    relay.shutdown();

    let (mut conn, _peer) = graphite.accept().expect("forwarder should have connected");
    let mut received = String::new();
    conn.read_to_string(&mut received).expect("read forwarded payloads");

    // Counters emit both the truncated per-second rate and the raw count.
    assert!(has_line_starting(&received, "stats.foo 0 "), "payload:\n{received}");
    assert!(has_line_starting(&received, "stats_counts.foo 3.0 "), "payload:\n{received}");

    // Timers emit the five trimmed statistics, name-sorted.
    assert!(has_line_starting(&received, "stats.timers.glork.count 1 "), "payload:\n{received}");
    assert!(has_line_starting(&received, "stats.timers.glork.mean 320.0 "), "payload:\n{received}");
    assert!(has_line_starting(&received, "stats.timers.glork.upper_90 320.0 "), "payload:\n{received}");

    // Gauges keep flowing under the gauge prefix.
    assert!(has_line_starting(&received, "stats.gauge.temp.value 21.5 "), "payload:\n{received}");

    // Self-telemetry: one counter, one timer, one gauge; the bad line is
    // dropped without a trace in the output.
    assert!(has_line_starting(&received, "statsd.numStats 3 "), "payload:\n{received}");
    assert!(has_line_starting(&received, "statsd.receive.c.count 1 "), "payload:\n{received}");
    assert!(!received.contains("not a metric"), "payload:\n{received}");

    // Every line is a well-formed Graphite triple.
    for line in received.lines() {
        assert_eq!(line.split(' ').count(), 3, "malformed line: {line}");
    }
}
