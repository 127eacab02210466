//! A StatsD-compatible aggregation relay.
//!
//! The relay ingests short UDP datagrams carrying per-event samples,
//! aggregates them in memory over a fixed flush interval, and emits derived
//! time series to a Graphite collector as plaintext
//! `<metric> <value> <timestamp>` lines.
//!
//! # Usage
//!
//! ```no_run
//! # use statsd_relay::RelayBuilder;
//! // Configure where samples come in and where series go out, then build:
//! let relay = RelayBuilder::default()
//!     .with_graphite_address("127.0.0.1:2003")
//!     .expect("address should be valid")
//!     .build()
//!     .expect("failed to build relay");
//!
//! // ... run until it's time to stop; shutdown performs a final flush.
//! relay.shutdown();
//! ```
//!
//! # Wire format
//!
//! One logical sample per line, `<key>:<value>|<type>[|@<rate>]`, where the
//! type is `c` (counter), `ms` (timer), `g` (gauge), `m` (meter), or a tag
//! registered by a plugin. Datagrams may batch several lines joined by
//! newlines; the listener splits them before they reach the processor.
//! Malformed lines are logged at debug level and dropped; ingest never
//! fails.
//!
//! # Aggregation
//!
//! Counters accumulate `value / rate` and reset each flush, emitting both a
//! per-second rate (`stats.<key>`) and the raw count
//! (`stats_counts.<key>`). Timers collect millisecond samples and emit
//! percentile-trimmed statistics under `stats.timers.<key>`. Gauges emit
//! their last known readings under `stats.gauge.<key>.value` on every flush
//! until new samples arrive. Meters maintain 1/5/15-minute EWMA rates under
//! `stats.meter.<key>`. Plugin aggregators own everything else.
//!
//! # Self-telemetry
//!
//! Every flush appends series under `statsd.` describing the relay itself:
//! the total number of aggregator events flushed, per-kind flush counts and
//! durations, and per-type ingest counts and durations.
//!
//! # Embedding
//!
//! The relay's core is the [`Processor`], a single-owner state machine with
//! no internal synchronization. Applications that already have an ingest
//! path can drive it directly: feed lines to [`Processor::process`] and
//! drain [`Processor::flush`] on their own cadence.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]

mod builder;
pub use self::builder::{BuildError, RelayBuilder};

mod clock;
pub use self::clock::{system_clock, WallClock};

mod emission;
pub use self::emission::{Emission, MetricValue};

mod forwarder;
mod listener;

mod meter;
pub use self::meter::MeterReporter;

mod parse;
pub use self::parse::{normalize_key, parse_line, RejectReason, Sample};

mod plugin;
pub use self::plugin::{MetricFactory, PluginError, PluginMetric};

mod processor;
pub use self::processor::{Flush, Processor};

mod relay;
pub use self::relay::Relay;

mod telemetry;
mod writer;
