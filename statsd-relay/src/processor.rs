use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::clock::WallClock;
use crate::emission::{concat_name, Emission, MetricValue};
use crate::meter::MeterReporter;
use crate::parse::{self, parse_line, RejectReason, Sample};
use crate::plugin::{MetricFactory, PluginMetric};
use crate::telemetry::{FlushTotals, ReceiveTimings};

pub(crate) const STATS_PREFIX: &[u8] = b"stats.";
pub(crate) const COUNT_PREFIX: &[u8] = b"stats_counts.";
pub(crate) const TIMER_PREFIX: &[u8] = b"stats.timers.";
pub(crate) const GAUGE_PREFIX: &[u8] = b"stats.gauge.";
pub(crate) const METER_PREFIX: &[u8] = b"stats.meter";
pub(crate) const INTERNAL_PREFIX: &[u8] = b"statsd.";

/// The single owner of all aggregation state.
///
/// One logical executor drives both [`process`][Processor::process] (from
/// the ingest loop) and [`flush`][Processor::flush] (from the flush timer);
/// the processor itself is not synchronized and must not be mutated from
/// multiple threads without an external lock.
pub struct Processor {
    wall_clock: WallClock,
    counters: IndexMap<Bytes, f64>,
    timers: IndexMap<Bytes, Vec<f64>>,
    gauges: VecDeque<(f64, Bytes)>,
    meters: IndexMap<Bytes, MeterReporter>,
    plugins: IndexMap<Bytes, Box<dyn MetricFactory>>,
    plugin_metrics: IndexMap<Bytes, Box<dyn PluginMetric>>,
    receive_timings: ReceiveTimings,
}

impl Processor {
    /// Creates a processor with no plugins.
    pub fn new(wall_clock: WallClock) -> Self {
        Self::with_plugins(wall_clock, Vec::new())
    }

    /// Creates a processor with the given plugin factories, each registered
    /// under its wire type tag.
    pub fn with_plugins(wall_clock: WallClock, factories: Vec<Box<dyn MetricFactory>>) -> Self {
        let mut plugins = IndexMap::new();
        for factory in factories {
            plugins.insert(Bytes::copy_from_slice(factory.metric_type()), factory);
        }

        Processor {
            wall_clock,
            counters: IndexMap::new(),
            timers: IndexMap::new(),
            gauges: VecDeque::new(),
            meters: IndexMap::new(),
            plugins,
            plugin_metrics: IndexMap::new(),
            receive_timings: ReceiveTimings::default(),
        }
    }

    /// Ingests one datagram line.
    ///
    /// Never fails: malformed lines, unparseable values, and unknown metric
    /// types are logged at debug and dropped.
    pub fn process(&mut self, payload: &[u8]) {
        match parse_line(payload) {
            Ok(sample) => self.dispatch(payload, sample),
            Err(reason) => reject(payload, reason),
        }
    }

    fn dispatch(&mut self, payload: &[u8], sample: Sample) {
        let start = (self.wall_clock)();
        let result = match sample.metric_type.as_ref() {
            b"c" => self.process_counter(&sample),
            b"ms" => self.process_timer(&sample),
            b"g" => self.process_gauge(&sample),
            b"m" => self.process_meter(&sample),
            _ if self.plugins.contains_key(&sample.metric_type) => self.process_plugin(&sample),
            _ => {
                reject(payload, RejectReason::UnknownMetricType);
                return;
            }
        };
        if let Err(reason) = result {
            reject(payload, reason);
        }

        // Ingest cost accrues for every recognized type, value parse failures
        // included; unknown types accrue nothing.
        let elapsed = (self.wall_clock)() - start;
        self.receive_timings.record(&sample.metric_type, elapsed);
    }

    fn process_counter(&mut self, sample: &Sample) -> Result<(), RejectReason> {
        let value = parse::parse_finite_f64(&sample.fields[0])?;
        let rate = if sample.fields.len() == 3 {
            parse::parse_sample_rate(&sample.fields[2])?
        } else {
            1.0
        };
        *self.counters.entry(sample.key.clone()).or_insert(0.0) += value / rate;
        Ok(())
    }

    fn process_timer(&mut self, sample: &Sample) -> Result<(), RejectReason> {
        let duration = parse::parse_finite_f64(&sample.fields[0])?;
        self.timers.entry(sample.key.clone()).or_default().push(duration);
        Ok(())
    }

    fn process_gauge(&mut self, sample: &Sample) -> Result<(), RejectReason> {
        if sample.fields[0].contains(&b':') {
            return Err(RejectReason::MalformedPayload);
        }
        let value = parse::parse_finite_f64(&sample.fields[0])?;
        self.gauges.push_back((value, sample.key.clone()));
        Ok(())
    }

    fn process_meter(&mut self, sample: &Sample) -> Result<(), RejectReason> {
        if sample.fields[0].contains(&b':') {
            return Err(RejectReason::MalformedPayload);
        }
        let value = parse::parse_finite_f64(&sample.fields[0])?;
        let wall_clock = Arc::clone(&self.wall_clock);
        let reporter = self.meters.entry(sample.key.clone()).or_insert_with(|| {
            MeterReporter::new(Bytes::from_static(METER_PREFIX), sample.key.clone(), wall_clock)
        });
        reporter.mark(value);
        Ok(())
    }

    fn process_plugin(&mut self, sample: &Sample) -> Result<(), RejectReason> {
        if !self.plugin_metrics.contains_key(&sample.key) {
            let factory = &self.plugins[&sample.metric_type];
            let prefix = concat_name(&[b"stats.", factory.name()]);
            let metric =
                factory.build_metric(prefix, sample.key.clone(), Arc::clone(&self.wall_clock));
            self.plugin_metrics.insert(sample.key.clone(), metric);
        }

        if let Some(metric) = self.plugin_metrics.get_mut(&sample.key) {
            if let Err(error) = metric.process(&sample.fields) {
                warn!(
                    key = %String::from_utf8_lossy(&sample.key),
                    %error,
                    "plugin failed to process sample; skipping"
                );
            }
        }
        Ok(())
    }

    /// All keys ever seen, across every aggregator.
    pub fn metric_names(&self) -> HashSet<Bytes> {
        let mut names = HashSet::new();
        names.extend(self.counters.keys().cloned());
        names.extend(self.timers.keys().cloned());
        names.extend(self.gauges.iter().map(|(_, key)| key.clone()));
        names.extend(self.meters.keys().cloned());
        names.extend(self.plugin_metrics.keys().cloned());
        names
    }

    /// Drains the current window into emissions.
    ///
    /// The returned iterator is lazy at emission-group granularity: each
    /// aggregator kind is extracted (and reset, where the kind requires)
    /// only when iteration reaches it, in the fixed order counters, timers,
    /// gauges, meters, plugins, summary. Abandoning iteration leaves every
    /// unreached aggregator untouched for the next flush.
    ///
    /// `interval_ms` should be a multiple of 1000; the per-second divisor is
    /// clamped to one second so a sub-second interval cannot divide by zero.
    pub fn flush(&mut self, interval_ms: u64, percent: u8) -> Flush<'_> {
        let interval_secs = (interval_ms / 1000).max(1);
        let timestamp = (self.wall_clock)() as u64;
        Flush {
            processor: self,
            interval_ms,
            interval_secs,
            percent,
            timestamp,
            stage: FlushStage::Counters,
            pending: VecDeque::new(),
            totals: FlushTotals::default(),
        }
    }
}

fn reject(payload: &[u8], reason: RejectReason) {
    debug!(%reason, line = %String::from_utf8_lossy(payload), "dropping bad line");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushStage {
    Counters,
    Timers,
    Gauges,
    Meters,
    Plugins,
    Summary,
    Done,
}

/// Iterator over one flush window's emissions. See [`Processor::flush`].
pub struct Flush<'a> {
    processor: &'a mut Processor,
    interval_ms: u64,
    interval_secs: u64,
    percent: u8,
    timestamp: u64,
    stage: FlushStage,
    pending: VecDeque<Emission>,
    totals: FlushTotals,
}

impl Iterator for Flush<'_> {
    type Item = Emission;

    fn next(&mut self) -> Option<Emission> {
        loop {
            if let Some(emission) = self.pending.pop_front() {
                return Some(emission);
            }
            match self.stage {
                FlushStage::Counters => {
                    self.run_group(b"counter", Self::flush_counters);
                    self.stage = FlushStage::Timers;
                }
                FlushStage::Timers => {
                    self.run_group(b"timer", Self::flush_timers);
                    self.stage = FlushStage::Gauges;
                }
                FlushStage::Gauges => {
                    self.run_group(b"gauge", Self::flush_gauges);
                    self.stage = FlushStage::Meters;
                }
                FlushStage::Meters => {
                    self.run_group(b"meter", Self::flush_meters);
                    self.stage = FlushStage::Plugins;
                }
                FlushStage::Plugins => {
                    self.run_group(b"plugin", Self::flush_plugins);
                    self.stage = FlushStage::Summary;
                }
                FlushStage::Summary => {
                    self.flush_summary();
                    self.stage = FlushStage::Done;
                }
                FlushStage::Done => return None,
            }
        }
    }
}

impl Flush<'_> {
    fn run_group(&mut self, kind: &'static [u8], group: fn(&mut Self) -> u64) {
        let start = (self.processor.wall_clock)();
        let events = group(self);
        let seconds = (self.processor.wall_clock)() - start;
        self.totals.record(kind, events, seconds);
    }

    fn flush_counters(&mut self) -> u64 {
        let mut events = 0;
        let timestamp = self.timestamp;
        let interval = self.interval_secs as f64;
        for (key, slot) in self.processor.counters.iter_mut() {
            let count = *slot;
            *slot = 0.0;

            let per_second = (count / interval).trunc() as i64;
            self.pending.push_back(Emission::new(
                &[STATS_PREFIX, key.as_ref()],
                per_second,
                timestamp,
            ));
            self.pending.push_back(Emission::new(
                &[COUNT_PREFIX, key.as_ref()],
                count,
                timestamp,
            ));
            events += 1;
        }
        events
    }

    fn flush_timers(&mut self) -> u64 {
        let mut events = 0;
        let timestamp = self.timestamp;
        let threshold = f64::from(100 - u32::from(self.percent.min(100))) / 100.0;

        let mut percent_writer = itoa::Buffer::new();
        let upper_suffix =
            concat_name(&[b".upper_", percent_writer.format(self.percent).as_bytes()]);

        for (key, bucket) in self.processor.timers.iter_mut() {
            if bucket.is_empty() {
                continue;
            }
            let mut samples = std::mem::take(bucket);
            samples.sort_by(f64::total_cmp);

            let count = samples.len();
            let lower = samples[0];
            let upper = samples[count - 1];

            let mut mean = MetricValue::Float(lower);
            let mut threshold_upper = MetricValue::Float(upper);
            if count > 1 {
                let dropped = (threshold * count as f64).round_ties_even() as usize;
                // At percent 0 the formula drops every sample; keep the
                // lowest one so the trimmed statistics stay defined.
                let kept = count.saturating_sub(dropped).max(1);
                let truncated = &samples[..kept];
                threshold_upper = MetricValue::Float(truncated[kept - 1]);
                let sum: f64 = truncated.iter().sum();
                mean = MetricValue::Signed((sum / kept as f64).floor() as i64);
            }

            let series: [(&[u8], MetricValue); 5] = [
                (b".mean", mean),
                (b".upper", MetricValue::Float(upper)),
                (upper_suffix.as_ref(), threshold_upper),
                (b".lower", MetricValue::Float(lower)),
                (b".count", MetricValue::Unsigned(count as u64)),
            ];

            let mut items: Vec<Emission> = series
                .iter()
                .map(|&(suffix, value)| {
                    Emission::new(&[TIMER_PREFIX, key.as_ref(), suffix], value, timestamp)
                })
                .collect();
            // Stable output: sub-items ordered by full metric name.
            items.sort_by(|a, b| a.name.cmp(&b.name));
            self.pending.extend(items);
            events += 1;
        }
        events
    }

    fn flush_gauges(&mut self) -> u64 {
        let mut events = 0;
        // The gauge sequence is intentionally not cleared: the last known
        // readings keep flowing on every flush until new samples arrive.
        for (value, key) in self.processor.gauges.iter() {
            self.pending.push_back(Emission::new(
                &[GAUGE_PREFIX, key.as_ref(), b".value"],
                *value,
                self.timestamp,
            ));
            events += 1;
        }
        events
    }

    fn flush_meters(&mut self) -> u64 {
        let mut events = 0;
        for reporter in self.processor.meters.values_mut() {
            self.pending.extend(reporter.report(self.timestamp));
            events += 1;
        }
        events
    }

    fn flush_plugins(&mut self) -> u64 {
        let mut events = 0;
        for (key, metric) in self.processor.plugin_metrics.iter_mut() {
            match metric.flush(self.interval_ms, self.timestamp) {
                Ok(emissions) => {
                    self.pending.extend(emissions);
                    events += 1;
                }
                Err(error) => {
                    warn!(
                        key = %String::from_utf8_lossy(key),
                        %error,
                        "plugin failed to flush; skipping"
                    );
                }
            }
        }
        events
    }

    fn flush_summary(&mut self) {
        let timestamp = self.timestamp;
        self.pending.push_back(Emission::new(
            &[INTERNAL_PREFIX, b"numStats"],
            self.totals.num_stats(),
            timestamp,
        ));

        for &(kind, events, seconds) in self.totals.kinds() {
            self.pending.push_back(Emission::new(
                &[INTERNAL_PREFIX, b"flush.", kind, b".count"],
                events,
                timestamp,
            ));
            self.pending.push_back(Emission::new(
                &[INTERNAL_PREFIX, b"flush.", kind, b".duration"],
                seconds * 1000.0,
                timestamp,
            ));
            debug!(
                kind = %String::from_utf8_lossy(kind),
                events,
                seconds,
                "flushed metric group"
            );
        }

        for (metric_type, timing) in self.processor.receive_timings.drain() {
            self.pending.push_back(Emission::new(
                &[INTERNAL_PREFIX, b"receive.", metric_type.as_ref(), b".count"],
                timing.events,
                timestamp,
            ));
            self.pending.push_back(Emission::new(
                &[INTERNAL_PREFIX, b"receive.", metric_type.as_ref(), b".duration"],
                timing.seconds * 1000.0,
                timestamp,
            ));
        }
    }
}
