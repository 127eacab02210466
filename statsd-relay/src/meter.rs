use bytes::Bytes;

use crate::clock::WallClock;
use crate::emission::Emission;

/// Seconds between EWMA ticks.
const TICK_INTERVAL_SECS: f64 = 5.0;

/// One exponentially weighted moving average over a fixed window.
///
/// The first tick seeds the rate with the observed instant rate; later ticks
/// fold new observations in with `rate += alpha * (instant - rate)`.
struct EwmaRate {
    alpha: f64,
    rate: f64,
    initialized: bool,
}

impl EwmaRate {
    fn new(window_minutes: f64) -> Self {
        EwmaRate {
            alpha: 1.0 - (-TICK_INTERVAL_SECS / (60.0 * window_minutes)).exp(),
            rate: 0.0,
            initialized: false,
        }
    }

    fn tick(&mut self, instant_rate: f64) {
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }
}

/// Per-key meter state: a monotonic event count plus one-, five-, and
/// fifteen-minute EWMA rates advanced on a five-second tick.
///
/// Ticks are applied lazily: `report` catches up on however many whole tick
/// intervals have elapsed since the last report before reading the rates, so
/// an idle meter decays exactly as if it had been ticked on schedule.
pub struct MeterReporter {
    prefix: Bytes,
    name: Bytes,
    wall_clock: WallClock,
    count: f64,
    uncounted: f64,
    started_at: f64,
    last_tick: f64,
    one_minute: EwmaRate,
    five_minute: EwmaRate,
    fifteen_minute: EwmaRate,
}

impl MeterReporter {
    /// Creates a reporter emitting under `<prefix>.<name>.`.
    pub fn new(prefix: Bytes, name: Bytes, wall_clock: WallClock) -> Self {
        let now = (wall_clock)();
        MeterReporter {
            prefix,
            name,
            wall_clock,
            count: 0.0,
            uncounted: 0.0,
            started_at: now,
            last_tick: now,
            one_minute: EwmaRate::new(1.0),
            five_minute: EwmaRate::new(5.0),
            fifteen_minute: EwmaRate::new(15.0),
        }
    }

    /// Records `value` occurrences of the metered event.
    pub fn mark(&mut self, value: f64) {
        self.count += value;
        self.uncounted += value;
    }

    /// Total events marked since creation.
    pub fn count(&self) -> f64 {
        self.count
    }

    fn tick(&mut self) {
        let instant_rate = self.uncounted / TICK_INTERVAL_SECS;
        self.uncounted = 0.0;
        self.one_minute.tick(instant_rate);
        self.five_minute.tick(instant_rate);
        self.fifteen_minute.tick(instant_rate);
    }

    fn advance(&mut self, now: f64) {
        let elapsed = now - self.last_tick;
        if elapsed < TICK_INTERVAL_SECS {
            return;
        }
        let ticks = (elapsed / TICK_INTERVAL_SECS).floor();
        for _ in 0..ticks as u64 {
            self.tick();
        }
        self.last_tick += ticks * TICK_INTERVAL_SECS;
    }

    /// Advances the EWMAs to the current wall time and emits the five meter
    /// series, stamped with `timestamp`.
    pub fn report(&mut self, timestamp: u64) -> Vec<Emission> {
        let now = (self.wall_clock)();
        self.advance(now);

        let elapsed = now - self.started_at;
        let mean_rate = if elapsed > 0.0 { self.count / elapsed } else { 0.0 };

        let series: [(&[u8], f64); 5] = [
            (b".count", self.count),
            (b".mean_rate", mean_rate),
            (b".1min_rate", self.one_minute.rate),
            (b".5min_rate", self.five_minute.rate),
            (b".15min_rate", self.fifteen_minute.rate),
        ];

        series
            .iter()
            .map(|&(suffix, value)| {
                Emission::new(
                    &[self.prefix.as_ref(), b".", self.name.as_ref(), suffix],
                    value,
                    timestamp,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::emission::MetricValue;

    fn reporter(clock: &ManualClock) -> MeterReporter {
        MeterReporter::new(
            Bytes::from_static(b"stats.meter"),
            Bytes::from_static(b"events"),
            clock.as_wall_clock(),
        )
    }

    fn value_of(emissions: &[Emission], name: &[u8]) -> f64 {
        emissions
            .iter()
            .find(|e| e.name.as_ref() == name)
            .map(|e| e.value.as_f64())
            .unwrap_or_else(|| panic!("missing series {:?}", String::from_utf8_lossy(name)))
    }

    #[test]
    fn first_report_with_frozen_clock() {
        let clock = ManualClock::new(1000.0);
        let mut meter = reporter(&clock);
        meter.mark(1.0);

        let emissions = meter.report(1000);
        assert_eq!(emissions.len(), 5);
        assert_eq!(emissions[0].name.as_ref(), b"stats.meter.events.count");
        assert_eq!(value_of(&emissions, b"stats.meter.events.count"), 1.0);
        // No wall time has passed: no ticks, and the mean rate is defined as 0.
        assert_eq!(value_of(&emissions, b"stats.meter.events.mean_rate"), 0.0);
        assert_eq!(value_of(&emissions, b"stats.meter.events.1min_rate"), 0.0);
        for e in &emissions {
            assert!(matches!(e.value, MetricValue::Float(_)));
            assert_eq!(e.timestamp, 1000);
        }
    }

    #[test]
    fn rates_seed_with_first_tick_instant_rate() {
        let clock = ManualClock::new(1000.0);
        let mut meter = reporter(&clock);
        meter.mark(10.0);
        clock.advance(5.0);

        let emissions = meter.report(1005);
        // 10 events over one 5-second tick.
        assert_relative_eq!(value_of(&emissions, b"stats.meter.events.1min_rate"), 2.0);
        assert_relative_eq!(value_of(&emissions, b"stats.meter.events.5min_rate"), 2.0);
        assert_relative_eq!(value_of(&emissions, b"stats.meter.events.15min_rate"), 2.0);
        assert_relative_eq!(value_of(&emissions, b"stats.meter.events.mean_rate"), 2.0);
    }

    #[test]
    fn count_is_monotonic_across_reports() {
        let clock = ManualClock::new(1000.0);
        let mut meter = reporter(&clock);

        let mut last = 0.0;
        for round in 0u64..5 {
            if round % 2 == 0 {
                meter.mark(3.0);
            }
            clock.advance(10.0);
            let emissions = meter.report(1000 + round * 10);
            let count = value_of(&emissions, b"stats.meter.events.count");
            assert!(count >= last);
            last = count;
        }
        assert_relative_eq!(last, 9.0);
    }

    #[test]
    fn idle_meter_decays_toward_zero() {
        let clock = ManualClock::new(1000.0);
        let mut meter = reporter(&clock);
        meter.mark(100.0);
        clock.advance(5.0);

        let seeded = value_of(&meter.report(1005), b"stats.meter.events.1min_rate");
        assert_relative_eq!(seeded, 20.0);

        // An hour of silence: every window should be practically dead.
        clock.advance(3600.0);
        let emissions = meter.report(4605);
        let one = value_of(&emissions, b"stats.meter.events.1min_rate");
        let five = value_of(&emissions, b"stats.meter.events.5min_rate");
        let fifteen = value_of(&emissions, b"stats.meter.events.15min_rate");
        assert!(one >= 0.0 && one < 1e-6, "1min rate {one}");
        assert!(five >= 0.0 && five < 1e-3, "5min rate {five}");
        // Wider windows decay slower, but an hour is long even for 15 minutes.
        assert!(fifteen > five && fifteen < 0.5, "15min rate {fifteen}");
    }

    #[test]
    fn partial_tick_intervals_do_not_tick() {
        let clock = ManualClock::new(1000.0);
        let mut meter = reporter(&clock);
        meter.mark(5.0);
        clock.advance(4.0);

        let emissions = meter.report(1004);
        assert_eq!(value_of(&emissions, b"stats.meter.events.1min_rate"), 0.0);

        // Crossing the boundary consumes the backlog in one tick.
        clock.advance(1.0);
        let emissions = meter.report(1005);
        assert_relative_eq!(value_of(&emissions, b"stats.meter.events.1min_rate"), 1.0);
    }
}
