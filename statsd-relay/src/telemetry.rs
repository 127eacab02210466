use bytes::Bytes;
use indexmap::IndexMap;

/// Accumulated ingest cost for one metric type between flushes.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TypeTiming {
    /// Wall seconds spent inside `process` for this type.
    pub seconds: f64,
    /// Samples routed to this type's aggregator.
    pub events: u64,
}

/// Per-type ingest accounting, drained by the flush summary.
///
/// Types are emitted in first-seen order, so the map is insertion-ordered.
#[derive(Debug, Default)]
pub(crate) struct ReceiveTimings {
    by_type: IndexMap<Bytes, TypeTiming>,
}

impl ReceiveTimings {
    pub fn record(&mut self, metric_type: &Bytes, seconds: f64) {
        let timing = self.by_type.entry(metric_type.clone()).or_default();
        timing.seconds += seconds;
        timing.events += 1;
    }

    /// Takes the accumulated timings, leaving the map empty for the next
    /// flush window.
    pub fn drain(&mut self) -> IndexMap<Bytes, TypeTiming> {
        std::mem::take(&mut self.by_type)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// Per-kind flush accounting for one flush window: how many aggregator
/// events each kind emitted and how long its group took to flush.
#[derive(Debug, Default)]
pub(crate) struct FlushTotals {
    kinds: Vec<(&'static [u8], u64, f64)>,
    num_stats: u64,
}

impl FlushTotals {
    pub fn record(&mut self, kind: &'static [u8], events: u64, seconds: f64) {
        self.kinds.push((kind, events, seconds));
        self.num_stats += events;
    }

    /// Kinds in the order they were flushed.
    pub fn kinds(&self) -> &[(&'static [u8], u64, f64)] {
        &self.kinds
    }

    /// Total aggregator events emitted in this flush.
    pub fn num_stats(&self) -> u64 {
        self.num_stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_timings_accumulate_per_type() {
        let mut timings = ReceiveTimings::default();
        let counter = Bytes::from_static(b"c");
        let timer = Bytes::from_static(b"ms");

        timings.record(&counter, 0.5);
        timings.record(&timer, 0.25);
        timings.record(&counter, 0.5);

        let drained = timings.drain();
        assert!(timings.is_empty());

        // First-seen order survives the drain.
        let types: Vec<_> = drained.keys().map(|k| k.as_ref().to_vec()).collect();
        assert_eq!(types, vec![b"c".to_vec(), b"ms".to_vec()]);
        assert_eq!(drained[&counter].events, 2);
        assert_eq!(drained[&counter].seconds, 1.0);
        assert_eq!(drained[&timer].events, 1);
    }

    #[test]
    fn flush_totals_sum_to_num_stats() {
        let mut totals = FlushTotals::default();
        totals.record(b"counter", 3, 0.0);
        totals.record(b"timer", 1, 0.0);
        totals.record(b"gauge", 0, 0.0);

        assert_eq!(totals.num_stats(), 4);
        let counted: u64 = totals.kinds().iter().map(|(_, events, _)| events).sum();
        assert_eq!(counted, totals.num_stats());
    }
}
