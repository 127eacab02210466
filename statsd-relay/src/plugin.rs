use bytes::Bytes;
use thiserror::Error;

use crate::clock::WallClock;
use crate::emission::Emission;

/// Error raised by a plugin's `process` or `flush`.
///
/// A failing plugin is skipped for the current operation and logged at warn;
/// it never disturbs the built-in aggregators or other plugins.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PluginError(pub String);

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        PluginError(message)
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        PluginError(message.to_string())
    }
}

/// A pluggable aggregator kind, registered with the builder under a wire
/// type tag.
///
/// The processor builds one [`PluginMetric`] per key on first sight of a
/// sample carrying the factory's tag, handing it the emission prefix
/// `stats.<name>`, the key, and the shared wall clock.
pub trait MetricFactory: Send {
    /// The wire type tag this factory handles (the `<type>` field).
    fn metric_type(&self) -> &[u8];

    /// Short name used to build the emission prefix `stats.<name>`.
    fn name(&self) -> &[u8];

    /// Builds the per-key metric instance.
    fn build_metric(&self, prefix: Bytes, name: Bytes, wall_clock: WallClock)
        -> Box<dyn PluginMetric>;
}

/// The capability record every plugin metric implements.
///
/// What a plugin accumulates is opaque to the processor; the processor only
/// guarantees this dispatch contract and owns the instance map.
pub trait PluginMetric: Send {
    /// Absorbs one sample. `fields` are the `|`-separated fields of the
    /// line, value first.
    fn process(&mut self, fields: &[Bytes]) -> Result<(), PluginError>;

    /// Drains the accumulated state into emissions for this flush window.
    /// `interval_ms` is the flush interval in milliseconds.
    fn flush(&mut self, interval_ms: u64, timestamp: u64) -> Result<Vec<Emission>, PluginError>;

    /// Re-initializes internal state, for kinds that zero between windows.
    fn reset(&mut self) {}
}
