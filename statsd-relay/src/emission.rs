use bytes::Bytes;

/// A numeric value carried by an [`Emission`].
///
/// The flush pipeline produces a mix of integral series (per-second counter
/// rates, sample counts) and floating-point series (raw counts, timer
/// statistics, meter rates); keeping them distinct means the wire format
/// renders `3` and `3.0` the way each series defines them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// A signed integral value.
    Signed(i64),
    /// An unsigned integral value.
    Unsigned(u64),
    /// A floating-point value.
    Float(f64),
}

impl MetricValue {
    /// Appends the decimal rendering of this value to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            MetricValue::Signed(v) => {
                let mut writer = itoa::Buffer::new();
                buf.extend_from_slice(writer.format(*v).as_bytes());
            }
            MetricValue::Unsigned(v) => {
                let mut writer = itoa::Buffer::new();
                buf.extend_from_slice(writer.format(*v).as_bytes());
            }
            MetricValue::Float(v) => {
                let mut writer = ryu::Buffer::new();
                buf.extend_from_slice(writer.format(*v).as_bytes());
            }
        }
    }

    /// The value as an `f64`, for comparisons where the repr doesn't matter.
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Signed(v) => *v as f64,
            MetricValue::Unsigned(v) => *v as f64,
            MetricValue::Float(v) => *v,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Signed(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Unsigned(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

/// One point of the derived time series: the `(name, value, timestamp)`
/// triple a downstream writer serializes as `<name> <value> <timestamp>\n`.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    /// Fully-prefixed metric name.
    pub name: Bytes,
    /// The value for this flush window.
    pub value: MetricValue,
    /// Wall-clock time of the flush, in whole seconds.
    pub timestamp: u64,
}

impl Emission {
    /// Builds an emission from name parts which are concatenated verbatim.
    pub fn new<V: Into<MetricValue>>(parts: &[&[u8]], value: V, timestamp: u64) -> Self {
        Emission { name: concat_name(parts), value: value.into(), timestamp }
    }
}

pub(crate) fn concat_name(parts: &[&[u8]]) -> Bytes {
    let len: usize = parts.iter().map(|p| p.len()).sum();
    let mut name = Vec::with_capacity(len);
    for part in parts {
        name.extend_from_slice(part);
    }
    Bytes::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(value: MetricValue) -> String {
        let mut buf = Vec::new();
        value.write_to(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn integral_values_render_without_fraction() {
        assert_eq!(rendered(MetricValue::Signed(-42)), "-42");
        assert_eq!(rendered(MetricValue::Unsigned(0)), "0");
        assert_eq!(rendered(MetricValue::Unsigned(18_446_744_073_709_551_615)), "18446744073709551615");
    }

    #[test]
    fn float_values_render_with_fraction() {
        assert_eq!(rendered(MetricValue::Float(3.0)), "3.0");
        assert_eq!(rendered(MetricValue::Float(0.25)), "0.25");
    }

    #[test]
    fn emission_name_concatenation() {
        let emission = Emission::new(&[b"stats.timers.", b"glork", b".mean"], 150_i64, 1000);
        assert_eq!(emission.name.as_ref(), b"stats.timers.glork.mean");
        assert_eq!(emission.value, MetricValue::Signed(150));
    }
}
