use bytes::Bytes;
use thiserror::Error;

/// Why an ingested line was rejected.
///
/// Rejections are never surfaced to callers as errors: the processor logs the
/// offending payload at debug level and drops it. The reason only exists so
/// the log line (and tests) can say which contract the payload broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// Structural failure: missing `:`, missing `|`, wrong number of
    /// `|`-separated fields, or a sampling-rate field that isn't `@<rate>`.
    #[error("malformed payload")]
    MalformedPayload,

    /// The value (or duration) field did not parse as a finite decimal float.
    #[error("unparseable value")]
    UnparseableValue,

    /// The metric type tag is neither built-in nor registered by a plugin.
    #[error("unknown metric type")]
    UnknownMetricType,
}

/// One successfully parsed datagram line.
///
/// `fields` holds the `|`-separated fields after the first `:` verbatim, so
/// the value is at index 0, the type tag at index 1, and the optional
/// sampling rate at index 2. Plugin metrics receive the whole slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// The metric key, already normalized for the downstream sink.
    pub key: Bytes,
    /// The short type tag (`c`, `ms`, `g`, `m`, or a plugin tag).
    pub metric_type: Bytes,
    /// All `|`-separated fields after the `:`.
    pub fields: Vec<Bytes>,
}

/// Normalizes a raw key into something Graphite will accept.
///
/// Runs of whitespace collapse to a single `_`, runs of `/` collapse to a
/// single `-`, and every other byte outside `[A-Za-z0-9._-]` is dropped.
/// The result may be empty; callers do not reject empty keys.
pub fn normalize_key(raw: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b.is_ascii_whitespace() {
            while i < raw.len() && raw[i].is_ascii_whitespace() {
                i += 1;
            }
            out.push(b'_');
        } else if b == b'/' {
            while i < raw.len() && raw[i] == b'/' {
                i += 1;
            }
            out.push(b'-');
        } else {
            if is_safe(b) {
                out.push(b);
            }
            i += 1;
        }
    }
    Bytes::from(out)
}

fn is_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')
}

/// Splits one datagram payload into a [`Sample`].
///
/// Only structural validation happens here; value fields are parsed by the
/// aggregator that consumes them, so that `UnparseableValue` rejections are
/// attributed to the right metric type.
pub fn parse_line(payload: &[u8]) -> Result<Sample, RejectReason> {
    let line = payload.trim_ascii();

    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(RejectReason::MalformedPayload)?;
    let (raw_key, rest) = line.split_at(colon);
    let data = &rest[1..];

    if !data.contains(&b'|') {
        return Err(RejectReason::MalformedPayload);
    }

    let fields: Vec<Bytes> = data.split(|&b| b == b'|').map(Bytes::copy_from_slice).collect();
    if fields.len() < 2 || fields.len() > 3 {
        return Err(RejectReason::MalformedPayload);
    }

    let metric_type = fields[1].clone();
    Ok(Sample { key: normalize_key(raw_key), metric_type, fields })
}

/// Parses a value field as a finite `f64`.
pub(crate) fn parse_finite_f64(field: &[u8]) -> Result<f64, RejectReason> {
    let text = std::str::from_utf8(field).map_err(|_| RejectReason::UnparseableValue)?;
    let value: f64 = text.trim().parse().map_err(|_| RejectReason::UnparseableValue)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RejectReason::UnparseableValue)
    }
}

/// Parses a counter sampling-rate field of the form `@<rate>`.
///
/// Matches the leading `@[0-9.]+` run and ignores any trailing bytes, the
/// same prefix match the wire format has always tolerated. The captured rate
/// must land in `(0, 1]`: anything else would corrupt the population
/// estimate (or divide by zero), so the line is rejected as malformed.
pub(crate) fn parse_sample_rate(field: &[u8]) -> Result<f64, RejectReason> {
    let digits = field.strip_prefix(b"@").ok_or(RejectReason::MalformedPayload)?;
    let end = digits
        .iter()
        .position(|b| !matches!(b, b'0'..=b'9' | b'.'))
        .unwrap_or(digits.len());
    if end == 0 {
        return Err(RejectReason::MalformedPayload);
    }

    // The matched run is pure ASCII digits and dots, so utf8 cannot fail.
    let text = std::str::from_utf8(&digits[..end]).map_err(|_| RejectReason::MalformedPayload)?;
    let rate: f64 = text.parse().map_err(|_| RejectReason::MalformedPayload)?;
    if rate > 0.0 && rate <= 1.0 {
        Ok(rate)
    } else {
        Err(RejectReason::MalformedPayload)
    }
}
