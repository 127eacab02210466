use crate::emission::Emission;

/// Packs Graphite plaintext lines into size-capped payload buffers.
///
/// Each emission renders as `<name> <value> <timestamp>\n`. Lines are
/// appended to the current payload until the cap would be exceeded, at which
/// point the payload is sealed and a new one begins. A single line larger
/// than the cap can never be sent and is dropped and counted instead.
pub(crate) struct LineWriter {
    max_payload_len: usize,
    buf: Vec<u8>,
    offsets: Vec<usize>,
    line_buf: Vec<u8>,
    lines_written: u64,
    lines_dropped: u64,
}

impl LineWriter {
    pub fn new(max_payload_len: usize) -> Self {
        LineWriter {
            max_payload_len,
            buf: Vec::new(),
            offsets: Vec::new(),
            line_buf: Vec::new(),
            lines_written: 0,
            lines_dropped: 0,
        }
    }

    fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Renders one emission into the current payload. Returns `false` if the
    /// line was too large to ever fit and was dropped.
    pub fn write(&mut self, emission: &Emission) -> bool {
        self.line_buf.clear();
        self.line_buf.extend_from_slice(&emission.name);
        self.line_buf.push(b' ');
        emission.value.write_to(&mut self.line_buf);
        self.line_buf.push(b' ');
        let mut ts_writer = itoa::Buffer::new();
        self.line_buf.extend_from_slice(ts_writer.format(emission.timestamp).as_bytes());
        self.line_buf.push(b'\n');

        if self.line_buf.len() > self.max_payload_len {
            self.lines_dropped += 1;
            return false;
        }

        let current_len = self.buf.len() - self.last_offset();
        if current_len + self.line_buf.len() > self.max_payload_len {
            // Seal the current payload; this line opens the next one.
            self.offsets.push(self.buf.len());
        }
        self.buf.extend_from_slice(&self.line_buf);
        self.lines_written += 1;
        true
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn lines_dropped(&self) -> u64 {
        self.lines_dropped
    }

    /// Returns a consuming iterator over the sealed payloads.
    ///
    /// The writer is reset when the iterator is dropped, so it can be reused
    /// for the next flush window.
    pub fn payloads(&mut self) -> Payloads<'_> {
        Payloads {
            start: 0,
            offsets: self.offsets.drain(..),
            buf: &mut self.buf,
            tail_taken: false,
        }
    }
}

/// Iterator over the payloads written by a [`LineWriter`].
pub(crate) struct Payloads<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
    offsets: std::vec::Drain<'a, usize>,
    tail_taken: bool,
}

impl Payloads<'_> {
    /// Returns the next payload, or `None` when all have been drained.
    pub fn next_payload(&mut self) -> Option<&[u8]> {
        if let Some(offset) = self.offsets.next() {
            let payload = &self.buf[self.start..offset];
            self.start = offset;
            return Some(payload);
        }
        if !self.tail_taken && self.start < self.buf.len() {
            self.tail_taken = true;
            return Some(&self.buf[self.start..]);
        }
        None
    }
}

impl Drop for Payloads<'_> {
    fn drop(&mut self) {
        self.buf.clear();
    }
}
