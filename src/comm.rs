/// Communication layer: serial NDJSON framing, sinks and the detection emitter.
///
/// A node writes every detection to two sinks: USB serial (local, always) and
/// the relay radio's UART (best effort). The head-end reads relay lines,
/// sorts JSON from mesh chatter, and writes to USB serial.
use serde::Serialize;

use crate::protocol::{format_detection, LineBuffer, SensorTag, MAX_MSG_LEN};
use crate::tracker::DetectionRecord;

/// Serial baud rate (USB console and relay UART)
pub const SERIAL_BAUD: u32 = 115200;

/// Prefix for relay lines that aren't JSON objects.
pub const MESH_PREFIX: &str = "[MESH] ";

/// A line-oriented output. Writes never block; a sink that cannot take a
/// line drops it.
pub trait LineSink {
    /// Write `line` followed by a newline.
    fn write_line(&mut self, line: &str);

    /// Bytes the sink can accept right now.
    fn writable(&self) -> usize {
        usize::MAX
    }
}

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a message to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
/// No newline is appended; `LineSink::write_line` adds it.
pub fn serialize_message<T: Serialize>(msg: &T, buf: &mut [u8]) -> Option<usize> {
    serde_json_core::to_slice(msg, buf).ok()
}

/// Serialize straight into a sink.
pub fn send_message<T: Serialize, S: LineSink + ?Sized>(msg: &T, sink: &mut S) -> bool {
    let mut buf = [0u8; MAX_MSG_LEN];
    let Some(len) = serialize_message(msg, &mut buf) else {
        log::warn!("Status message too large, dropped");
        return false;
    };
    match core::str::from_utf8(&buf[..len]) {
        Ok(line) => {
            sink.write_line(line);
            true
        }
        Err(_) => false,
    }
}

// ── Line classification ────────────────────────────────────────────────

/// What an inbound relay line looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Nothing but whitespace
    Empty,
    /// `{ ... }` after trimming: a dedup candidate
    Json,
    /// Anything else: opaque mesh text
    Text,
}

/// Classify a line by its first and last non-whitespace bytes.
pub fn classify_line(line: &[u8]) -> LineKind {
    let trimmed = trim_whitespace(line);
    match (trimmed.first(), trimmed.last()) {
        (None, _) => LineKind::Empty,
        (Some(b'{'), Some(b'}')) if trimmed.len() >= 2 => LineKind::Json,
        _ => LineKind::Text,
    }
}

/// Strip leading and trailing ASCII whitespace.
pub fn trim_whitespace(data: &[u8]) -> &[u8] {
    let is_ws = |b: &u8| matches!(b, b' ' | b'\n' | b'\r' | b'\t');
    let start = data.iter().position(|b| !is_ws(b)).unwrap_or(data.len());
    let end = data.iter().rposition(|b| !is_ws(b)).map_or(start, |i| i + 1);
    &data[start..end]
}

// ── Serial NDJSON reader ───────────────────────────────────────────────

/// Serial NDJSON reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    pos: usize,
    overflowed: bool,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            pos: 0,
            overflowed: false,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected. An over-long line is discarded up to and
    /// including its newline.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            let was_overflowed = core::mem::replace(&mut self.overflowed, false);
            if self.pos > 0 && !was_overflowed {
                let line = &self.buf[..self.pos];
                self.pos = 0;
                Some(line)
            } else {
                self.pos = 0;
                None
            }
        } else if self.overflowed {
            None
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            // Overflow: discard until the next newline
            log::debug!("Serial line overflow, discarding");
            self.pos = 0;
            self.overflowed = true;
            None
        }
    }
}

// ── Detection emitter ──────────────────────────────────────────────────

/// Formats detection snapshots and fans them out to the local and relay sinks.
/// Runs on the single consumer of the pipeline queue.
pub struct Emitter {
    tag: SensorTag,
    line: LineBuffer,
    emitted: u32,
    relayed: u32,
    relay_dropped: u32,
}

impl Emitter {
    pub fn new(tag: SensorTag) -> Self {
        Self {
            tag,
            line: LineBuffer::new(),
            emitted: 0,
            relayed: 0,
            relay_dropped: 0,
        }
    }

    /// Write one detection line to `local`, and to `relay` if it has room for
    /// the whole line. Returns whether the relay copy went out.
    pub fn emit<L, R>(&mut self, record: &DetectionRecord, local: &mut L, relay: &mut R) -> bool
    where
        L: LineSink + ?Sized,
        R: LineSink + ?Sized,
    {
        if format_detection(record, &self.tag, &mut self.line).is_err() {
            log::warn!("Detection line overflow, dropped");
            return false;
        }

        local.write_line(&self.line);
        self.emitted = self.emitted.saturating_add(1);

        if relay.writable() >= self.line.len() + 1 {
            relay.write_line(&self.line);
            self.relayed = self.relayed.saturating_add(1);
            true
        } else {
            self.relay_dropped = self.relay_dropped.saturating_add(1);
            false
        }
    }

    pub fn emitted(&self) -> u32 {
        self.emitted
    }

    pub fn relayed(&self) -> u32 {
        self.relayed
    }

    pub fn relay_dropped(&self) -> u32 {
        self.relay_dropped
    }
}
