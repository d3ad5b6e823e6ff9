/// Communication layer — CSV line output and consumer-side line decoding.
///
/// The device streams one record per line over a serial link. The sink is
/// abstracted as [`LineSink`] so the loop runs unchanged against a UART,
/// a USB CDC port, or an in-memory buffer under test.
use embedded_hal::delay::DelayNs;

use crate::record::{is_header, OutputRecord};

/// Byte-oriented, ordered output channel that accepts whole lines.
pub trait LineSink {
    type Error: core::fmt::Debug;

    /// Write one complete line, terminator included.
    fn write_line(&mut self, line: &[u8]) -> Result<(), Self::Error>;

    /// Whether the channel can accept data yet. Permanently wired links
    /// are always ready.
    fn is_ready(&mut self) -> bool {
        true
    }
}

impl<T: LineSink + ?Sized> LineSink for &mut T {
    type Error = T::Error;

    fn write_line(&mut self, line: &[u8]) -> Result<(), Self::Error> {
        (**self).write_line(line)
    }

    fn is_ready(&mut self) -> bool {
        (**self).is_ready()
    }
}

/// How startup waits for the output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Check once and proceed only if ready.
    Immediate,
    /// Block until ready, however long it takes (tethered deployments).
    Forever,
    /// Give up after `ms` milliseconds.
    Timeout { ms: u32 },
}

impl WaitPolicy {
    /// Build from a timeout constant where `0` means do not wait.
    pub const fn from_timeout_ms(ms: u32) -> Self {
        if ms == 0 {
            WaitPolicy::Immediate
        } else {
            WaitPolicy::Timeout { ms }
        }
    }
}

/// Poll `sink.is_ready()` every `poll_ms` under `policy`.
///
/// Returns `true` once the sink reports ready, `false` if the policy ran out.
pub fn wait_until_ready<W: LineSink, D: DelayNs>(
    sink: &mut W,
    delay: &mut D,
    policy: WaitPolicy,
    poll_ms: u32,
) -> bool {
    let poll_ms = poll_ms.max(1);
    let mut waited: u32 = 0;
    loop {
        if sink.is_ready() {
            return true;
        }
        let sleep_ms = match policy {
            WaitPolicy::Immediate => return false,
            WaitPolicy::Timeout { ms } if waited >= ms => return false,
            // Never sleep past the limit
            WaitPolicy::Timeout { ms } => poll_ms.min(ms - waited),
            WaitPolicy::Forever => poll_ms,
        };
        delay.delay_ms(sleep_ms);
        waited = waited.saturating_add(sleep_ms);
    }
}

/// Maximum accepted line length on the consumer side.
pub const MAX_READ_LINE: usize = 64;

/// What a complete input line turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Header,
    Record(OutputRecord),
    /// Not a header and not a valid record.
    Invalid,
}

/// Byte-fed decoder for the record stream.
/// Accumulates bytes until a newline is found, then classifies the line.
pub struct RecordReader {
    buf: [u8; MAX_READ_LINE],
    pos: usize,
    overflowed: bool,
}

impl RecordReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_READ_LINE],
            pos: 0,
            overflowed: false,
        }
    }

    /// Feed a byte into the reader. Returns the classified line when a
    /// terminator completes a non-empty one.
    pub fn feed(&mut self, byte: u8) -> Option<Line> {
        if byte == b'\n' || byte == b'\r' {
            let len = self.pos;
            let overflowed = self.overflowed;
            self.pos = 0;
            self.overflowed = false;
            if overflowed {
                return Some(Line::Invalid);
            }
            if len == 0 {
                return None;
            }
            Some(classify(&self.buf[..len]))
        } else if self.overflowed {
            None
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            // Overflow — discard until the next terminator
            self.overflowed = true;
            self.pos = 0;
            None
        }
    }

    /// Feed a chunk, calling `on_record` for every record decoded from it.
    /// Returns the number of records delivered.
    pub fn feed_slice<F: FnMut(OutputRecord)>(&mut self, data: &[u8], mut on_record: F) -> usize {
        let mut count = 0;
        for &byte in data {
            if let Some(Line::Record(rec)) = self.feed(byte) {
                on_record(rec);
                count += 1;
            }
        }
        count
    }
}

impl Default for RecordReader {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(line: &[u8]) -> Line {
    let Ok(text) = core::str::from_utf8(line) else {
        return Line::Invalid;
    };
    if is_header(text) {
        return Line::Header;
    }
    match OutputRecord::parse(text) {
        Some(rec) => Line::Record(rec),
        None => Line::Invalid,
    }
}
