/// CSV record format for the sensor output stream.
///
/// One header line is written at startup, then one record per loop
/// iteration. Both fields are unsigned decimal integers, so no escaping
/// is ever needed. Downstream gateways parse this byte-for-byte.
use core::fmt::Write;

use heapless::String;

/// Schema line emitted once before the first record.
pub const HEADER: &str = "Timestamp_ms,Sensor_Value";

/// Field separator
pub const SEPARATOR: char = ',';

/// Record terminator
pub const TERMINATOR: char = '\n';

/// Longest possible record: `4294967295,65535\n`
pub const MAX_LINE_LEN: usize = 17;

/// Buffer type for one formatted record line
pub type LineBuffer = String<MAX_LINE_LEN>;

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One filtered reading, stamped with milliseconds since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRecord {
    /// Monotonic uptime in milliseconds (wraps at `u32::MAX`)
    pub timestamp_ms: u32,
    /// Moving-average output in the 10-bit sample domain
    pub value: u16,
}

impl OutputRecord {
    pub const fn new(timestamp_ms: u32, value: u16) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }

    /// Write `timestamp,value\n` into `buf`, replacing its contents.
    pub fn write_line(&self, buf: &mut LineBuffer) {
        buf.clear();
        // Cannot overflow: MAX_LINE_LEN covers the widest values of both fields
        let _ = write!(
            buf,
            "{}{}{}{}",
            self.timestamp_ms, SEPARATOR, self.value, TERMINATOR
        );
    }

    pub fn to_line(&self) -> LineBuffer {
        let mut buf = LineBuffer::new();
        self.write_line(&mut buf);
        buf
    }

    /// Parse one record line. A trailing `\n` or `\r\n` is accepted.
    ///
    /// Returns `None` for the header, blank lines, and anything that is
    /// not exactly two unsigned decimal fields.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (ts, value) = line.split_once(SEPARATOR)?;
        if !is_decimal(ts) || !is_decimal(value) {
            return None;
        }
        Some(Self {
            timestamp_ms: ts.parse().ok()?,
            value: value.parse().ok()?,
        })
    }
}

/// Header line including its terminator, as written to the wire.
pub fn header_line() -> String<{ HEADER.len() + 1 }> {
    let mut buf = String::new();
    let _ = buf.push_str(HEADER);
    let _ = buf.push(TERMINATOR);
    buf
}

/// Whether `line` (terminator optional) is the schema header.
pub fn is_header(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r']) == HEADER
}

// `str::parse` would also accept a leading '+'
fn is_decimal(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}
