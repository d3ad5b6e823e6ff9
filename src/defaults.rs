/// Compiled-in operating constants for the conditioning loop.
///
/// These are fixed parameters of the deployed device, not a runtime
/// configuration surface. Board-specific pins live in [`crate::board`].

/// Number of most-recent samples the moving average spans.
pub const WINDOW: usize = 50;

/// Pause between loop iterations in milliseconds (≈66 records/s).
pub const SAMPLE_DELAY_MS: u32 = 15;

/// Baud rate of the CSV output UART.
pub const SERIAL_BAUD: u32 = 9600;

/// Largest value in the 10-bit sample domain.
pub const ADC_MAX: u16 = 1023;

/// Right shift applied to raw ESP32 conversions (12-bit) to land in the
/// 10-bit sample domain.
pub const ADC_SHIFT: u32 = 2;

/// Poll interval while waiting for the output channel to come up.
pub const SINK_POLL_MS: u32 = 10;

/// How long startup waits for the output channel before giving up.
/// `0` means do not wait at all.
pub const SINK_READY_TIMEOUT_MS: u32 = 2000;

/// Scale a raw 12-bit conversion down to the 10-bit sample domain,
/// clamping anything the hardware reports above range.
pub const fn scale_adc(raw: u16) -> u16 {
    let scaled = raw >> ADC_SHIFT;
    if scaled > ADC_MAX {
        ADC_MAX
    } else {
        scaled
    }
}
