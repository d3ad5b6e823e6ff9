/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments selected at compile time via
/// feature flags. The sensor must sit on an ADC1 channel (ADC2 is shared
/// with the radio on ESP32 parts).

#[cfg(feature = "board-xiao")]
mod hw {
    pub const SENSOR_ADC_PIN: u8 = 1; // A0 / D0, ADC1_CH0
    pub const DATA_TX_PIN: u8 = 43; // D6
    pub const DATA_RX_PIN: u8 = 44; // D7
    pub const ADC_BITS: u8 = 12;
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(feature = "board-m5stickc")]
mod hw {
    pub const SENSOR_ADC_PIN: u8 = 33; // Grove G33, ADC1_CH5
    pub const DATA_TX_PIN: u8 = 32; // Grove G32
    pub const DATA_RX_PIN: u8 = 26; // Hat G26
    pub const ADC_BITS: u8 = 12;
    pub const BOARD_NAME: &str = "m5stickc_plus2";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc")))]
mod hw {
    pub const ADC_BITS: u8 = 10;
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;
