//! LeakSense — ESP-IDF std firmware
//!
//! Same conditioning loop as the no_std Embassy firmware, driven from the
//! main FreeRTOS task with blocking ESP-IDF drivers (oneshot ADC, UART).
//! The loop owns every peripheral it touches, so no shared state exists.

use esp_idf_svc::hal::adc::attenuation::DB_11;
use esp_idf_svc::hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_svc::hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{ADCPin, AnyIOPin};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{self, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::{esp_timer_get_time, EspError};

use leaksense::comm::LineSink;
use leaksense::defaults::{self, scale_adc};
use leaksense::record::VERSION;
use leaksense::sampler::{Clock, LoopConfig, SamplingLoop, Sensor};
use leaksense::board;

// ── Hardware capabilities ────────────────────────────────────────────

/// Raw oneshot conversions, scaled to the 10-bit sample domain.
struct AdcSensor<'d, T: ADCPin> {
    channel: AdcChannelDriver<'d, T, &'d AdcDriver<'d, T::Adc>>,
}

impl<'d, T: ADCPin> Sensor for AdcSensor<'d, T> {
    type Error = EspError;

    fn read_raw(&mut self) -> Result<u16, EspError> {
        Ok(scale_adc(self.channel.read_raw()?))
    }
}

/// Milliseconds since boot from the esp_timer, truncated to 32 bits like
/// the reference platform.
struct BootClock;

impl Clock for BootClock {
    fn now_millis(&self) -> u32 {
        // Safety: esp_timer is started by the IDF before app_main
        let us = unsafe { esp_timer_get_time() };
        ((us / 1000) as u64 & 0xFFFF_FFFF) as u32
    }
}

/// CSV output on the data UART.
struct UartSink<'d> {
    uart: UartDriver<'d>,
}

impl LineSink for UartSink<'_> {
    type Error = EspError;

    fn write_line(&mut self, mut line: &[u8]) -> Result<(), EspError> {
        while !line.is_empty() {
            let n = self.uart.write(line)?;
            line = &line[n..];
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();

    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("LeakSense v{} starting on {} (std)", VERSION, board::BOARD_NAME);

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    // ── Sensor ADC ───────────────────────────────────────────────────

    let adc = AdcDriver::new(peripherals.adc1)?;
    let adc_config = AdcChannelConfig {
        attenuation: DB_11,
        ..Default::default()
    };
    #[cfg(feature = "xiao")]
    let channel = AdcChannelDriver::new(&adc, pins.gpio1, &adc_config)?;
    #[cfg(feature = "m5stickc")]
    let channel = AdcChannelDriver::new(&adc, pins.gpio33, &adc_config)?;

    log::info!(
        "Sensor on GPIO{} ({}-bit ADC, >>{})",
        board::SENSOR_ADC_PIN,
        board::ADC_BITS,
        defaults::ADC_SHIFT
    );

    // ── Data UART ────────────────────────────────────────────────────

    let uart_config = uart::config::Config::default().baudrate(Hertz(defaults::SERIAL_BAUD));
    #[cfg(feature = "xiao")]
    let uart = UartDriver::new(
        peripherals.uart1,
        pins.gpio43,
        pins.gpio44,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;
    #[cfg(feature = "m5stickc")]
    let uart = UartDriver::new(
        peripherals.uart1,
        pins.gpio32,
        pins.gpio26,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;

    log::info!(
        "Data UART on TX GPIO{} / RX GPIO{} at {} baud",
        board::DATA_TX_PIN,
        board::DATA_RX_PIN,
        defaults::SERIAL_BAUD
    );

    log::info!(
        "Build target: {}",
        if cfg!(feature = "xiao") {
            "xiao (ESP32-S3)"
        } else if cfg!(feature = "m5stickc") {
            "m5stickc (ESP32)"
        } else {
            "unknown"
        }
    );

    // ── Sampling loop — runs on the main task until a driver fails ──

    let mut sampler: SamplingLoop<_, _, _> = SamplingLoop::with_config(
        AdcSensor { channel },
        BootClock,
        UartSink { uart },
        LoopConfig::new(),
    );

    // FreeRtos delays round to the tick rate (CONFIG_FREERTOS_HZ)
    match sampler.run(&mut FreeRtos) {
        Ok(never) => match never {},
        Err(e) => Err(anyhow::anyhow!("{}", e)),
    }
}
