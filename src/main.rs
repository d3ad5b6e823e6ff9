//! LeakSense — acoustic pipe sensor conditioning firmware
//!
//! Samples the analog acoustic sensor on an ADC1 pin, smooths it with a
//! 50-sample moving average, and streams `timestamp,value` CSV lines on a
//! dedicated 9600-baud UART. Log output stays on the console port so it
//! never interleaves with the data stream.
//!
//! The edge gateway on the other end of the UART handles leak
//! classification, persistence, and network forwarding.

#![no_std]
#![no_main]

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use embassy_time::{Delay, Duration, Instant, Timer};
use esp_hal::analog::adc::{Adc, AdcConfig, AdcPin, Attenuation};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::peripherals::ADC1;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{self, Uart};
use esp_hal::Blocking;

use leaksense::comm::LineSink;
use leaksense::defaults::{self, scale_adc};
use leaksense::record::VERSION;
use leaksense::sampler::{Clock, LoopConfig, Pacing, SamplingLoop, Sensor};
use leaksense::board;

#[cfg(feature = "xiao")]
type SensorPin = esp_hal::peripherals::GPIO1<'static>;
#[cfg(feature = "m5stickc")]
type SensorPin = esp_hal::peripherals::GPIO33<'static>;

// ── Hardware capabilities ────────────────────────────────────────────

/// One-shot ADC1 conversions, scaled to the 10-bit sample domain.
struct AdcSensor {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    pin: AdcPin<SensorPin, ADC1<'static>>,
}

impl Sensor for AdcSensor {
    type Error = core::convert::Infallible;

    fn read_raw(&mut self) -> Result<u16, Self::Error> {
        // The driver only ever reports "conversion in progress"
        loop {
            if let Ok(raw) = self.adc.read_oneshot(&mut self.pin) {
                return Ok(scale_adc(raw));
            }
        }
    }
}

/// Milliseconds since boot, from the embassy time driver.
struct UptimeClock;

impl Clock for UptimeClock {
    fn now_millis(&self) -> u32 {
        (Instant::now().as_millis() & 0xFFFF_FFFF) as u32
    }
}

/// CSV output on the data UART.
struct SerialSink {
    uart: Uart<'static, Blocking>,
}

impl LineSink for SerialSink {
    type Error = uart::TxError;

    fn write_line(&mut self, mut line: &[u8]) -> Result<(), Self::Error> {
        while !line.is_empty() {
            let n = self.uart.write(line)?;
            line = &line[n..];
        }
        Ok(())
    }
}

type Sampler = SamplingLoop<AdcSensor, UptimeClock, SerialSink>;

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Start the RTOS — requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!("LeakSense v{} starting on {}", VERSION, board::BOARD_NAME);

    // ── Sensor ADC ──────────────────────────────────────────────────

    let mut adc_config = AdcConfig::new();
    #[cfg(feature = "xiao")]
    let pin = adc_config.enable_pin(peripherals.GPIO1, Attenuation::_11dB);
    #[cfg(feature = "m5stickc")]
    let pin = adc_config.enable_pin(peripherals.GPIO33, Attenuation::_11dB);
    let adc = Adc::new(peripherals.ADC1, adc_config);

    log::info!(
        "Sensor on GPIO{} ({}-bit ADC, >>{})",
        board::SENSOR_ADC_PIN,
        board::ADC_BITS,
        defaults::ADC_SHIFT
    );

    // ── Data UART ───────────────────────────────────────────────────

    let uart_config = uart::Config::default().with_baudrate(defaults::SERIAL_BAUD);
    #[cfg(feature = "xiao")]
    let uart = Uart::new(peripherals.UART1, uart_config)
        .expect("UART init failed")
        .with_tx(peripherals.GPIO43)
        .with_rx(peripherals.GPIO44);
    #[cfg(feature = "m5stickc")]
    let uart = Uart::new(peripherals.UART1, uart_config)
        .expect("UART init failed")
        .with_tx(peripherals.GPIO32)
        .with_rx(peripherals.GPIO26);

    log::info!(
        "Data UART on TX GPIO{} / RX GPIO{} at {} baud",
        board::DATA_TX_PIN,
        board::DATA_RX_PIN,
        defaults::SERIAL_BAUD
    );

    let sampler = SamplingLoop::with_config(
        AdcSensor { adc, pin },
        UptimeClock,
        SerialSink { uart },
        LoopConfig::new(),
    );

    spawner.spawn(sampling_task(sampler)).unwrap();

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
}

/// Sampling task — the only owner of the filter. Runs until the UART
/// reports a write failure.
#[embassy_executor::task]
async fn sampling_task(mut sampler: Sampler) {
    if let Err(e) = sampler.start(&mut Delay) {
        log::error!("Sampling failed to start: {}", e);
        return;
    }

    let period = Duration::from_millis(sampler.config().delay_ms as u64);

    match sampler.config().pacing {
        Pacing::FixedDelay => loop {
            if !step(&mut sampler) {
                return;
            }
            Timer::after(period).await;
        },
        // Missed ticks are skipped rather than replayed back to back
        Pacing::Deadline => loop {
            if !step(&mut sampler) {
                return;
            }
            Timer::after_millis(sampler.advance_deadline() as u64).await;
        },
    }
}

fn step(sampler: &mut Sampler) -> bool {
    match sampler.step() {
        Ok(_) => true,
        Err(e) => {
            log::error!("Sampling stopped: {}", e);
            false
        }
    }
}
