//! LeakSense library — portable acoustic sensor conditioning core.
//!
//! Samples a 10-bit acoustic sensor at a fixed cadence, smooths the
//! readings with a fixed-window moving average, and emits
//! `timestamp,value` CSV lines for the edge gateway to consume. All
//! filtering, pacing and record logic lives here with no platform
//! dependencies, testable on any host with `cargo test`. Platform binaries
//! (Embassy firmware, ESP-IDF std firmware) are thin consumers that provide
//! the ADC, the clock and the UART.
//!
//! Modules:
//! - `filter`: O(1) moving average with warm-up handling
//! - `sampler`: sensor/clock capabilities and the sampling loop
//! - `record`: CSV line format, shared with the gateway side
//! - `comm`: output channel capability and a byte-fed record decoder
//! - `defaults`, `board`: compile-time constants

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod comm;
pub mod defaults;
pub mod filter;
pub mod record;
pub mod sampler;
