/// Sampling loop — read, filter, timestamp, emit, pace.
///
/// The loop owns its sensor, clock, sink and filter for the lifetime of the
/// process. Hardware is reached only through the [`Sensor`], [`Clock`] and
/// [`LineSink`] capabilities, so the same loop drives the Embassy firmware,
/// the ESP-IDF firmware, and host tests.
///
/// Blocking drivers call [`SamplingLoop::run`]. Async drivers call
/// [`SamplingLoop::start`] once and then [`SamplingLoop::step`] from their
/// own timer loop.
use core::convert::Infallible;
use core::fmt;

use embedded_hal::delay::DelayNs;

use crate::comm::{wait_until_ready, LineSink, WaitPolicy};
use crate::defaults::{SAMPLE_DELAY_MS, SINK_POLL_MS, SINK_READY_TIMEOUT_MS, WINDOW};
use crate::filter::MovingAverageFilter;
use crate::record::{header_line, LineBuffer, OutputRecord};

/// Source of raw readings in the 10-bit sample domain.
pub trait Sensor {
    type Error: fmt::Debug;

    fn read_raw(&mut self) -> Result<u16, Self::Error>;
}

/// Millisecond uptime since process start. Non-decreasing until it wraps
/// at `u32::MAX`.
pub trait Clock {
    fn now_millis(&self) -> u32;
}

/// Replays a fixed sequence of samples, wrapping at the end.
/// Stands in for the ADC on boards or hosts without the sensor fitted.
pub struct ReplaySensor<'a> {
    samples: &'a [u16],
    pos: usize,
}

impl<'a> ReplaySensor<'a> {
    pub const fn new(samples: &'a [u16]) -> Self {
        Self { samples, pos: 0 }
    }
}

impl Sensor for ReplaySensor<'_> {
    type Error = Infallible;

    fn read_raw(&mut self) -> Result<u16, Infallible> {
        let Some(&value) = self.samples.get(self.pos) else {
            return Ok(0);
        };
        self.pos = (self.pos + 1) % self.samples.len();
        Ok(value)
    }
}

/// How the loop spaces iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep the full delay after every iteration. Processing time adds to
    /// the period.
    FixedDelay,
    /// Sleep until the next multiple of the delay since start. After an
    /// overrun the missed ticks are skipped, not made up with a burst.
    Deadline,
}

impl Pacing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pacing::FixedDelay => "fixed_delay",
            Pacing::Deadline => "deadline",
        }
    }
}

/// Loop timing parameters built from the compiled-in defaults.
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    /// Inter-iteration delay (or period, for deadline pacing) in ms
    pub delay_ms: u32,
    pub pacing: Pacing,
    /// Startup wait for the output channel
    pub wait: WaitPolicy,
    /// Poll interval while waiting for the output channel
    pub poll_ms: u32,
}

impl LoopConfig {
    pub const fn new() -> Self {
        Self {
            delay_ms: SAMPLE_DELAY_MS,
            pacing: Pacing::FixedDelay,
            wait: WaitPolicy::from_timeout_ms(SINK_READY_TIMEOUT_MS),
            poll_ms: SINK_POLL_MS,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Collaborator failure surfaced by the loop.
#[derive(Debug, PartialEq, Eq)]
pub enum Error<SE, WE> {
    /// The sensor could not produce a reading.
    Sensor(SE),
    /// The output channel rejected a line.
    Sink(WE),
    /// The output channel never became ready within the wait policy.
    SinkNotReady,
}

impl<SE: fmt::Debug, WE: fmt::Debug> fmt::Display for Error<SE, WE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Sensor(e) => write!(f, "sensor read failed: {:?}", e),
            Error::Sink(e) => write!(f, "output write failed: {:?}", e),
            Error::SinkNotReady => write!(f, "output channel not ready"),
        }
    }
}

pub struct SamplingLoop<S, C, W, const N: usize = WINDOW> {
    sensor: S,
    clock: C,
    sink: W,
    filter: MovingAverageFilter<N>,
    config: LoopConfig,
    line: LineBuffer,
    next_tick: u32,
    iterations: u32,
}

impl<S, C, W, const N: usize> SamplingLoop<S, C, W, N>
where
    S: Sensor,
    C: Clock,
    W: LineSink,
{
    pub fn new(sensor: S, clock: C, sink: W) -> Self {
        Self::with_config(sensor, clock, sink, LoopConfig::new())
    }

    pub fn with_config(sensor: S, clock: C, sink: W, config: LoopConfig) -> Self {
        Self {
            sensor,
            clock,
            sink,
            filter: MovingAverageFilter::new(),
            config,
            line: LineBuffer::new(),
            next_tick: 0,
            iterations: 0,
        }
    }

    /// Acquire the output channel, prime the filter with `N` zeros, and
    /// write the header line.
    pub fn start<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), Error<S::Error, W::Error>> {
        if !wait_until_ready(&mut self.sink, delay, self.config.wait, self.config.poll_ms) {
            log::warn!("Output channel not ready ({:?})", self.config.wait);
            return Err(Error::SinkNotReady);
        }
        self.prime_and_announce()
    }

    /// [`start`](Self::start) without the readiness wait, for drivers that
    /// acquire the channel themselves.
    pub fn start_ready(&mut self) -> Result<(), Error<S::Error, W::Error>> {
        self.prime_and_announce()
    }

    fn prime_and_announce(&mut self) -> Result<(), Error<S::Error, W::Error>> {
        self.filter.prime(0);
        log::info!(
            "Filter primed: window {}, phase {}",
            self.filter.capacity(),
            self.filter.phase().as_str()
        );

        self.sink
            .write_line(header_line().as_bytes())
            .map_err(Error::Sink)?;

        self.next_tick = self.clock.now_millis();
        self.iterations = 0;
        log::info!(
            "Sampling every {} ms ({})",
            self.config.delay_ms,
            self.config.pacing.as_str()
        );
        Ok(())
    }

    /// One iteration without the trailing delay.
    pub fn step(&mut self) -> Result<OutputRecord, Error<S::Error, W::Error>> {
        let raw = self.sensor.read_raw().map_err(Error::Sensor)?;
        let value = self.filter.add_sample(raw);
        let record = OutputRecord::new(self.clock.now_millis(), value);

        record.write_line(&mut self.line);
        self.sink
            .write_line(self.line.as_bytes())
            .map_err(Error::Sink)?;

        self.iterations = self.iterations.wrapping_add(1);
        log::trace!("raw {} -> {} @ {}", raw, value, record.timestamp_ms);
        Ok(record)
    }

    /// Block until the next iteration is due.
    pub fn pace<D: DelayNs>(&mut self, delay: &mut D) {
        let ms = match self.config.pacing {
            Pacing::FixedDelay => self.config.delay_ms,
            Pacing::Deadline => self.advance_deadline(),
        };
        if ms > 0 {
            delay.delay_ms(ms);
        }
    }

    /// Move to the next tick on the `delay_ms` grid anchored at start and
    /// return the milliseconds until it. If that tick has already passed,
    /// every missed tick is skipped and the first tick at or after now is used.
    /// Wrapping arithmetic throughout.
    pub fn advance_deadline(&mut self) -> u32 {
        let period = self.config.delay_ms;
        if period == 0 {
            return 0;
        }
        let now = self.clock.now_millis();
        self.next_tick = self.next_tick.wrapping_add(period);

        let late_by = now.wrapping_sub(self.next_tick);
        // A difference in the upper half of the range means the tick is ahead
        if late_by > 0 && late_by <= u32::MAX / 2 {
            let skipped = late_by.div_ceil(period);
            self.next_tick = self.next_tick.wrapping_add(skipped.wrapping_mul(period));
            log::debug!("Overrun by {} ms, skipped {} tick(s)", late_by, skipped);
        }
        self.next_tick.wrapping_sub(now)
    }

    /// Start, then sample forever. Returns only when a collaborator fails.
    pub fn run<D: DelayNs>(&mut self, delay: &mut D) -> Result<Infallible, Error<S::Error, W::Error>> {
        if let Err(e) = self.start(delay) {
            log::error!("Sampling failed to start: {}", e);
            return Err(e);
        }
        loop {
            if let Err(e) = self.step() {
                log::error!("Sampling stopped: {}", e);
                return Err(e);
            }
            self.pace(delay);
        }
    }

    pub fn filter(&self) -> &MovingAverageFilter<N> {
        &self.filter
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Records emitted since the last start.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use std::rc::Rc;
    use std::vec::Vec;

    use crate::comm::RecordReader;

    // ── Test doubles ────────────────────────────────────────────────

    /// Clock that advances only when the paired delay sleeps.
    #[derive(Clone, Default)]
    struct FakeClock(Rc<Cell<u32>>);

    impl FakeClock {
        fn at(ms: u32) -> Self {
            Self(Rc::new(Cell::new(ms)))
        }

        fn advance(&self, ms: u32) {
            self.0.set(self.0.get().wrapping_add(ms));
        }
    }

    impl Clock for FakeClock {
        fn now_millis(&self) -> u32 {
            self.0.get()
        }
    }

    struct FakeDelay {
        clock: FakeClock,
        sleeps: Vec<u32>,
    }

    impl FakeDelay {
        fn new(clock: &FakeClock) -> Self {
            Self {
                clock: clock.clone(),
                sleeps: Vec::new(),
            }
        }
    }

    impl DelayNs for FakeDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.delay_ms(ns / 1_000_000);
        }

        fn delay_ms(&mut self, ms: u32) {
            self.sleeps.push(ms);
            self.clock.advance(ms);
        }
    }

    #[derive(Default)]
    struct VecSink {
        bytes: Vec<u8>,
        fail_after: Option<usize>,
        ready: bool,
    }

    impl VecSink {
        fn ready() -> Self {
            Self {
                ready: true,
                ..Default::default()
            }
        }

        fn text(&self) -> &str {
            core::str::from_utf8(&self.bytes).unwrap()
        }

        fn lines(&self) -> Vec<&str> {
            self.text().lines().collect()
        }
    }

    #[derive(Debug, PartialEq)]
    struct LinkDown;

    impl LineSink for VecSink {
        type Error = LinkDown;

        fn write_line(&mut self, line: &[u8]) -> Result<(), LinkDown> {
            if let Some(n) = self.fail_after {
                if self.lines().len() >= n {
                    return Err(LinkDown);
                }
            }
            self.bytes.extend_from_slice(line);
            Ok(())
        }

        fn is_ready(&mut self) -> bool {
            self.ready
        }
    }

    #[derive(Debug, PartialEq)]
    struct AdcFault;

    struct FailingSensor {
        reads_left: u32,
    }

    impl Sensor for FailingSensor {
        type Error = AdcFault;

        fn read_raw(&mut self) -> Result<u16, AdcFault> {
            if self.reads_left == 0 {
                return Err(AdcFault);
            }
            self.reads_left -= 1;
            Ok(512)
        }
    }

    fn fixed(delay_ms: u32) -> LoopConfig {
        LoopConfig {
            delay_ms,
            pacing: Pacing::FixedDelay,
            wait: WaitPolicy::Immediate,
            poll_ms: 1,
        }
    }

    // ── Startup ─────────────────────────────────────────────────────

    #[test]
    fn start_primes_filter_and_writes_header() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler: SamplingLoop<_, _, _> =
            SamplingLoop::new(ReplaySensor::new(&[100]), clock.clone(), VecSink::ready());

        sampler.start(&mut delay).unwrap();

        assert_eq!(sampler.sink().text(), "Timestamp_ms,Sensor_Value\n");
        assert!(sampler.filter().is_filled());
        assert_eq!(sampler.filter().running_sum(), 0);
        assert!(delay.sleeps.is_empty());
    }

    #[test]
    fn first_record_after_priming_is_diluted() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler: SamplingLoop<_, _, _> =
            SamplingLoop::new(ReplaySensor::new(&[1000]), clock.clone(), VecSink::ready());

        sampler.start(&mut delay).unwrap();
        let rec = sampler.step().unwrap();
        assert_eq!(rec.value, 20);
    }

    #[test]
    fn start_times_out_when_sink_never_ready() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let config = LoopConfig {
            wait: WaitPolicy::Timeout { ms: 30 },
            poll_ms: 10,
            ..fixed(15)
        };
        let mut sampler: SamplingLoop<_, _, _> = SamplingLoop::with_config(
            ReplaySensor::new(&[1]),
            clock.clone(),
            VecSink::default(),
            config,
        );

        assert_eq!(sampler.start(&mut delay), Err(Error::SinkNotReady));
        assert!(sampler.sink().bytes.is_empty());
        assert_eq!(delay.sleeps, [10, 10, 10]);
    }

    #[test]
    fn start_ready_skips_wait() {
        let clock = FakeClock::at(0);
        let mut sampler: SamplingLoop<_, _, _> =
            SamplingLoop::new(ReplaySensor::new(&[1]), clock, VecSink::default());
        sampler.start_ready().unwrap();
        assert_eq!(sampler.sink().lines(), ["Timestamp_ms,Sensor_Value"]);
    }

    // ── Steady-state iteration ──────────────────────────────────────

    #[test]
    fn records_carry_clock_and_filtered_value() {
        let clock = FakeClock::at(5);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler: SamplingLoop<_, _, _, 4> = SamplingLoop::with_config(
            ReplaySensor::new(&[4, 8, 12, 16]),
            clock.clone(),
            VecSink::ready(),
            fixed(15),
        );

        sampler.start(&mut delay).unwrap();
        for _ in 0..4 {
            sampler.step().unwrap();
            sampler.pace(&mut delay);
        }

        // Primed with zeros, so each value is the running sum over 4
        assert_eq!(
            sampler.sink().lines(),
            ["Timestamp_ms,Sensor_Value", "5,1", "20,3", "35,6", "50,10"]
        );
        assert_eq!(sampler.iterations(), 4);
    }

    #[test]
    fn output_is_decodable_by_record_reader() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler: SamplingLoop<_, _, _> = SamplingLoop::with_config(
            ReplaySensor::new(&[1023, 0, 512]),
            clock.clone(),
            VecSink::ready(),
            fixed(15),
        );
        sampler.start(&mut delay).unwrap();
        let mut emitted = Vec::new();
        for _ in 0..120 {
            emitted.push(sampler.step().unwrap());
            sampler.pace(&mut delay);
        }

        let mut decoded = Vec::new();
        let n = RecordReader::new().feed_slice(&sampler.sink().bytes, |rec| decoded.push(rec));
        assert_eq!(n, 120);
        assert_eq!(decoded, emitted);
        assert!(decoded.iter().all(|r| r.value <= 1023));
    }

    #[test]
    fn fixed_delay_sleeps_configured_amount() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler: SamplingLoop<_, _, _> =
            SamplingLoop::new(ReplaySensor::new(&[1]), clock.clone(), VecSink::ready());
        sampler.start_ready().unwrap();
        sampler.step().unwrap();
        sampler.pace(&mut delay);
        assert_eq!(delay.sleeps, [SAMPLE_DELAY_MS]);
    }

    // ── Deadline pacing ─────────────────────────────────────────────

    fn deadline_sampler(
        clock: &FakeClock,
    ) -> SamplingLoop<ReplaySensor<'static>, FakeClock, VecSink> {
        let config = LoopConfig {
            pacing: Pacing::Deadline,
            ..fixed(15)
        };
        SamplingLoop::with_config(
            ReplaySensor::new(&[1]),
            clock.clone(),
            VecSink::ready(),
            config,
        )
    }

    #[test]
    fn deadline_pacing_absorbs_processing_time() {
        let clock = FakeClock::at(1000);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler = deadline_sampler(&clock);
        sampler.start(&mut delay).unwrap();

        sampler.step().unwrap();
        clock.advance(4); // processing
        sampler.pace(&mut delay);
        assert_eq!(clock.now_millis(), 1015);

        sampler.step().unwrap();
        clock.advance(20); // overrun past the 1030 tick
        sampler.pace(&mut delay);
        assert_eq!(clock.now_millis(), 1045);
        assert_eq!(delay.sleeps, [11, 10]);

        sampler.step().unwrap();
        sampler.pace(&mut delay);
        assert_eq!(clock.now_millis(), 1060);
        assert_eq!(delay.sleeps, [11, 10, 15]);
    }

    #[test]
    fn deadline_skips_ticks_missed_during_long_stall() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler = deadline_sampler(&clock);
        sampler.start(&mut delay).unwrap();

        sampler.step().unwrap();
        clock.advance(100); // six periods and change
        let mut stamps = Vec::new();
        for _ in 0..8 {
            sampler.pace(&mut delay);
            stamps.push(sampler.step().unwrap().timestamp_ms);
        }

        assert_eq!(stamps, [105, 120, 135, 150, 165, 180, 195, 210]);
        assert_eq!(delay.sleeps, [5, 15, 15, 15, 15, 15, 15, 15]);
    }

    #[test]
    fn deadline_landing_exactly_on_tick_does_not_sleep() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler = deadline_sampler(&clock);
        sampler.start(&mut delay).unwrap();

        sampler.step().unwrap();
        clock.advance(15);
        sampler.pace(&mut delay);
        assert!(delay.sleeps.is_empty());
        sampler.step().unwrap();
        sampler.pace(&mut delay);
        assert_eq!(clock.now_millis(), 30);

        // stall that ends exactly on a later tick
        sampler.step().unwrap();
        clock.advance(30);
        let before = delay.sleeps.len();
        sampler.pace(&mut delay);
        assert_eq!(delay.sleeps.len(), before);
        assert_eq!(sampler.step().unwrap().timestamp_ms, 60);
    }

    #[test]
    fn deadline_survives_clock_wrap() {
        let clock = FakeClock::at(u32::MAX - 5);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler = deadline_sampler(&clock);
        sampler.start(&mut delay).unwrap();
        sampler.step().unwrap();
        sampler.pace(&mut delay);
        assert_eq!(delay.sleeps, [15]);
        assert_eq!(clock.now_millis(), 9);

        let rec = sampler.step().unwrap();
        assert_eq!(rec.timestamp_ms, 9);
    }

    #[test]
    fn zero_period_deadline_never_sleeps() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let config = LoopConfig {
            pacing: Pacing::Deadline,
            ..fixed(0)
        };
        let mut sampler: SamplingLoop<_, _, _> = SamplingLoop::with_config(
            ReplaySensor::new(&[1]),
            clock.clone(),
            VecSink::ready(),
            config,
        );
        sampler.start(&mut delay).unwrap();
        assert_eq!(sampler.advance_deadline(), 0);
    }

    // ── Failure surfacing ───────────────────────────────────────────

    #[test]
    fn run_surfaces_sensor_error() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let mut sampler: SamplingLoop<_, _, _> = SamplingLoop::with_config(
            FailingSensor { reads_left: 3 },
            clock.clone(),
            VecSink::ready(),
            fixed(15),
        );

        let err = sampler.run(&mut delay).unwrap_err();
        assert_eq!(err, Error::Sensor(AdcFault));
        // header + three records
        assert_eq!(sampler.sink().lines().len(), 4);
        assert_eq!(delay.sleeps, [15, 15, 15]);
    }

    #[test]
    fn run_surfaces_sink_error() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let sink = VecSink {
            fail_after: Some(2),
            ..VecSink::ready()
        };
        let mut sampler: SamplingLoop<_, _, _> =
            SamplingLoop::with_config(ReplaySensor::new(&[7]), clock.clone(), sink, fixed(15));

        let err = sampler.run(&mut delay).unwrap_err();
        assert_eq!(err, Error::Sink(LinkDown));
        assert_eq!(sampler.iterations(), 1);
    }

    #[test]
    fn run_surfaces_header_write_error() {
        let clock = FakeClock::at(0);
        let mut delay = FakeDelay::new(&clock);
        let sink = VecSink {
            fail_after: Some(0),
            ..VecSink::ready()
        };
        let mut sampler: SamplingLoop<_, _, _> =
            SamplingLoop::with_config(ReplaySensor::new(&[7]), clock.clone(), sink, fixed(15));

        let err = sampler.run(&mut delay).unwrap_err();
        assert_eq!(err, Error::Sink(LinkDown));
        assert_eq!(sampler.iterations(), 0);
        assert!(sampler.sink().bytes.is_empty());
        assert!(delay.sleeps.is_empty());
    }

    #[test]
    fn error_display() {
        let e: Error<AdcFault, LinkDown> = Error::SinkNotReady;
        assert_eq!(std::format!("{e}"), "output channel not ready");
        let e: Error<AdcFault, LinkDown> = Error::Sensor(AdcFault);
        assert_eq!(std::format!("{e}"), "sensor read failed: AdcFault");
    }

    // ── ReplaySensor ────────────────────────────────────────────────

    #[test]
    fn replay_sensor_wraps() {
        let mut sensor = ReplaySensor::new(&[1, 2]);
        let got: Vec<u16> = (0..5).map(|_| sensor.read_raw().unwrap()).collect();
        assert_eq!(got, [1, 2, 1, 2, 1]);
    }

    #[test]
    fn empty_replay_reads_zero() {
        let mut sensor = ReplaySensor::new(&[]);
        assert_eq!(sensor.read_raw(), Ok(0));
    }

    #[test]
    fn default_config_matches_constants() {
        let config = LoopConfig::default();
        assert_eq!(config.delay_ms, 15);
        assert_eq!(config.pacing, Pacing::FixedDelay);
        assert_eq!(config.wait, WaitPolicy::Timeout { ms: 2000 });
    }
}
