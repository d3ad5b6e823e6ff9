/// Fixed-window moving average over 10-bit sensor samples.
///
/// Circular buffer with an incrementally maintained running sum, so each
/// update is O(1) regardless of window size. Until the buffer has wrapped
/// once the divisor is the number of samples seen so far.

use crate::defaults::ADC_MAX;

/// Lifecycle phase of the filter. The transition is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    /// Fewer than `N` samples written since creation or reset.
    Warming,
    /// The cursor has wrapped at least once.
    Steady,
}

impl FilterPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterPhase::Warming => "warming",
            FilterPhase::Steady => "steady",
        }
    }
}

pub struct MovingAverageFilter<const N: usize> {
    window: [u16; N],
    cursor: usize,
    filled: bool,
    running_sum: u32,
}

impl<const N: usize> MovingAverageFilter<N> {
    // Largest possible window sum must fit the accumulator.
    const FITS_ACCUMULATOR: () = assert!(
        N > 0 && (N as u64) * (ADC_MAX as u64) <= u32::MAX as u64,
        "window too large for a u32 running sum"
    );

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::FITS_ACCUMULATOR;
        Self {
            window: [0; N],
            cursor: 0,
            filled: false,
            running_sum: 0,
        }
    }

    /// Push one sample and return the truncated average of the current window.
    pub fn add_sample(&mut self, value: u16) -> u16 {
        let oldest = self.window[self.cursor];
        self.running_sum = self
            .running_sum
            .wrapping_sub(oldest as u32)
            .wrapping_add(value as u32);
        self.window[self.cursor] = value;

        self.cursor = (self.cursor + 1) % N;
        if self.cursor == 0 {
            self.filled = true;
        }

        (self.running_sum / self.window_len() as u32) as u16
    }

    /// Feed `N` copies of `value`, leaving the filter in [`FilterPhase::Steady`].
    pub fn prime(&mut self, value: u16) {
        for _ in 0..N {
            self.add_sample(value);
        }
    }

    /// Number of samples the next average divides by.
    ///
    /// Zero only before the first sample has been written.
    pub fn window_len(&self) -> usize {
        if self.filled {
            N
        } else {
            self.cursor
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn running_sum(&self) -> u32 {
        self.running_sum
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    pub fn phase(&self) -> FilterPhase {
        if self.filled {
            FilterPhase::Steady
        } else {
            FilterPhase::Warming
        }
    }

    /// Populated slots in storage order (not arrival order).
    pub fn samples(&self) -> &[u16] {
        &self.window[..self.window_len()]
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl<const N: usize> Default for MovingAverageFilter<N> {
    fn default() -> Self {
        Self::new()
    }
}
