// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Clock math over a [`PerformanceCounter`].

use super::PerformanceCounter;

/// Returned by clock queries when the counter or its frequency is unavailable.
pub const CLOCK_UNAVAILABLE: f64 = -1.0;

/// Converts the current reading of `counter` to seconds.
///
/// Returns [`CLOCK_UNAVAILABLE`] if either query fails or the frequency is zero.
pub fn seconds_from<C: PerformanceCounter + ?Sized>(counter: &C) -> f64 {
    match (counter.frequency(), counter.counter()) {
        (Some(frequency), Some(ticks)) if frequency > 0 => ticks as f64 / frequency as f64,
        _ => CLOCK_UNAVAILABLE,
    }
}

/// Measures elapsed time on a [`PerformanceCounter`].
#[derive(Debug, Clone)]
pub struct Stopwatch<'a, C: PerformanceCounter + ?Sized> {
    counter: &'a C,
    start_ticks: Option<u64>,
}

impl<'a, C: PerformanceCounter + ?Sized> Stopwatch<'a, C> {
    /// Starts a stopwatch at the current reading of `counter`.
    #[inline]
    pub fn start(counter: &'a C) -> Self {
        Self {
            counter,
            start_ticks: counter.counter(),
        }
    }

    /// Ticks elapsed since the start, or `None` if the counter failed.
    #[inline]
    pub fn elapsed_ticks(&self) -> Option<u64> {
        let start = self.start_ticks?;
        let now = self.counter.counter()?;
        Some(now.saturating_sub(start))
    }

    /// Seconds elapsed since the start, or `None` if the counter failed.
    #[inline]
    pub fn elapsed_secs_f64(&self) -> Option<f64> {
        let frequency = self.counter.frequency().filter(|&f| f > 0)?;
        self.elapsed_ticks()
            .map(|ticks| ticks as f64 / frequency as f64)
    }

    /// Milliseconds elapsed since the start.
    #[inline]
    pub fn elapsed_ms(&self) -> Option<f64> {
        self.elapsed_secs_f64().map(|secs| secs * 1000.0)
    }

    /// Returns the elapsed seconds and restarts the stopwatch.
    pub fn lap(&mut self) -> Option<f64> {
        let elapsed = self.elapsed_secs_f64();
        self.start_ticks = self.counter.counter();
        elapsed
    }
}
