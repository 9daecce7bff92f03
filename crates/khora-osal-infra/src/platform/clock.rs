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

//! Native time sources.

use khora_osal_core::platform::{seconds_from, PerformanceCounter};
use std::sync::OnceLock;
use std::time::Instant;

/// Ticks per second of [`NativeCounter`].
const NANOS_PER_SECOND: u64 = 1_000_000_000;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// The monotonic high-resolution counter of the host
/// (`QueryPerformanceCounter`, `clock_gettime(CLOCK_MONOTONIC)`,
/// `mach_absolute_time`), in nanoseconds since first use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCounter;

impl PerformanceCounter for NativeCounter {
    fn frequency(&self) -> Option<u64> {
        Some(NANOS_PER_SECOND)
    }

    fn counter(&self) -> Option<u64> {
        u64::try_from(epoch().elapsed().as_nanos()).ok()
    }
}

/// Seconds on the monotonic clock, or a negative value if it is unavailable.
pub fn now_seconds() -> f64 {
    seconds_from(&NativeCounter)
}

/// Raw CPU cycle counter. Not synchronized across cores; use it for seeding
/// and coarse profiling only.
#[inline]
pub fn cycle_count() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: rdtsc is available on every x86_64 CPU.
        unsafe { core::arch::x86_64::_rdtsc() }
    }
    #[cfg(target_arch = "x86")]
    {
        // SAFETY: rdtsc is available on every CPU Rust targets for x86.
        unsafe { core::arch::x86::_rdtsc() }
    }
    #[cfg(target_arch = "aarch64")]
    {
        let ticks: u64;
        // SAFETY: cntvct_el0 is readable from user space on all supported OSes.
        unsafe { core::arch::asm!("mrs {}, cntvct_el0", out(reg) ticks, options(nomem, nostack)) };
        ticks
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
    {
        NativeCounter.counter().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn now_seconds_is_non_negative_and_non_decreasing() {
        let mut previous = now_seconds();
        assert!(previous >= 0.0);
        for _ in 0..1_000 {
            let now = now_seconds();
            assert!(now >= previous, "{now} < {previous}");
            previous = now;
        }
    }

    #[test]
    fn now_seconds_tracks_sleep() {
        let start = now_seconds();
        thread::sleep(Duration::from_millis(20));
        assert!(now_seconds() - start >= 0.02);
    }

    #[test]
    fn cycle_count_moves_forward() {
        let first = cycle_count();
        thread::sleep(Duration::from_millis(1));
        assert!(cycle_count() > first);
    }
}
