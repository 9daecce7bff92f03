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

//! Test doubles and harnesses shared by the OSAL crates.
//!
//! - [`SimulatedVirtualMemory`]: a [`VirtualMemory`] backend that hands out
//!   fake addresses, records every operation and can be told to fail.
//! - [`ManualCounter`]: a [`PerformanceCounter`] driven by the test.
//! - [`run_fault_child`]: re-runs a single test of the current test binary in a
//!   child process, for code paths that abort the process.

use crate::error::MemoryError;
use crate::memory::{is_aligned, VirtualMemory};
use crate::platform::PerformanceCounter;
use std::io;
use std::process::{Command, ExitStatus, Stdio};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

// --- Fault harness ---

/// Environment variable marking a process as a fault child.
pub const FAULT_CHILD_ENV: &str = "KHORA_OSAL_FAULT_CHILD";

/// Whether the current process was launched by [`run_fault_child`].
///
/// Fault-child tests are `#[ignore]`d and return immediately unless this is
/// true, so running the suite with `--include-ignored` stays harmless.
pub fn is_fault_child() -> bool {
    std::env::var_os(FAULT_CHILD_ENV).is_some()
}

/// Runs exactly one test of the current test binary in a child process and
/// returns its exit status. Most callers expect the child to abort; the
/// child's stdout and stderr are discarded.
pub fn run_fault_child(test_name: &str) -> io::Result<ExitStatus> {
    let exe = std::env::current_exe()?;
    Command::new(exe)
        .args([test_name, "--exact", "--ignored", "--nocapture", "--test-threads=1"])
        .env(FAULT_CHILD_ENV, "1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

// --- Simulated virtual memory ---

/// Base of the fake address space handed out when hints are ignored.
const SIMULATED_ADDRESS_START: usize = 0x4000_0000;

#[derive(Debug, Default)]
struct SimulatedState {
    next_address: usize,
    reservations: Vec<(usize, usize)>,
    commits: Vec<(usize, usize)>,
    released: Vec<(usize, usize)>,
}

/// A [`VirtualMemory`] backend that never touches real memory.
///
/// Addresses it returns must not be dereferenced.
#[derive(Debug)]
pub struct SimulatedVirtualMemory {
    granularity: usize,
    honor_hints: bool,
    fail_reserve: AtomicBool,
    fail_commit: AtomicBool,
    misplace_commits: AtomicBool,
    state: Mutex<SimulatedState>,
}

impl SimulatedVirtualMemory {
    /// Creates a backend with the given granularity that honors address hints.
    pub fn new(granularity: usize) -> Self {
        assert!(granularity.is_power_of_two());
        Self {
            granularity,
            honor_hints: true,
            fail_reserve: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            misplace_commits: AtomicBool::new(false),
            state: Mutex::new(SimulatedState {
                next_address: SIMULATED_ADDRESS_START,
                ..SimulatedState::default()
            }),
        }
    }

    /// Makes the backend place reservations wherever it likes.
    pub fn ignoring_hints(mut self) -> Self {
        self.honor_hints = false;
        self
    }

    /// Makes subsequent reservations fail (or succeed again).
    pub fn set_fail_reserve(&self, fail: bool) {
        self.fail_reserve.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent commits fail (or succeed again).
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes commits report an address one granule past the requested one.
    pub fn set_misplace_commits(&self, misplace: bool) {
        self.misplace_commits.store(misplace, Ordering::SeqCst);
    }

    /// Every successful commit, in order, as `(address, size)`.
    pub fn commits(&self) -> Vec<(usize, usize)> {
        self.state().commits.clone()
    }

    /// Live reservations as `(address, size)`.
    pub fn reservations(&self) -> Vec<(usize, usize)> {
        self.state().reservations.clone()
    }

    /// Released reservations as `(address, size)`.
    pub fn released(&self) -> Vec<(usize, usize)> {
        self.state().released.clone()
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn simulated_error(what: &str) -> io::Error {
        io::Error::new(io::ErrorKind::OutOfMemory, format!("simulated {what} failure"))
    }
}

impl VirtualMemory for SimulatedVirtualMemory {
    fn granularity(&self) -> usize {
        self.granularity
    }

    fn reserve(&self, hint: Option<usize>, size: usize) -> Result<NonNull<u8>, MemoryError> {
        if self.fail_reserve.load(Ordering::SeqCst) {
            return Err(MemoryError::ReserveFailed {
                size,
                source: Self::simulated_error("reserve"),
            });
        }

        let mut state = self.state();
        let address = match hint {
            Some(hint) if self.honor_hints && hint != 0 => hint,
            _ => {
                let address = state.next_address;
                state.next_address = address + size + self.granularity;
                address
            }
        };
        debug_assert!(is_aligned(address, self.granularity));
        state.reservations.push((address, size));

        NonNull::new(address as *mut u8).ok_or_else(|| MemoryError::ReserveFailed {
            size,
            source: Self::simulated_error("reserve"),
        })
    }

    fn commit(&self, address: NonNull<u8>, size: usize) -> Result<NonNull<u8>, MemoryError> {
        let start = address.as_ptr() as usize;
        let commit_error = |source| MemoryError::CommitFailed {
            address: start,
            size,
            source,
        };

        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(commit_error(Self::simulated_error("commit")));
        }

        let mut state = self.state();
        let inside = state
            .reservations
            .iter()
            .any(|&(base, len)| start >= base && start + size <= base + len);
        if !inside {
            return Err(commit_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "commit outside of any reservation",
            )));
        }
        state.commits.push((start, size));

        let returned = if self.misplace_commits.load(Ordering::SeqCst) {
            start + self.granularity
        } else {
            start
        };
        Ok(NonNull::new(returned as *mut u8).unwrap_or(address))
    }

    unsafe fn release(&self, base: NonNull<u8>, size: usize) {
        let base = base.as_ptr() as usize;
        let mut state = self.state();
        state.reservations.retain(|&(b, _)| b != base);
        state.released.push((base, size));
    }
}

// --- Manual performance counter ---

/// A [`PerformanceCounter`] whose ticks are advanced by hand.
#[derive(Debug)]
pub struct ManualCounter {
    frequency: Option<u64>,
    ticks: AtomicU64,
    available: AtomicBool,
}

impl ManualCounter {
    /// Creates a counter running at `frequency` ticks per second, starting at 0.
    pub fn new(frequency: u64) -> Self {
        Self {
            frequency: Some(frequency),
            ticks: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Creates a counter whose frequency query fails, like a platform without
    /// a high-resolution timer.
    pub fn without_frequency() -> Self {
        Self {
            frequency: None,
            ticks: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Advances the counter.
    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Makes the counter query fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl PerformanceCounter for ManualCounter {
    fn frequency(&self) -> Option<u64> {
        self.frequency
    }

    fn counter(&self) -> Option<u64> {
        self.available
            .load(Ordering::SeqCst)
            .then(|| self.ticks.load(Ordering::SeqCst))
    }
}
