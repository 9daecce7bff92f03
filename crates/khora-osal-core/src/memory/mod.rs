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

//! Memory contracts and the allocators built on them.
//!
//! The layering is:
//!
//! - [`VirtualMemory`]: the contract a native backend implements to reserve
//!   address space and commit pages in it.
//! - [`arena::ProgramMemory`]: one growable, never-relocated region on top of a
//!   backend.
//! - [`heap::ProgramHeap`]: a bump heap carved from the arena.
//! - [`temporary`]: per-thread scratch memory reset every frame.
//! - [`allocator`]: the [`Allocator`](allocator::Allocator) trait through which
//!   the execution context hands memory to the engine.

pub mod allocator;
pub mod arena;
pub mod heap;
pub mod temporary;

use crate::error::MemoryError;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

/// Native virtual-memory operations used by [`arena::ProgramMemory`].
///
/// Reserving claims address space without backing it; committing backs a
/// sub-range of a reservation with readable and writable memory.
pub trait VirtualMemory: Send + Sync {
    /// Alignment boundary for reservations and commits, a power of two.
    fn granularity(&self) -> usize;

    /// Reserves `size` bytes of address space, preferably at `hint`.
    ///
    /// Returning an address other than the hint is allowed.
    fn reserve(&self, hint: Option<usize>, size: usize) -> Result<NonNull<u8>, MemoryError>;

    /// Commits `size` bytes starting at `address`, which lies inside a reservation.
    ///
    /// Returns the address the OS actually committed; callers treat anything
    /// other than `address` as a broken reservation.
    fn commit(&self, address: NonNull<u8>, size: usize) -> Result<NonNull<u8>, MemoryError>;

    /// Returns a whole reservation to the OS.
    ///
    /// # Safety
    ///
    /// `base` and `size` must describe a reservation obtained from
    /// [`reserve`](Self::reserve) on this backend, and no live references into it
    /// may remain.
    unsafe fn release(&self, base: NonNull<u8>, size: usize);
}

impl<V: VirtualMemory + ?Sized> VirtualMemory for std::sync::Arc<V> {
    fn granularity(&self) -> usize {
        (**self).granularity()
    }

    fn reserve(&self, hint: Option<usize>, size: usize) -> Result<NonNull<u8>, MemoryError> {
        (**self).reserve(hint, size)
    }

    fn commit(&self, address: NonNull<u8>, size: usize) -> Result<NonNull<u8>, MemoryError> {
        (**self).commit(address, size)
    }

    unsafe fn release(&self, base: NonNull<u8>, size: usize) {
        // SAFETY: forwarded verbatim; the caller upholds the contract.
        unsafe { (**self).release(base, size) }
    }
}

/// Rounds `value` up to the next multiple of `granularity` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
pub fn align_up(value: usize, granularity: usize) -> Option<usize> {
    debug_assert!(granularity.is_power_of_two());
    let mask = granularity - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Whether `value` is a multiple of `granularity` (a power of two).
#[inline]
pub fn is_aligned(value: usize, granularity: usize) -> bool {
    value & (granularity - 1) == 0
}

// --- Arena statistics ---

/// Live counters describing the activity of a program memory arena.
///
/// Updated with relaxed atomics by the arena; readable from any thread.
#[derive(Debug, Default)]
pub struct ArenaCounters {
    grow_requests: AtomicU64,
    satisfied_without_commit: AtomicU64,
    commits: AtomicU64,
    bytes_committed: AtomicU64,
    failures: AtomicU64,
}

impl ArenaCounters {
    pub(crate) fn record_request(&self) {
        self.grow_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fast_path(&self) {
        self.satisfied_without_commit.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, bytes: usize) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.bytes_committed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> ArenaStats {
        ArenaStats {
            grow_requests: self.grow_requests.load(Ordering::Relaxed),
            satisfied_without_commit: self.satisfied_without_commit.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            bytes_committed: self.bytes_committed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of [`ArenaCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Total number of `grow` calls.
    pub grow_requests: u64,
    /// Calls that found the arena already large enough.
    pub satisfied_without_commit: u64,
    /// Successful commits (including the initial reservation).
    pub commits: u64,
    /// Total bytes committed over the arena's lifetime.
    pub bytes_committed: u64,
    /// Calls that returned an error.
    pub failures: u64,
}
