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

//! Platform facts and contracts shared by the native backends.
//!
//! The types here are plain data; `khora-osal-infra` fills them in by querying
//! the operating system.

pub mod clock;

use std::ops::Range;

pub use clock::{seconds_from, Stopwatch, CLOCK_UNAVAILABLE};

/// Immutable facts about the host, queried once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    /// Size of a virtual memory page in bytes.
    pub page_size: usize,
    /// Alignment boundary for address-space reservations. Equal to the page
    /// size on Unix, usually 64 KiB on Windows.
    pub granularity: usize,
    /// Address range spanned by image-backed (statically loaded) memory, when
    /// the platform can report it.
    pub static_memory: Option<Range<usize>>,
}

impl SystemInfo {
    /// Whether `address` falls inside statically loaded image memory.
    ///
    /// Always `false` when the range is unknown.
    pub fn is_static(&self, address: usize) -> bool {
        self.static_memory
            .as_ref()
            .is_some_and(|range| range.contains(&address))
    }
}

/// Address bounds of a thread's stack. Stacks grow downwards, so `base` is the
/// high end and `limit` the low end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds {
    /// Highest address of the stack (exclusive).
    pub base: usize,
    /// Lowest usable address of the stack.
    pub limit: usize,
}

impl StackBounds {
    /// Total size of the stack in bytes.
    pub fn size(&self) -> usize {
        self.base.saturating_sub(self.limit)
    }

    /// Whether `address` lies on this stack.
    pub fn contains(&self, address: usize) -> bool {
        address >= self.limit && address < self.base
    }
}

/// A monotonic high-resolution tick source.
///
/// Either query may fail on exotic platforms; callers map failures to
/// [`CLOCK_UNAVAILABLE`].
pub trait PerformanceCounter: Send + Sync {
    /// Ticks per second.
    fn frequency(&self) -> Option<u64>;
    /// Current tick count.
    fn counter(&self) -> Option<u64>;
}
