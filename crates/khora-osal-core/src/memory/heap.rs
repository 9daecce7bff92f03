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

//! A bump heap carved out of the program memory arena.
//!
//! Allocation claims the next aligned range with a compare-and-swap on the
//! heap cursor and grows the arena when the range runs past its committed
//! size. Nothing is ever freed; the whole heap lives as long as the arena.

use super::allocator::Allocator;
use super::arena::ProgramMemory;
use super::{align_up, VirtualMemory};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free bump allocator over a [`ProgramMemory`].
#[derive(Debug)]
pub struct ProgramHeap<V: VirtualMemory> {
    memory: Arc<ProgramMemory<V>>,
    /// Bytes claimed from the arena base.
    cursor: AtomicUsize,
    allocations: AtomicU64,
}

impl<V: VirtualMemory> ProgramHeap<V> {
    /// Creates a heap starting at the base of `memory`.
    pub fn new(memory: Arc<ProgramMemory<V>>) -> Self {
        Self {
            memory,
            cursor: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
        }
    }

    /// Claims a block for `layout`. Returns `None` when the arena cannot grow.
    pub fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let base = match self.memory.base() {
            Some(base) => base,
            None => {
                self.memory.grow(layout.size().max(1)).ok()?;
                self.memory.base()?
            }
        };
        let base_addr = base.as_ptr() as usize;

        let mut cursor = self.cursor.load(Ordering::Acquire);
        loop {
            let start = align_up(base_addr + cursor, layout.align())?;
            let end = start.checked_add(layout.size())?;
            let claimed = end - base_addr;

            if claimed > self.memory.size() {
                if let Err(err) = self.memory.grow(claimed) {
                    log::trace!("Program heap cannot claim {claimed:#x} bytes: {err}");
                    return None;
                }
            }

            match self.cursor.compare_exchange_weak(
                cursor,
                claimed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.allocations.fetch_add(1, Ordering::Relaxed);
                    return NonNull::new(start as *mut u8);
                }
                Err(actual) => cursor = actual,
            }
        }
    }

    /// Bytes claimed so far, alignment padding included.
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Number of successful allocations.
    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// The arena this heap draws from.
    pub fn memory(&self) -> &Arc<ProgramMemory<V>> {
        &self.memory
    }
}

impl<V: VirtualMemory + 'static> Allocator for ProgramHeap<V> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        ProgramHeap::allocate(self, layout)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}

    fn name(&self) -> &'static str {
        "program_heap"
    }
}
