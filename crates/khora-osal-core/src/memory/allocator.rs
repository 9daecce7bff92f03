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

//! The allocator interface carried by the execution context.

use super::temporary;
use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// A source of raw memory.
///
/// Implementations must be usable from any thread. Returned pointers are
/// aligned to `layout.align()` and valid for `layout.size()` bytes.
pub trait Allocator: Send + Sync {
    /// Allocates a block for `layout`, or returns `None` when out of memory.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Gives a block back to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) on this allocator with
    /// the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Shared handle to an allocator, as stored in an execution context.
pub type AllocatorHandle = Arc<dyn Allocator>;

impl fmt::Debug for dyn Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Allocator({})", self.name())
    }
}

/// Pointer for zero-sized requests: non-null, aligned, never dereferenced.
fn dangling(layout: Layout) -> NonNull<u8> {
    // `align` is a non-zero power of two.
    NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling())
}

/// The process heap, through `std::alloc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return Some(dangling(layout));
        }
        // SAFETY: the layout has a non-zero size.
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: guaranteed by the caller.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Allocates from the calling thread's temporary storage.
///
/// Blocks live until the next [`temporary::reset`]; deallocation does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemporaryAllocator;

impl Allocator for TemporaryAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        temporary::allocate(layout)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}

    fn name(&self) -> &'static str {
        "temporary"
    }
}
