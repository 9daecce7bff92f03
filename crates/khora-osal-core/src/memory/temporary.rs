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

//! Per-thread temporary storage.
//!
//! Each thread may own one scratch buffer. Allocations bump a cursor through
//! it and are never freed individually; [`reset`] rewinds the cursor, typically
//! once per frame. Blocks handed out before a reset must not be used after it.

use super::align_up;
use std::alloc::Layout;
use std::cell::RefCell;
use std::ptr::NonNull;

/// Alignment of the scratch buffer itself.
const BUFFER_ALIGN: usize = 16;

struct TemporaryStorage {
    base: NonNull<u8>,
    layout: Layout,
    used: usize,
    high_water: usize,
}

impl TemporaryStorage {
    fn new(capacity: usize) -> Option<Self> {
        let layout = Layout::from_size_align(capacity.max(1), BUFFER_ALIGN).ok()?;
        // SAFETY: the layout has a non-zero size.
        let base = NonNull::new(unsafe { std::alloc::alloc(layout) })?;
        Some(Self {
            base,
            layout,
            used: 0,
            high_water: 0,
        })
    }

    fn capacity(&self) -> usize {
        self.layout.size()
    }

    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let base = self.base.as_ptr() as usize;
        let start = align_up(base + self.used, layout.align())?;
        let end = start.checked_add(layout.size())?;
        if end > base + self.capacity() {
            return None;
        }
        self.used = end - base;
        self.high_water = self.high_water.max(self.used);
        // SAFETY: `start - base` is within the buffer, checked above.
        let ptr = unsafe { self.base.as_ptr().add(start - base) };
        NonNull::new(ptr)
    }
}

impl Drop for TemporaryStorage {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { std::alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

thread_local! {
    static STORAGE: RefCell<Option<TemporaryStorage>> = const { RefCell::new(None) };
}

/// Gives the calling thread a scratch buffer of `capacity` bytes.
///
/// Returns `false` if the thread already has one (it is kept) or the buffer
/// could not be allocated.
pub fn init(capacity: usize) -> bool {
    STORAGE.with(|cell| {
        let mut storage = cell.borrow_mut();
        if storage.is_some() {
            log::debug!("Temporary storage already initialized on this thread");
            return false;
        }
        match TemporaryStorage::new(capacity) {
            Some(buffer) => {
                log::trace!("Temporary storage of {capacity} bytes initialized");
                *storage = Some(buffer);
                true
            }
            None => {
                log::warn!("Failed to allocate {capacity} bytes of temporary storage");
                false
            }
        }
    })
}

/// Rewinds the calling thread's scratch buffer. All outstanding blocks become invalid.
pub fn reset() {
    STORAGE.with(|cell| {
        if let Some(storage) = cell.borrow_mut().as_mut() {
            storage.used = 0;
        }
    });
}

/// Allocates from the calling thread's scratch buffer.
///
/// Returns `None` when the thread has no buffer or it is full.
pub fn allocate(layout: Layout) -> Option<NonNull<u8>> {
    STORAGE.with(|cell| cell.borrow_mut().as_mut()?.allocate(layout))
}

/// Bytes currently in use on this thread.
pub fn used() -> usize {
    STORAGE.with(|cell| cell.borrow().as_ref().map_or(0, |s| s.used))
}

/// Largest number of bytes ever in use at once on this thread.
pub fn high_water() -> usize {
    STORAGE.with(|cell| cell.borrow().as_ref().map_or(0, |s| s.high_water))
}

/// Size of this thread's scratch buffer, 0 when uninitialized.
pub fn capacity() -> usize {
    STORAGE.with(|cell| cell.borrow().as_ref().map_or(0, TemporaryStorage::capacity))
}

/// Whether the calling thread has a scratch buffer.
pub fn is_initialized() -> bool {
    STORAGE.with(|cell| cell.borrow().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Thread-local state leaks between tests on the same thread, so every test
    /// runs on a fresh one.
    fn on_fresh_thread(f: impl FnOnce() + Send + 'static) {
        thread::spawn(f).join().expect("test thread panicked");
    }

    #[test]
    fn uninitialized_thread_has_no_storage() {
        on_fresh_thread(|| {
            assert!(!is_initialized());
            assert_eq!(capacity(), 0);
            assert!(allocate(Layout::new::<u32>()).is_none());
            reset();
        });
    }

    #[test]
    fn init_happens_once() {
        on_fresh_thread(|| {
            assert!(init(512));
            assert!(!init(4096));
            assert_eq!(capacity(), 512);
        });
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        on_fresh_thread(|| {
            init(1024);
            let a = allocate(Layout::from_size_align(3, 1).unwrap()).unwrap();
            let b = allocate(Layout::from_size_align(8, 8).unwrap()).unwrap();
            let c = allocate(Layout::from_size_align(32, 32).unwrap()).unwrap();

            let (a, b, c) = (a.as_ptr() as usize, b.as_ptr() as usize, c.as_ptr() as usize);
            assert_eq!(b % 8, 0);
            assert_eq!(c % 32, 0);
            assert!(a + 3 <= b);
            assert!(b + 8 <= c);
        });
    }

    #[test]
    fn full_buffer_refuses_and_reset_rewinds() {
        on_fresh_thread(|| {
            init(64);
            let block = Layout::from_size_align(48, 16).unwrap();
            let first = allocate(block).expect("first block");
            assert!(allocate(block).is_none());
            assert_eq!(used(), 48);

            reset();
            assert_eq!(used(), 0);
            assert_eq!(high_water(), 48);
            assert_eq!(allocate(block), Some(first));
        });
    }

    #[test]
    fn storage_is_per_thread() {
        on_fresh_thread(|| {
            init(128);
            allocate(Layout::new::<u64>()).unwrap();
            thread::spawn(|| assert!(!is_initialized()))
                .join()
                .unwrap();
            assert_eq!(used(), 8);
        });
    }
}
