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

//! The per-thread execution context.
//!
//! Every thread has a current [`ExecutionContext`] holding the allocator the
//! engine should use on that thread. Threads created through the OSAL start
//! with a copy of their creator's context; other threads start with the
//! system allocator.

use crate::memory::allocator::{AllocatorHandle, SystemAllocator};
use std::alloc::Layout;
use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Per-thread state propagated from a thread to the threads it creates.
#[derive(Clone)]
pub struct ExecutionContext {
    allocator: AllocatorHandle,
}

impl ExecutionContext {
    /// Creates a context allocating through `allocator`.
    pub fn new(allocator: AllocatorHandle) -> Self {
        Self { allocator }
    }

    /// The allocator of this context.
    pub fn allocator(&self) -> &AllocatorHandle {
        &self.allocator
    }

    /// Whether both contexts share the same allocator instance.
    pub fn shares_allocator_with(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.allocator, &other.allocator)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Arc::new(SystemAllocator))
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<ExecutionContext> = RefCell::new(ExecutionContext::default());
}

/// A copy of the calling thread's current context.
pub fn current() -> ExecutionContext {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// Makes `context` current on the calling thread and returns the previous one.
pub fn install(context: ExecutionContext) -> ExecutionContext {
    log::trace!("Installing execution context with '{}' allocator", context.allocator.name());
    CURRENT.with(|cell| cell.replace(context))
}

/// Runs `f` with `context` installed, restoring the previous context after,
/// even if `f` panics.
pub fn with_context<R>(context: ExecutionContext, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<ExecutionContext>);

    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(previous) = self.0.take() {
                install(previous);
            }
        }
    }

    let _restore = Restore(Some(install(context)));
    f()
}

/// Allocates through the current context's allocator.
pub fn allocate(layout: Layout) -> Option<NonNull<u8>> {
    // Clone the handle so the allocator may itself consult the context.
    let allocator = CURRENT.with(|cell| Arc::clone(&cell.borrow().allocator));
    allocator.allocate(layout)
}

/// Frees a block through the current context's allocator.
///
/// # Safety
///
/// `ptr` must have been returned by [`allocate`] with the same `layout` while
/// the same allocator was current.
pub unsafe fn deallocate(ptr: NonNull<u8>, layout: Layout) {
    let allocator = CURRENT.with(|cell| Arc::clone(&cell.borrow().allocator));
    // SAFETY: guaranteed by the caller.
    unsafe { allocator.deallocate(ptr, layout) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::{Allocator, TemporaryAllocator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct CountingAllocator {
        calls: AtomicUsize,
    }

    impl Allocator for CountingAllocator {
        fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            SystemAllocator.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            // SAFETY: forwarded from the caller.
            unsafe { SystemAllocator.deallocate(ptr, layout) }
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn fresh_thread_uses_system_allocator() {
        thread::spawn(|| assert_eq!(current().allocator().name(), "system"))
            .join()
            .unwrap();
    }

    #[test]
    fn install_returns_previous_and_routes_allocations() {
        thread::spawn(|| {
            let counting = Arc::new(CountingAllocator::default());
            let previous = install(ExecutionContext::new(counting.clone()));
            assert_eq!(previous.allocator().name(), "system");

            let layout = Layout::new::<[u32; 4]>();
            let ptr = allocate(layout).expect("allocation");
            // SAFETY: allocated just above with the same layout and allocator.
            unsafe { deallocate(ptr, layout) };
            assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

            install(previous);
            assert_eq!(current().allocator().name(), "system");
        })
        .join()
        .unwrap();
    }

    #[test]
    fn with_context_restores_after_panic() {
        thread::spawn(|| {
            let outcome = std::panic::catch_unwind(|| {
                with_context(ExecutionContext::new(Arc::new(TemporaryAllocator)), || {
                    assert_eq!(current().allocator().name(), "temporary");
                    panic!("unwind through the scope");
                })
            });
            assert!(outcome.is_err());
            assert_eq!(current().allocator().name(), "system");
        })
        .join()
        .unwrap();
    }

    #[test]
    fn clones_share_the_allocator() {
        let context = ExecutionContext::default();
        assert!(context.shares_allocator_with(&context.clone()));
        assert!(!context.shares_allocator_with(&ExecutionContext::default()));
    }
}
