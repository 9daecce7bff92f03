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

//! Synchronization primitives: compare-and-swap atomics, a busy-wait spinlock
//! built on them, and an OS-backed blocking mutex.

pub mod atomic;
pub mod mutex;
pub mod spinlock;

pub use atomic::{
    compare_and_swap_16, compare_and_swap_32, compare_and_swap_64, compare_and_swap_8,
    compare_and_swap_bool, CompareAndSwap,
};
pub use mutex::{OsMutex, OsMutexGuard};
pub use spinlock::{Spinlock, SpinlockGuard};
