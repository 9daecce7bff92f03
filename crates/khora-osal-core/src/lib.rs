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

//! # Khora OSAL Core
//!
//! Foundational crate of the OS abstraction layer. It holds the contracts the
//! native backends implement (virtual memory, performance counters), the
//! portable synchronization primitives, the per-thread execution context and
//! the program memory arena logic.
//!
//! Nothing in here talks to the operating system directly except through the
//! standard library; raw system calls live in `khora-osal-infra`.

#![warn(missing_docs)]

#[macro_use]
pub mod fatal;

pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod platform;
pub mod sync;
pub mod testing;

pub use config::{OsConfig, RuntimeLibraryPolicy};
pub use context::ExecutionContext;
pub use error::{ConfigError, MemoryError, OsError};
pub use memory::arena::ProgramMemory;
pub use memory::allocator::{Allocator, AllocatorHandle, SystemAllocator, TemporaryAllocator};
pub use memory::heap::ProgramHeap;
pub use memory::VirtualMemory;
pub use platform::{PerformanceCounter, StackBounds, Stopwatch, SystemInfo, CLOCK_UNAVAILABLE};
pub use sync::{OsMutex, OsMutexGuard, Spinlock, SpinlockGuard};
