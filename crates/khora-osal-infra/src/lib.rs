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

//! # Khora OSAL Infra
//!
//! Native backends of the OS abstraction layer. Everything that issues a raw
//! system call lives here, behind the contracts of `khora-osal-core`:
//!
//! - [`platform::virtual_memory`]: address-space reservation and commit.
//! - [`platform::system_info`]: page size, granularity and image ranges.
//! - [`platform::dylib`] and [`platform::runtime_library`]: shared libraries.
//! - [`platform::clock`], [`platform::stdout`], [`platform::stack`].
//! - [`thread`]: thread lifecycle with execution-context propagation.

#![warn(missing_docs)]

pub mod platform;
pub mod thread;

pub use platform::clock::{cycle_count, now_seconds, NativeCounter};
pub use platform::dylib::DynamicLibrary;
pub use platform::runtime_library::RuntimeLibrary;
pub use platform::stack::stack_bounds;
pub use platform::stdout::{print, write_stdout, StdoutWriter};
pub use platform::system_info::query_system_info;
pub use platform::virtual_memory::NativeVirtualMemory;
pub use thread::{current_thread_id, sleep, yield_now, Thread, ThreadInfo};
