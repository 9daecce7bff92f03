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

//! The public face of the Khora OS abstraction layer.
//!
//! [`Os::init`] builds the process-wide context once: it queries the host,
//! reserves the program memory arena, installs the arena-backed heap as the
//! calling thread's allocator and binds the C runtime according to the
//! configuration. Everything else is reached through the [`prelude`].

use khora_osal_core::context::{self, ExecutionContext};
use khora_osal_core::memory::temporary;
use khora_osal_core::{
    OsConfig, OsError, ProgramHeap, ProgramMemory, RuntimeLibraryPolicy, SystemInfo,
};
use khora_osal_infra::platform::runtime_library::{RuntimeCapabilities, RuntimeLibrary};
use khora_osal_infra::{query_system_info, NativeVirtualMemory};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

pub use khora_osal_core as osal_core;
pub use khora_osal_infra as osal_infra;

/// Everything an application usually needs from the OS layer.
pub mod prelude {
    pub use crate::Os;
    pub use khora_osal_core::context::{self, ExecutionContext};
    pub use khora_osal_core::memory::temporary;
    pub use khora_osal_core::sync::{
        compare_and_swap_16, compare_and_swap_32, compare_and_swap_64, compare_and_swap_8,
        compare_and_swap_bool, OsMutex, OsMutexGuard, Spinlock, SpinlockGuard,
    };
    pub use khora_osal_core::{fatal, Allocator, OsConfig, OsError, StackBounds, CLOCK_UNAVAILABLE};
    pub use khora_osal_infra::{
        current_thread_id, cycle_count, now_seconds, print, sleep, stack_bounds, write_stdout,
        yield_now, DynamicLibrary, StdoutWriter, Thread, ThreadInfo,
    };
}

/// The arena type backing the program heap.
pub type NativeProgramMemory = ProgramMemory<NativeVirtualMemory>;
/// The heap installed by [`Os::init`].
pub type NativeProgramHeap = ProgramHeap<NativeVirtualMemory>;

/// Process-wide OS context.
///
/// Construct it once, early, on the main thread, and pass it by reference.
/// Threads created afterwards from that thread inherit the heap allocator.
pub struct Os {
    config: OsConfig,
    system: SystemInfo,
    memory: Arc<NativeProgramMemory>,
    heap: Arc<NativeProgramHeap>,
    runtime: Option<RuntimeLibrary>,
    context: ExecutionContext,
}

impl Os {
    /// Initializes the OS layer with `config`.
    pub fn init(config: OsConfig) -> Result<Self, OsError> {
        config.validate()?;

        let system = query_system_info();
        let memory = Arc::new(ProgramMemory::from_config(
            NativeVirtualMemory::new(&system),
            &config,
        ));
        memory.grow(config.program_memory_size)?;

        // Last fallible step; nothing thread-local is installed before it.
        let runtime = bind_runtime(
            config.runtime_library,
            config.runtime_library_path.as_deref(),
        )?;

        let heap = Arc::new(ProgramHeap::new(Arc::clone(&memory)));
        let context = ExecutionContext::new(heap.clone());
        context::install(context.clone());
        if !temporary::init(config.temporary_storage_size) {
            log::warn!(
                "Temporary storage of {:#x} bytes not installed, thread keeps {:#x} bytes",
                config.temporary_storage_size,
                temporary::capacity()
            );
        }

        log::info!(
            "OS layer initialized: {:#x} bytes of program memory at {:?}, granularity {:#x}, C runtime {}",
            memory.size(),
            memory.base(),
            system.granularity,
            if runtime.is_some() { "bound" } else { "not bound" }
        );

        Ok(Self {
            config,
            system,
            memory,
            heap,
            runtime,
            context,
        })
    }

    /// Initializes the OS layer from a JSON configuration file.
    pub fn init_from_file(path: impl AsRef<Path>) -> Result<Self, OsError> {
        Self::init(OsConfig::from_file(path)?)
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &OsConfig {
        &self.config
    }

    /// Host facts queried at init.
    pub fn system(&self) -> &SystemInfo {
        &self.system
    }

    /// Size of a virtual memory page.
    pub fn page_size(&self) -> usize {
        self.system.page_size
    }

    /// Allocation granularity of the arena.
    pub fn granularity(&self) -> usize {
        self.system.granularity
    }

    /// The program memory arena.
    pub fn memory(&self) -> &Arc<NativeProgramMemory> {
        &self.memory
    }

    /// The arena-backed heap.
    pub fn heap(&self) -> &Arc<NativeProgramHeap> {
        &self.heap
    }

    /// The execution context installed on the initializing thread.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// The bound C runtime, if any.
    pub fn runtime(&self) -> Option<&RuntimeLibrary> {
        self.runtime.as_ref()
    }

    /// Which C runtime routines are in use. All `false` when none is bound.
    pub fn runtime_capabilities(&self) -> RuntimeCapabilities {
        self.runtime
            .as_ref()
            .map(RuntimeLibrary::capabilities)
            .unwrap_or_default()
    }

    /// Ensures at least `new_size` bytes of program memory are committed.
    pub fn grow_program_memory(&self, new_size: usize) -> Result<(), OsError> {
        Ok(self.memory.grow(new_size)?)
    }

    /// Copies `src` into the start of `dst`.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is shorter than `src`.
    pub fn copy_memory(&self, dst: &mut [u8], src: &[u8]) {
        let copied = self.runtime.as_ref().is_some_and(|rt| rt.copy(dst, src));
        if !copied {
            dst[..src.len()].copy_from_slice(src);
        }
    }

    /// Lexicographically compares two byte slices.
    pub fn compare_memory(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.runtime
            .as_ref()
            .and_then(|rt| rt.compare(a, b))
            .unwrap_or_else(|| a.cmp(b))
    }

    /// Fills `dst` with `value`.
    pub fn set_memory(&self, dst: &mut [u8], value: u8) {
        let filled = self.runtime.as_ref().is_some_and(|rt| rt.fill(dst, value));
        if !filled {
            dst.fill(value);
        }
    }
}

impl std::fmt::Debug for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Os")
            .field("system", &self.system)
            .field("memory", &self.memory)
            .field("runtime", &self.runtime_capabilities())
            .finish_non_exhaustive()
    }
}

fn bind_runtime(
    policy: RuntimeLibraryPolicy,
    path: Option<&str>,
) -> Result<Option<RuntimeLibrary>, OsError> {
    let load = || match path {
        Some(path) => RuntimeLibrary::load_from(path),
        None => RuntimeLibrary::load(),
    };
    match policy {
        RuntimeLibraryPolicy::Disabled => Ok(None),
        RuntimeLibraryPolicy::Optional => match load() {
            Ok(runtime) => Ok(Some(runtime)),
            Err(err) => {
                log::warn!("C runtime unavailable, using built-in memory routines: {err}");
                Ok(None)
            }
        },
        RuntimeLibraryPolicy::Required => {
            let runtime = load().map_err(|err| OsError::RuntimeLibraryUnavailable {
                reason: err.to_string(),
            })?;
            let caps = runtime.capabilities();
            if caps.memcpy && caps.memcmp && caps.memset {
                Ok(Some(runtime))
            } else {
                Err(OsError::RuntimeLibraryUnavailable {
                    reason: format!("missing memory routines: {caps:?}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(runtime_library: RuntimeLibraryPolicy) -> OsConfig {
        OsConfig {
            program_memory_size: 256 * 1024,
            address_space_reserve: 16 * 1024 * 1024,
            preferred_base: None,
            temporary_storage_size: 64 * 1024,
            runtime_library,
            runtime_library_path: None,
        }
    }

    #[test]
    fn memory_helpers_fall_back_without_runtime() {
        std::thread::spawn(|| {
            let os = Os::init(small_config(RuntimeLibraryPolicy::Disabled)).expect("init");
            assert!(os.runtime().is_none());
            assert_eq!(os.runtime_capabilities(), RuntimeCapabilities::default());

            let mut buffer = [0u8; 6];
            os.copy_memory(&mut buffer, b"osal");
            assert_eq!(&buffer[..4], b"osal");
            os.set_memory(&mut buffer[4..], 1);
            assert_eq!(buffer, *b"osal\x01\x01");
            assert_eq!(os.compare_memory(b"a", b"b"), Ordering::Less);
            assert_eq!(os.compare_memory(b"ab", b"a"), Ordering::Greater);
        })
        .join()
        .expect("init thread panicked");
    }

    #[test]
    fn failed_runtime_binding_leaves_thread_state_untouched() {
        std::thread::spawn(|| {
            let mut config = small_config(RuntimeLibraryPolicy::Required);
            config.runtime_library_path = Some("khora_osal_no_such_runtime".into());

            let result = Os::init(config);

            assert!(matches!(
                result,
                Err(OsError::RuntimeLibraryUnavailable { .. })
            ));
            assert_eq!(context::current().allocator().name(), "system");
            assert!(!temporary::is_initialized());
        })
        .join()
        .expect("init thread panicked");
    }

    #[test]
    fn optional_runtime_falls_back_on_missing_path() {
        std::thread::spawn(|| {
            let mut config = small_config(RuntimeLibraryPolicy::Optional);
            config.runtime_library_path = Some("khora_osal_no_such_runtime".into());

            let os = Os::init(config).expect("optional runtime never fails init");
            assert!(os.runtime().is_none());
            assert_eq!(context::current().allocator().name(), "program_heap");
        })
        .join()
        .expect("init thread panicked");
    }

    #[test]
    fn existing_temporary_storage_is_kept() {
        std::thread::spawn(|| {
            assert!(temporary::init(4096));

            let os = Os::init(small_config(RuntimeLibraryPolicy::Disabled)).expect("init");

            assert_eq!(os.config().temporary_storage_size, 64 * 1024);
            assert_eq!(temporary::capacity(), 4096);
        })
        .join()
        .expect("init thread panicked");
    }

    #[test]
    fn invalid_config_is_rejected_before_touching_memory() {
        let mut config = small_config(RuntimeLibraryPolicy::Disabled);
        config.address_space_reserve = 1;
        assert!(matches!(Os::init(config), Err(OsError::Config(_))));
    }
}
