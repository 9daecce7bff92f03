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

use khora_osal_core::{OsConfig, ProgramMemory, VirtualMemory};
use khora_osal_infra::{query_system_info, NativeVirtualMemory};
use std::sync::Arc;
use std::thread;

const RESERVE: usize = 64 * 1024 * 1024;

fn native_arena(preferred_base: Option<usize>) -> ProgramMemory<NativeVirtualMemory> {
    let info = query_system_info();
    ProgramMemory::new(NativeVirtualMemory::new(&info), preferred_base, RESERVE)
}

#[test]
fn test_native_arena_grows_in_place_and_keeps_data() {
    // --- 1. ARRANGE ---
    let memory = native_arena(None);
    let granularity = memory.granularity();

    // --- 2. ACT ---
    memory.grow(1).expect("initial growth");
    let base = memory.base().expect("arena base");
    // SAFETY: the first granule is committed.
    unsafe { base.as_ptr().write_bytes(0x5A, granularity) };

    memory.grow(8 * granularity + 1).expect("tail growth");

    // --- 3. ASSERT ---
    assert_eq!(memory.base(), Some(base), "the arena must never move");
    assert_eq!(memory.size(), 9 * granularity);
    // SAFETY: the whole committed prefix is readable and writable.
    unsafe {
        assert_eq!(*base.as_ptr(), 0x5A);
        assert_eq!(*base.as_ptr().add(granularity - 1), 0x5A);
        let last = base.as_ptr().add(memory.size() - 1);
        last.write(0xC3);
        assert_eq!(*last, 0xC3);
    }
}

#[test]
fn test_native_arena_honors_or_falls_back_from_preferred_base() {
    let config = OsConfig::default();
    let memory = native_arena(config.preferred_base);

    memory
        .grow(config.program_memory_size)
        .expect("growth at the preferred base or an OS-chosen one");

    let base = memory.base().expect("arena base").as_ptr() as usize;
    assert_eq!(base % memory.granularity(), 0);
    assert!(memory.size() >= config.program_memory_size);
}

#[test]
fn test_concurrent_native_growth_converges() {
    const THREADS: usize = 8;

    let memory = Arc::new(native_arena(None));
    let granularity = memory.granularity();
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let memory = Arc::clone(&memory);
            thread::spawn(move || {
                for step in 1..=8 {
                    memory
                        .grow((i + 1) * step * granularity)
                        .expect("concurrent growth");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("grower panicked");
    }

    assert_eq!(memory.size(), THREADS * 8 * granularity);
    let base = memory.base().expect("arena base");
    // SAFETY: every byte of the committed prefix is writable.
    unsafe { base.as_ptr().write_bytes(0, memory.size()) };
}

#[test]
fn test_growth_beyond_reservation_fails_cleanly() {
    let memory = native_arena(None);
    memory.grow(1).expect("initial growth");
    let before = memory.size();

    assert!(memory.grow(RESERVE * 2).is_err());
    assert_eq!(memory.size(), before);
    assert_eq!(memory.stats().failures, 1);
}

#[test]
fn test_native_backend_reports_system_granularity() {
    let info = query_system_info();
    let backend = NativeVirtualMemory::new(&info);
    assert_eq!(backend.granularity(), info.granularity);
}
