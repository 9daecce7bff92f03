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

//! Host facts queried once at start-up.

use khora_osal_core::SystemInfo;
use std::ops::Range;

/// Fallback when the OS does not report a page size.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// Queries page size, allocation granularity and the range of image-backed memory.
pub fn query_system_info() -> SystemInfo {
    let (page_size, granularity) = page_size_and_granularity();
    let info = SystemInfo {
        page_size,
        granularity,
        static_memory: static_memory_range(),
    };
    log::debug!(
        "System info: page size {:#x}, granularity {:#x}, static memory {:x?}",
        info.page_size,
        info.granularity,
        info.static_memory
    );
    info
}

#[cfg(unix)]
fn page_size_and_granularity() -> (usize, usize) {
    // SAFETY: sysconf has no preconditions.
    let reported = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = usize::try_from(reported)
        .ok()
        .filter(|size| size.is_power_of_two())
        .unwrap_or(DEFAULT_PAGE_SIZE);
    // mmap places reservations on page boundaries.
    (page_size, page_size)
}

#[cfg(windows)]
fn page_size_and_granularity() -> (usize, usize) {
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    // SAFETY: SYSTEM_INFO is plain data and GetSystemInfo fills it in.
    let info = unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info
    };
    let page_size = info.dwPageSize as usize;
    let granularity = info.dwAllocationGranularity as usize;
    if page_size.is_power_of_two() && granularity.is_power_of_two() {
        (page_size, granularity)
    } else {
        (DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE)
    }
}

#[cfg(not(any(unix, windows)))]
fn page_size_and_granularity() -> (usize, usize) {
    (DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE)
}

/// Spans every mapping backed by the running executable.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn static_memory_range() -> Option<Range<usize>> {
    let exe = std::env::current_exe().ok()?;
    let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
    image_range_from_maps(&maps, exe.to_str()?)
}

/// Walks the address space and spans every `MEM_IMAGE` region.
#[cfg(windows)]
fn static_memory_range() -> Option<Range<usize>> {
    use windows_sys::Win32::System::Memory::{VirtualQuery, MEMORY_BASIC_INFORMATION, MEM_IMAGE};

    let mut range: Option<Range<usize>> = None;
    let mut address = 0usize;
    loop {
        // SAFETY: MEMORY_BASIC_INFORMATION is plain data; VirtualQuery accepts
        // any address and reports failure past the end of user space.
        let (written, mbi) = unsafe {
            let mut mbi: MEMORY_BASIC_INFORMATION = std::mem::zeroed();
            let written = VirtualQuery(
                address as *const core::ffi::c_void,
                &mut mbi,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            );
            (written, mbi)
        };
        if written == 0 || mbi.RegionSize == 0 {
            break;
        }

        let start = mbi.BaseAddress as usize;
        let end = start + mbi.RegionSize;
        if mbi.Type == MEM_IMAGE {
            range = Some(match range {
                Some(r) => r.start..end,
                None => start..end,
            });
        }
        match address.checked_add(mbi.RegionSize) {
            Some(next) => address = next,
            None => break,
        }
    }
    range
}

#[cfg(not(any(target_os = "linux", target_os = "android", windows)))]
fn static_memory_range() -> Option<Range<usize>> {
    None
}

/// Parses `/proc/<pid>/maps` text and returns the span of the lines whose
/// pathname is `image`.
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
fn image_range_from_maps(maps: &str, image: &str) -> Option<Range<usize>> {
    maps.lines()
        .filter(|line| line.split_whitespace().nth(5) == Some(image))
        .filter_map(|line| {
            let (start, end) = line.split_whitespace().next()?.split_once('-')?;
            let start = usize::from_str_radix(start, 16).ok()?;
            let end = usize::from_str_radix(end, 16).ok()?;
            Some(start..end)
        })
        .reduce(|acc, r| acc.start.min(r.start)..acc.end.max(r.end))
}
