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

//! Native [`VirtualMemory`] backend.
//!
//! On Unix a reservation is an inaccessible anonymous mapping and committing
//! re-protects part of it as read/write. On Windows reservation and commit map
//! directly onto `VirtualAlloc` with `MEM_RESERVE` and `MEM_COMMIT`.

use khora_osal_core::memory::VirtualMemory;
use khora_osal_core::{MemoryError, SystemInfo};
use std::io;
use std::ptr::NonNull;

/// Reserves and commits pages through the operating system.
#[derive(Debug, Clone, Copy)]
pub struct NativeVirtualMemory {
    granularity: usize,
}

impl NativeVirtualMemory {
    /// Creates a backend aligned to the granularity reported by `info`.
    pub fn new(info: &SystemInfo) -> Self {
        Self {
            granularity: info.granularity,
        }
    }
}

fn reserve_failed(size: usize) -> MemoryError {
    MemoryError::ReserveFailed {
        size,
        source: io::Error::last_os_error(),
    }
}

fn commit_failed(address: NonNull<u8>, size: usize) -> MemoryError {
    MemoryError::CommitFailed {
        address: address.as_ptr() as usize,
        size,
        source: io::Error::last_os_error(),
    }
}

#[cfg(unix)]
impl VirtualMemory for NativeVirtualMemory {
    fn granularity(&self) -> usize {
        self.granularity
    }

    fn reserve(&self, hint: Option<usize>, size: usize) -> Result<NonNull<u8>, MemoryError> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

        let hint = hint.unwrap_or(0) as *mut libc::c_void;
        // SAFETY: an anonymous PROT_NONE mapping without MAP_FIXED never
        // replaces existing mappings; the hint is only advisory.
        let address = unsafe { libc::mmap(hint, size, libc::PROT_NONE, flags, -1, 0) };
        if address == libc::MAP_FAILED {
            return Err(reserve_failed(size));
        }
        NonNull::new(address.cast::<u8>()).ok_or_else(|| reserve_failed(size))
    }

    fn commit(&self, address: NonNull<u8>, size: usize) -> Result<NonNull<u8>, MemoryError> {
        // SAFETY: the range lies inside a reservation made by `reserve`, which
        // nothing else maps.
        let result = unsafe {
            libc::mprotect(
                address.as_ptr().cast::<libc::c_void>(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if result != 0 {
            return Err(commit_failed(address, size));
        }
        Ok(address)
    }

    unsafe fn release(&self, base: NonNull<u8>, size: usize) {
        // SAFETY: the caller guarantees `base`/`size` describe a whole reservation.
        if unsafe { libc::munmap(base.as_ptr().cast::<libc::c_void>(), size) } != 0 {
            log::warn!(
                "munmap of {size:#x} bytes at {:p} failed: {}",
                base,
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(windows)]
impl VirtualMemory for NativeVirtualMemory {
    fn granularity(&self) -> usize {
        self.granularity
    }

    fn reserve(&self, hint: Option<usize>, size: usize) -> Result<NonNull<u8>, MemoryError> {
        use windows_sys::Win32::System::Memory::{VirtualAlloc, MEM_RESERVE, PAGE_NOACCESS};

        let reserve_at = |address: usize| {
            // SAFETY: reserving never touches memory; a taken range makes the call fail.
            unsafe {
                VirtualAlloc(
                    address as *const core::ffi::c_void,
                    size,
                    MEM_RESERVE,
                    PAGE_NOACCESS,
                )
            }
        };

        let mut address = reserve_at(hint.unwrap_or(0));
        if address.is_null() && hint.is_some() {
            // The preferred range is taken; let the OS choose.
            address = reserve_at(0);
        }
        NonNull::new(address.cast::<u8>()).ok_or_else(|| reserve_failed(size))
    }

    fn commit(&self, address: NonNull<u8>, size: usize) -> Result<NonNull<u8>, MemoryError> {
        use windows_sys::Win32::System::Memory::{VirtualAlloc, MEM_COMMIT, PAGE_READWRITE};

        // SAFETY: the range lies inside a reservation made by `reserve`.
        let result = unsafe {
            VirtualAlloc(
                address.as_ptr().cast::<core::ffi::c_void>(),
                size,
                MEM_COMMIT,
                PAGE_READWRITE,
            )
        };
        NonNull::new(result.cast::<u8>()).ok_or_else(|| commit_failed(address, size))
    }

    unsafe fn release(&self, base: NonNull<u8>, _size: usize) {
        use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

        // SAFETY: the caller guarantees `base` is the start of a reservation.
        if unsafe { VirtualFree(base.as_ptr().cast::<core::ffi::c_void>(), 0, MEM_RELEASE) } == 0 {
            log::warn!(
                "VirtualFree at {:p} failed: {}",
                base,
                io::Error::last_os_error()
            );
        }
    }
}
