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

//! The platform C runtime as an optional capability table.
//!
//! The runtime is loaded once and its memory routines are resolved one by
//! one. A missing routine is simply absent; callers branch on presence.

use super::dylib::DynamicLibrary;
use khora_osal_core::OsError;
use std::ffi::{c_int, c_void};

/// Where the C runtime lives on this platform.
#[cfg(windows)]
pub const RUNTIME_LIBRARY_PATH: &str = "msvcrt.dll";
/// Where the C runtime lives on this platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const RUNTIME_LIBRARY_PATH: &str = "libc.so.6";
/// Where the C runtime lives on this platform.
#[cfg(target_vendor = "apple")]
pub const RUNTIME_LIBRARY_PATH: &str = "/usr/lib/libSystem.B.dylib";
/// Where the C runtime lives on this platform.
#[cfg(not(any(windows, target_os = "linux", target_os = "android", target_vendor = "apple")))]
pub const RUNTIME_LIBRARY_PATH: &str = "libc.so";

/// `memcpy(dst, src, n)`.
pub type MemcpyFn = unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> *mut c_void;
/// `memcmp(a, b, n)`.
pub type MemcmpFn = unsafe extern "C" fn(*const c_void, *const c_void, usize) -> c_int;
/// `memset(dst, value, n)`.
pub type MemsetFn = unsafe extern "C" fn(*mut c_void, c_int, usize) -> *mut c_void;

/// The loaded C runtime and the routines it provides.
#[derive(Debug)]
pub struct RuntimeLibrary {
    library: DynamicLibrary,
    memcpy: Option<MemcpyFn>,
    memcmp: Option<MemcmpFn>,
    memset: Option<MemsetFn>,
}

/// Which runtime routines were resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeCapabilities {
    /// `memcpy` is available.
    pub memcpy: bool,
    /// `memcmp` is available.
    pub memcmp: bool,
    /// `memset` is available.
    pub memset: bool,
}

impl RuntimeLibrary {
    /// Loads the platform C runtime from [`RUNTIME_LIBRARY_PATH`].
    pub fn load() -> Result<Self, OsError> {
        Self::load_from(RUNTIME_LIBRARY_PATH)
    }

    /// Loads a C runtime from an explicit path.
    pub fn load_from(path: &str) -> Result<Self, OsError> {
        let library = DynamicLibrary::load(path)?;
        // SAFETY: the aliases above match the C standard signatures of these
        // routines, and the pointers live as long as `library` in this struct.
        let runtime = unsafe {
            Self {
                memcpy: library.lookup_fn::<MemcpyFn>("memcpy"),
                memcmp: library.lookup_fn::<MemcmpFn>("memcmp"),
                memset: library.lookup_fn::<MemsetFn>("memset"),
                library,
            }
        };
        log::info!(
            "C runtime '{}' loaded with {:?}",
            runtime.library.path(),
            runtime.capabilities()
        );
        Ok(runtime)
    }

    /// Which routines are available.
    pub fn capabilities(&self) -> RuntimeCapabilities {
        RuntimeCapabilities {
            memcpy: self.memcpy.is_some(),
            memcmp: self.memcmp.is_some(),
            memset: self.memset.is_some(),
        }
    }

    /// Copies `src` into the start of `dst` through the runtime's `memcpy`.
    ///
    /// Returns `false` without copying when `memcpy` is unavailable.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is shorter than `src`.
    pub fn copy(&self, dst: &mut [u8], src: &[u8]) -> bool {
        assert!(dst.len() >= src.len(), "destination too short for memcpy");
        let Some(memcpy) = self.memcpy else {
            return false;
        };
        // SAFETY: both slices are valid for `src.len()` bytes and cannot overlap,
        // since one is borrowed mutably.
        unsafe { memcpy(dst.as_mut_ptr().cast(), src.as_ptr().cast(), src.len()) };
        true
    }

    /// Compares two equally long byte slices through the runtime's `memcmp`.
    ///
    /// Returns `None` when `memcmp` is unavailable or the lengths differ.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Option<std::cmp::Ordering> {
        let memcmp = self.memcmp.filter(|_| a.len() == b.len())?;
        // SAFETY: both slices are valid for `a.len()` bytes.
        let result = unsafe { memcmp(a.as_ptr().cast(), b.as_ptr().cast(), a.len()) };
        Some(result.cmp(&0))
    }

    /// Fills `dst` with `value` through the runtime's `memset`.
    ///
    /// Returns `false` without writing when `memset` is unavailable.
    pub fn fill(&self, dst: &mut [u8], value: u8) -> bool {
        let Some(memset) = self.memset else {
            return false;
        };
        // SAFETY: `dst` is valid for writes of its whole length.
        unsafe { memset(dst.as_mut_ptr().cast(), c_int::from(value), dst.len()) };
        true
    }

    /// The underlying library handle.
    pub fn library(&self) -> &DynamicLibrary {
        &self.library
    }
}
