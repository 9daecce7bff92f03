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

//! Shared library loading and symbol lookup.

use khora_osal_core::OsError;
use libloading::Library;
use std::ffi::{c_void, OsStr};
use std::fmt;
use std::ptr::NonNull;

/// A shared library mapped into the process.
///
/// The library stays loaded until [`unload`](Self::unload) is called or the
/// handle is dropped. Symbols obtained from it must not outlive it.
pub struct DynamicLibrary {
    library: Library,
    path: String,
}

impl DynamicLibrary {
    /// Maps the library at `path` (or found by the platform search rules when
    /// `path` is a bare file name).
    pub fn load(path: impl AsRef<OsStr>) -> Result<Self, OsError> {
        let path = path.as_ref();
        let display = path.to_string_lossy().into_owned();

        // SAFETY: loading runs the library's initializers. Callers choose which
        // libraries to trust; this layer does not vet them.
        let library = unsafe { Library::new(path) }.map_err(|e| OsError::LibraryLoad {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        log::debug!("Loaded dynamic library '{display}'");
        Ok(Self {
            library,
            path: display,
        })
    }

    /// The path the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Address of the exported symbol `name`, or `None` if it is missing or null.
    pub fn lookup(&self, name: &str) -> Option<NonNull<c_void>> {
        // SAFETY: the symbol is read as an opaque address, never called here.
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) };
        match symbol {
            Ok(symbol) => NonNull::new(*symbol),
            Err(err) => {
                log::trace!("Symbol '{name}' not found in '{}': {err}", self.path);
                None
            }
        }
    }

    /// Looks up `name` as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the symbol's real signature
    /// and calling convention, and the returned pointer must not be called
    /// after the library is unloaded.
    pub unsafe fn lookup_fn<F: Copy>(&self, name: &str) -> Option<F> {
        // SAFETY: forwarded to the caller.
        unsafe { self.library.get::<F>(name.as_bytes()) }
            .ok()
            .map(|symbol| *symbol)
    }

    /// Unmaps the library.
    pub fn unload(self) {
        let path = self.path;
        if let Err(err) = self.library.close() {
            log::warn!("Failed to unload dynamic library '{path}': {err}");
        } else {
            log::debug!("Unloaded dynamic library '{path}'");
        }
    }
}

impl fmt::Debug for DynamicLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
