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

//! OS-backed blocking mutex.
//!
//! [`OsMutex`] is a thin layer over `std::sync::Mutex`, which parks waiting
//! threads in the kernel (futex on Linux, `SRWLOCK` on Windows, `os_unfair_lock`
//! on macOS). Unlock is tied to the guard, so releasing a mutex the caller does
//! not hold cannot be expressed.
//!
//! ## Abandoned acquisitions
//!
//! When a thread panics while holding the lock, the next acquisition is
//! *abandoned*: the previous owner never finished its critical section. The
//! lock treats this as a successful acquisition, logs a warning, and exposes
//! the fact through [`OsMutexGuard::was_abandoned`] so callers that care can
//! repair their state. Only the first acquisition after the panic reports it.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

/// A blocking mutex protecting a value of type `T`.
pub struct OsMutex<T> {
    inner: Mutex<T>,
}

impl<T> OsMutex<T> {
    /// Creates an unlocked mutex owning `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Blocks the calling thread until the lock is acquired.
    pub fn lock(&self) -> OsMutexGuard<'_, T> {
        match self.inner.lock() {
            Ok(guard) => OsMutexGuard {
                guard,
                abandoned: false,
            },
            Err(poisoned) => self.adopt_abandoned(poisoned),
        }
    }

    /// Acquires the lock if it is free, without blocking.
    pub fn try_lock(&self) -> Option<OsMutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(OsMutexGuard {
                guard,
                abandoned: false,
            }),
            Err(TryLockError::Poisoned(poisoned)) => Some(self.adopt_abandoned(poisoned)),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Consumes the mutex and returns the protected value.
    pub fn into_inner(self) -> T {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutable access without locking; the borrow checker proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn adopt_abandoned<'a>(
        &'a self,
        poisoned: PoisonError<MutexGuard<'a, T>>,
    ) -> OsMutexGuard<'a, T> {
        log::warn!(
            "OsMutex at {:p} acquired after its previous owner panicked; protected state may be inconsistent",
            self
        );
        self.inner.clear_poison();
        OsMutexGuard {
            guard: poisoned.into_inner(),
            abandoned: true,
        }
    }
}

impl<T: Default> Default for OsMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for OsMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsMutex").finish_non_exhaustive()
    }
}

/// Proof of ownership of an [`OsMutex`]. Dropping it unlocks the mutex.
#[must_use = "the mutex is unlocked as soon as the guard is dropped"]
pub struct OsMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    abandoned: bool,
}

impl<T> OsMutexGuard<'_, T> {
    /// Whether the previous owner panicked while holding the lock.
    pub fn was_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Releases the lock explicitly.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<T> Deref for OsMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OsMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: fmt::Debug> fmt::Debug for OsMutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsMutexGuard")
            .field("value", &*self.guard)
            .field("abandoned", &self.abandoned)
            .finish()
    }
}
