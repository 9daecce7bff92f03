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

//! Stack bounds of the calling thread.

use khora_osal_core::StackBounds;

/// Bounds of the calling thread's stack, or `None` if the platform cannot
/// report them.
pub fn stack_bounds() -> Option<StackBounds> {
    let bounds = native_stack_bounds()?;
    (bounds.base > bounds.limit).then_some(bounds)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn native_stack_bounds() -> Option<StackBounds> {
    use std::mem::MaybeUninit;

    // SAFETY: pthread_getattr_np initializes `attr` on success, which is
    // destroyed before returning; the out-parameters are plain data.
    unsafe {
        let mut attr = MaybeUninit::<libc::pthread_attr_t>::uninit();
        if libc::pthread_getattr_np(libc::pthread_self(), attr.as_mut_ptr()) != 0 {
            return None;
        }
        let mut attr = attr.assume_init();

        let mut address: *mut libc::c_void = std::ptr::null_mut();
        let mut size: libc::size_t = 0;
        let result = libc::pthread_attr_getstack(&attr, &mut address, &mut size);
        libc::pthread_attr_destroy(&mut attr);

        if result != 0 || address.is_null() {
            return None;
        }
        let limit = address as usize;
        Some(StackBounds {
            base: limit + size,
            limit,
        })
    }
}

#[cfg(target_vendor = "apple")]
fn native_stack_bounds() -> Option<StackBounds> {
    // SAFETY: both queries only read the calling thread's descriptor.
    let (base, size) = unsafe {
        let thread = libc::pthread_self();
        (
            libc::pthread_get_stackaddr_np(thread) as usize,
            libc::pthread_get_stacksize_np(thread),
        )
    };
    Some(StackBounds {
        base,
        limit: base.checked_sub(size)?,
    })
}

#[cfg(windows)]
fn native_stack_bounds() -> Option<StackBounds> {
    use windows_sys::Win32::System::Threading::GetCurrentThreadStackLimits;

    let mut low = 0usize;
    let mut high = 0usize;
    // SAFETY: both out-parameters are valid for writes.
    unsafe { GetCurrentThreadStackLimits(&mut low, &mut high) };
    Some(StackBounds {
        base: high,
        limit: low,
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple", windows)))]
fn native_stack_bounds() -> Option<StackBounds> {
    None
}
