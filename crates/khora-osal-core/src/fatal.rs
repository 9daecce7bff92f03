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

//! Unrecoverable faults.
//!
//! The OSAL distinguishes two failure tiers. Recoverable failures are returned
//! as typed errors (see [`crate::error`]). Violations of an invariant the layer
//! relies on for memory safety go through [`fatal!`], which logs the fault and
//! aborts the whole process. Aborting (instead of panicking) guarantees that no
//! other thread keeps running on top of corrupted state.

/// Logs the message as an error, echoes it to stderr, then aborts the process.
///
/// This never returns. It is reserved for contract violations such as unlocking
/// a spinlock that is not held or the OS committing memory at the wrong address.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::fatal::abort_with(::core::format_args!($($arg)+))
    };
}

/// Implementation detail of [`fatal!`].
#[doc(hidden)]
#[cold]
#[inline(never)]
pub fn abort_with(args: std::fmt::Arguments<'_>) -> ! {
    log::error!("[fatal] {args}");
    // The logger may not be initialized, or may buffer; stderr is the last resort.
    eprintln!("[khora-osal] fatal: {args}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use crate::testing::{is_fault_child, run_fault_child};

    #[test]
    #[ignore = "fault child, driven by fatal_macro_aborts_process"]
    fn fault_child_fatal_macro() {
        if !is_fault_child() {
            return;
        }
        fatal!("deliberate fault {}", 42);
    }

    /// `fatal!` must terminate the process abnormally, not unwind.
    #[test]
    fn fatal_macro_aborts_process() {
        let status = run_fault_child("fatal::tests::fault_child_fatal_macro")
            .expect("failed to spawn fault child");
        assert!(!status.success(), "child should have aborted");
    }
}
