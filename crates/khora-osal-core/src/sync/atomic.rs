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

//! Compare-and-swap over 8, 16, 32 and 64-bit words and booleans.
//!
//! Every operation compiles down to the hardware compare-exchange instruction
//! (`lock cmpxchg` on x86, LL/SC or CAS on ARM). The location is written only
//! when it held `old`, and the return value tells whether that happened.
//!
//! All operations use `SeqCst`. Callers that need ordering across several
//! fields must still reason about it themselves: a CAS orders only the word it
//! operates on relative to other sequentially consistent operations.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Atomic types that support a boolean-result compare-and-swap.
pub trait CompareAndSwap {
    /// The plain value stored in the atomic.
    type Value: Copy;

    /// Store `new` if the current value equals `old`. Returns `true` on success.
    fn cas(&self, new: Self::Value, old: Self::Value) -> bool;
}

macro_rules! impl_compare_and_swap {
    ($($atomic:ty => $value:ty),+ $(,)?) => {
        $(
            impl CompareAndSwap for $atomic {
                type Value = $value;

                #[inline]
                fn cas(&self, new: $value, old: $value) -> bool {
                    self.compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                }
            }
        )+
    };
}

impl_compare_and_swap! {
    AtomicU8 => u8,
    AtomicU16 => u16,
    AtomicU32 => u32,
    AtomicU64 => u64,
    AtomicBool => bool,
}

/// 8-bit compare-and-swap.
#[inline]
pub fn compare_and_swap_8(target: &AtomicU8, new: u8, old: u8) -> bool {
    target.cas(new, old)
}

/// 16-bit compare-and-swap.
#[inline]
pub fn compare_and_swap_16(target: &AtomicU16, new: u16, old: u16) -> bool {
    target.cas(new, old)
}

/// 32-bit compare-and-swap.
#[inline]
pub fn compare_and_swap_32(target: &AtomicU32, new: u32, old: u32) -> bool {
    target.cas(new, old)
}

/// 64-bit compare-and-swap.
#[inline]
pub fn compare_and_swap_64(target: &AtomicU64, new: u64, old: u64) -> bool {
    target.cas(new, old)
}

/// Boolean compare-and-swap. `AtomicBool` has the layout of a `u8` holding 0 or 1,
/// so this is the 8-bit primitive restricted to those two values.
#[inline]
pub fn compare_and_swap_bool(target: &AtomicBool, new: bool, old: bool) -> bool {
    target.cas(new, old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn swap_succeeds_only_on_expected_value() {
        let word = AtomicU32::new(7);
        assert!(!compare_and_swap_32(&word, 9, 8));
        assert_eq!(word.load(Ordering::SeqCst), 7, "failed swap must not write");
        assert!(compare_and_swap_32(&word, 9, 7));
        assert_eq!(word.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn every_width_reports_success_and_failure() {
        let a = AtomicU8::new(u8::MAX);
        assert!(compare_and_swap_8(&a, 0, u8::MAX));
        assert!(!compare_and_swap_8(&a, 1, u8::MAX));

        let b = AtomicU16::new(0xBEEF);
        assert!(compare_and_swap_16(&b, 0xCAFE, 0xBEEF));
        assert_eq!(b.load(Ordering::SeqCst), 0xCAFE);

        let c = AtomicU64::new(u64::MAX - 1);
        assert!(compare_and_swap_64(&c, u64::MAX, u64::MAX - 1));
        assert!(!compare_and_swap_64(&c, 0, u64::MAX - 1));
        assert_eq!(c.load(Ordering::SeqCst), u64::MAX);
    }

    #[test]
    fn bool_swap_behaves_like_a_flag() {
        let flag = AtomicBool::new(false);
        assert!(compare_and_swap_bool(&flag, true, false));
        assert!(!compare_and_swap_bool(&flag, true, false));
        assert!(compare_and_swap_bool(&flag, false, true));
        assert!(!flag.load(Ordering::SeqCst));
    }

    /// Threads increment a shared counter purely through CAS retries. Every
    /// successful transition must be counted exactly once: no lost updates.
    #[test]
    fn concurrent_cas_loses_no_updates() {
        const THREADS: usize = 8;
        const INCREMENTS: u64 = 10_000;

        let counter = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let mut successes = 0u64;
                    for _ in 0..INCREMENTS {
                        loop {
                            let current = counter.load(Ordering::SeqCst);
                            if compare_and_swap_64(&counter, current + 1, current) {
                                successes += 1;
                                break;
                            }
                        }
                    }
                    successes
                })
            })
            .collect();

        let total: u64 = handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked"))
            .sum();

        assert_eq!(total, THREADS as u64 * INCREMENTS);
        assert_eq!(counter.load(Ordering::SeqCst), total);
    }

    /// Many threads race to move the same word from 0 to their own id.
    /// Exactly one wins and the word holds the winner's value.
    #[test]
    fn single_transition_has_exactly_one_winner() {
        const THREADS: u16 = 16;

        let word = Arc::new(AtomicU16::new(0));
        let handles: Vec<_> = (1..=THREADS)
            .map(|id| {
                let word = Arc::clone(&word);
                thread::spawn(move || compare_and_swap_16(&word, id, 0).then_some(id))
            })
            .collect();

        let winners: Vec<u16> = handles
            .into_iter()
            .filter_map(|h| h.join().expect("worker panicked"))
            .collect();

        assert_eq!(winners.len(), 1, "winners: {winners:?}");
        assert_eq!(word.load(Ordering::SeqCst), winners[0]);
    }
}
