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

//! Thread lifecycle.
//!
//! A [`Thread`] is created stopped. It captures the creator's execution
//! context and temporary-storage size at creation, and the new OS thread
//! installs both before running the user procedure. A creator without
//! temporary storage hands down [`DEFAULT_TEMPORARY_STORAGE_SIZE`].
//! [`Thread::start`] returns once the new thread has reported its native id.

use crossbeam_channel::Sender;
use khora_osal_core::config::DEFAULT_TEMPORARY_STORAGE_SIZE;
use khora_osal_core::context::{self, ExecutionContext};
use khora_osal_core::memory::temporary;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::Duration;

/// Native id of an OS thread.
pub type ThreadId = u64;

type ThreadProc = Box<dyn FnOnce(&ThreadInfo) + Send + 'static>;

/// What a thread procedure knows about the thread running it.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    id: ThreadId,
    name: Option<String>,
}

impl ThreadInfo {
    /// Native id of the running thread.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Name given at creation, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

enum State {
    Created(ThreadProc),
    Running(JoinHandle<()>),
    Finished,
}

/// An OS thread running a procedure with the creator's execution context.
pub struct Thread {
    id: ThreadId,
    name: Option<String>,
    initial_context: ExecutionContext,
    temporary_capacity: usize,
    state: State,
}

impl Thread {
    /// Creates a stopped thread that will run `proc`.
    pub fn new(proc: impl FnOnce(&ThreadInfo) + Send + 'static) -> Self {
        Self {
            id: 0,
            name: None,
            initial_context: context::current(),
            temporary_capacity: match temporary::capacity() {
                0 => DEFAULT_TEMPORARY_STORAGE_SIZE,
                capacity => capacity,
            },
            state: State::Created(Box::new(proc)),
        }
    }

    /// Creates a stopped, named thread that will run `proc`.
    pub fn named(name: impl Into<String>, proc: impl FnOnce(&ThreadInfo) + Send + 'static) -> Self {
        let mut thread = Self::new(proc);
        thread.name = Some(name.into());
        thread
    }

    /// Native id, 0 until the thread is started.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Name given at creation, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The context the new thread will start with.
    pub fn initial_context(&self) -> &ExecutionContext {
        &self.initial_context
    }

    /// Whether [`start`](Self::start) has been called.
    pub fn is_started(&self) -> bool {
        !matches!(self.state, State::Created(_))
    }

    /// Spawns the OS thread and waits until it reports its native id.
    ///
    /// Starting an already started thread does nothing. Failing to create the
    /// OS thread aborts the process.
    pub fn start(&mut self) {
        let proc = match std::mem::replace(&mut self.state, State::Finished) {
            State::Created(proc) => proc,
            other => {
                self.state = other;
                log::warn!("Thread {} is already started", self.id);
                return;
            }
        };

        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let context = self.initial_context.clone();
        let capacity = self.temporary_capacity;
        let name = self.name.clone();

        let mut builder = std::thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        let handle = match builder.spawn(move || trampoline(proc, context, capacity, name, started_tx)) {
            Ok(handle) => handle,
            Err(err) => khora_osal_core::fatal!("failed creating thread: {err}"),
        };

        self.id = match started_rx.recv() {
            Ok(id) => id,
            Err(_) => khora_osal_core::fatal!("thread exited before reporting its id"),
        };
        self.state = State::Running(handle);
        log::trace!("Started thread {} ({:?})", self.id, self.name);
    }

    /// Blocks until the thread finishes and releases its OS handle.
    ///
    /// Joining a thread that was never started only logs a warning.
    pub fn join(mut self) {
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Running(handle) => {
                // A panicking procedure aborts the process, so this only fails
                // if the runtime itself broke.
                if handle.join().is_err() {
                    log::error!("Thread {} terminated abnormally", self.id);
                }
            }
            State::Created(_) => log::warn!("Joining thread {:?} that was never started", self.name),
            State::Finished => {}
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if matches!(self.state, State::Running(_)) {
            log::warn!("Thread {} dropped without join; detaching it", self.id);
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("started", &self.is_started())
            .field("context", &self.initial_context)
            .finish()
    }
}

fn trampoline(
    proc: ThreadProc,
    context: ExecutionContext,
    temporary_capacity: usize,
    name: Option<String>,
    started: Sender<ThreadId>,
) {
    // A fresh thread has no storage yet; allocation failure is logged by init.
    temporary::init(temporary_capacity);
    context::install(context);

    let info = ThreadInfo {
        id: current_thread_id(),
        name,
    };
    // The starter blocks on this; it cannot have gone away.
    let _ = started.send(info.id);
    drop(started);

    if panic::catch_unwind(AssertUnwindSafe(|| proc(&info))).is_err() {
        khora_osal_core::fatal!("thread {} ({:?}) panicked", info.id, info.name);
    }
}

/// Native id of the calling thread.
pub fn current_thread_id() -> ThreadId {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        // SAFETY: gettid has no preconditions and cannot fail.
        unsafe { libc::syscall(libc::SYS_gettid) as ThreadId }
    }
    #[cfg(target_vendor = "apple")]
    {
        let mut id: u64 = 0;
        // SAFETY: a null thread means the calling thread; `id` is valid for writes.
        unsafe { libc::pthread_threadid_np(0 as libc::pthread_t, &mut id) };
        id
    }
    #[cfg(windows)]
    {
        // SAFETY: no preconditions.
        ThreadId::from(unsafe { windows_sys::Win32::System::Threading::GetCurrentThreadId() })
    }
    #[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple", windows)))]
    {
        // SAFETY: no preconditions.
        unsafe { libc::pthread_self() as ThreadId }
    }
}

/// Suspends the calling thread for at least `ms` milliseconds.
pub fn sleep(ms: u32) {
    std::thread::sleep(Duration::from_millis(u64::from(ms)));
}

/// Offers the rest of the calling thread's time slice to other threads.
pub fn yield_now() {
    std::thread::yield_now();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstarted_thread_has_no_id() {
        let thread = Thread::named("idle", |_| {});
        assert_eq!(thread.id(), 0);
        assert!(!thread.is_started());
        assert_eq!(thread.name(), Some("idle"));
        thread.join();
    }

    #[test]
    fn current_thread_id_is_stable_and_distinct() {
        let here = current_thread_id();
        assert_ne!(here, 0);
        assert_eq!(here, current_thread_id());

        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }
}
