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

//! Defines the hierarchy of recoverable error types for the OS abstraction layer.
//!
//! Invariant violations are not represented here; they abort through
//! [`fatal!`](crate::fatal!).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// An error raised while reserving or committing virtual memory.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Rounding the requested size up to the allocation granularity overflowed.
    #[error("requested size {requested:#x} overflows when aligned to granularity {granularity:#x}")]
    SizeOverflow {
        /// The size that was asked for.
        requested: usize,
        /// The granularity it was being rounded to.
        granularity: usize,
    },
    /// The operating system refused to reserve the address range.
    #[error("failed to reserve {size:#x} bytes of address space: {source}")]
    ReserveFailed {
        /// Number of bytes of address space requested.
        size: usize,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The operating system refused to back a reserved range with memory.
    #[error("failed to commit {size:#x} bytes at {address:#x}: {source}")]
    CommitFailed {
        /// Start of the range that was being committed.
        address: usize,
        /// Number of bytes requested.
        size: usize,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The arena's reserved address space cannot hold the requested size.
    #[error("program memory reservation exhausted: {requested:#x} bytes requested, {reserved:#x} reserved")]
    ReservationExhausted {
        /// Total committed size that was requested.
        requested: usize,
        /// Size of the address range reserved up front.
        reserved: usize,
    },
}

/// An error raised while loading or saving an [`OsConfig`](crate::OsConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("configuration file '{path}': {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The configuration text is not valid JSON for `OsConfig`.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// A field holds a value the layer cannot work with.
    #[error("invalid configuration value for '{field}': {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable explanation.
        reason: String,
    },
}

/// Top-level error of the OS abstraction layer.
#[derive(Debug, Error)]
pub enum OsError {
    /// Program memory could not be set up or grown.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A shared library could not be mapped into the process.
    #[error("failed to load dynamic library '{path}': {reason}")]
    LibraryLoad {
        /// Path or name that was passed to the loader.
        path: String,
        /// Loader diagnostic.
        reason: String,
    },
    /// The platform C runtime is required by configuration but unavailable.
    #[error("C runtime library unavailable: {reason}")]
    RuntimeLibraryUnavailable {
        /// What was missing.
        reason: String,
    },
}
