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

//! Raw writes to the process standard output.

use std::fmt;
use std::io::Write;

/// Writes `bytes` to stdout and flushes. Failures are ignored.
pub fn write_stdout(bytes: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = stdout.write_all(bytes).and_then(|()| stdout.flush()) {
        log::trace!("stdout write of {} bytes failed: {err}", bytes.len());
    }
}

/// Prints formatted arguments to stdout.
pub fn print(args: fmt::Arguments<'_>) {
    match args.as_str() {
        Some(text) => write_stdout(text.as_bytes()),
        None => write_stdout(args.to_string().as_bytes()),
    }
}

/// A [`fmt::Write`] sink forwarding to [`write_stdout`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutWriter;

impl fmt::Write for StdoutWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_stdout(s.as_bytes());
        Ok(())
    }
}
