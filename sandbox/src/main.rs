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

// Khora OSAL Sandbox
// Headless frame loop: per-frame scratch memory, timing and a worker thread.

use std::alloc::Layout;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use khora_osal::prelude::*;
use khora_osal::osal_core::TemporaryAllocator;

/// How long the loop runs when no duration is given on the command line.
const DEFAULT_RUN_SECONDS: f64 = 2.0;

/// Vertices built in scratch memory every frame.
const QUAD_VERTICES: usize = 4;

#[allow(dead_code)]
#[derive(Clone, Copy, Debug)]
struct Vertex {
    position: [f32; 2],
    color: [f32; 3],
}

/// xorshift64*, seeded from the cycle counter.
struct Random(u64);

impl Random {
    fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn next(&mut self) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

/// Builds a rotated quad in the current context's allocator.
fn build_rotated_quad(center: [f32; 2], half: f32, angle: f32, color: [f32; 3]) -> Option<usize> {
    let layout = Layout::array::<Vertex>(QUAD_VERTICES).ok()?;
    let vertices = context::allocate(layout)?.cast::<Vertex>();
    let (sin, cos) = angle.sin_cos();
    let corners = [[-half, -half], [half, -half], [half, half], [-half, half]];
    for (i, [x, y]) in corners.into_iter().enumerate() {
        let vertex = Vertex {
            position: [center[0] + x * cos - y * sin, center[1] + x * sin + y * cos],
            color,
        };
        // SAFETY: the block holds QUAD_VERTICES vertices and `i` is below that.
        unsafe { vertices.as_ptr().add(i).write(vertex) };
    }
    Some(layout.size())
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let run_seconds = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<f64>()
            .with_context(|| format!("invalid duration '{arg}'"))?,
        None => DEFAULT_RUN_SECONDS,
    };

    let os = Os::init(OsConfig::default()).context("failed to initialize the OS layer")?;
    log::info!("{os:?}");

    // A background worker drawing from the program heap until told to stop.
    let stop = Arc::new(AtomicBool::new(false));
    let worker_bytes = Arc::new(AtomicU64::new(0));
    let mut worker = {
        let stop = Arc::clone(&stop);
        let worker_bytes = Arc::clone(&worker_bytes);
        Thread::named("sandbox-worker", move |info| {
            log::info!("Worker {} running on '{}'", info.id(), context::current().allocator().name());
            let layout = Layout::new::<[u8; 256]>();
            while !stop.load(Ordering::Acquire) {
                if context::allocate(layout).is_some() {
                    worker_bytes.fetch_add(layout.size() as u64, Ordering::Relaxed);
                }
                sleep(10);
            }
        })
    };
    worker.start();

    let heap_context = context::current();
    let frame_context = ExecutionContext::new(Arc::new(TemporaryAllocator));
    let mut random = Random::new(cycle_count());

    let start_time = now_seconds();
    anyhow::ensure!(start_time != CLOCK_UNAVAILABLE, "no monotonic clock on this host");
    let mut last_time = start_time;
    let mut frames = 0u64;
    let mut scratch_bytes = 0usize;

    while last_time - start_time < run_seconds {
        temporary::reset();
        context::install(frame_context.clone());

        let now = now_seconds();
        let delta = now - last_time;
        last_time = now;

        scratch_bytes += build_rotated_quad([-0.25, -0.25], 0.25, now as f32, [1.0, 0.0, 0.0])
            .unwrap_or_default();
        scratch_bytes += build_rotated_quad([-0.5, -0.5], 0.125, -(now as f32), [0.0, 1.0, 0.0])
            .unwrap_or_default();

        // Print some FPS samples every now and then.
        if random.next() % 4000 == 3 && delta > 0.0 {
            print(format_args!("{:.0} FPS\n", 1.0 / delta));
        }

        frames += 1;
        yield_now();
    }

    context::install(heap_context);
    stop.store(true, Ordering::Release);
    worker.join();

    let elapsed = now_seconds() - start_time;
    print(format_args!(
        "{frames} frames in {elapsed:.2}s ({:.0} FPS average), peak scratch {} bytes, {scratch_bytes} scratch bytes total\n",
        frames as f64 / elapsed.max(f64::EPSILON),
        temporary::high_water(),
    ));
    log::info!(
        "Worker allocated {} bytes; program memory is {:#x} bytes, {:?}",
        worker_bytes.load(Ordering::Relaxed),
        os.memory().size(),
        os.memory().stats()
    );
    Ok(())
}
