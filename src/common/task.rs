// Copyright © 2021 strogg developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Fork-join fan-out used at the engine's data-parallel points: PVS row
//! decompression, per-surface light recomposition and per-slot entity
//! interpolation.
//!
//! The pool is driven only from the main thread. Work is split into
//! contiguous chunks, one per worker, and the calling thread blocks until
//! every chunk completes; there is no work stealing and no cross-frame
//! queueing.

use std::{num::NonZeroUsize, thread};

pub struct TaskPool {
    workers: usize,
}

impl TaskPool {
    /// Creates a pool sized to the machine, capped to keep the main thread's
    /// core free.
    pub fn new() -> TaskPool {
        let parallelism = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        TaskPool {
            workers: parallelism.saturating_sub(1).max(1),
        }
    }

    pub fn with_workers(workers: usize) -> TaskPool {
        TaskPool {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `f` over mutable chunks of `items` in parallel.
    ///
    /// `f` receives the chunk and the index of the first element in it. The
    /// call returns once every chunk has been processed.
    pub fn for_each_chunk<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(&mut [T], usize) + Sync,
    {
        if items.is_empty() {
            return;
        }

        let chunk_size = items.len().div_ceil(self.workers);

        // small batches aren't worth the spawn overhead
        if self.workers == 1 || items.len() < 64 {
            f(items, 0);
            return;
        }

        thread::scope(|scope| {
            for (chunk_id, chunk) in items.chunks_mut(chunk_size).enumerate() {
                let f = &f;
                scope.spawn(move || f(chunk, chunk_id * chunk_size));
            }
        });
    }

    /// Maps `f` over `0..count` in parallel, collecting results in order.
    pub fn map_indexed<R, F>(&self, count: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync,
    {
        let mut out: Vec<Option<R>> = (0..count).map(|_| None).collect();
        self.for_each_chunk(&mut out, |chunk, base| {
            for (i, slot) in chunk.iter_mut().enumerate() {
                *slot = Some(f(base + i));
            }
        });
        out.into_iter().map(|r| r.unwrap()).collect()
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        TaskPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_each_chunk_covers_all() {
        let pool = TaskPool::with_workers(4);
        let mut items: Vec<u32> = vec![0; 1000];
        pool.for_each_chunk(&mut items, |chunk, base| {
            for (i, item) in chunk.iter_mut().enumerate() {
                *item = (base + i) as u32;
            }
        });
        for (i, item) in items.iter().enumerate() {
            assert_eq!(*item, i as u32);
        }
    }

    #[test]
    fn test_map_indexed_order() {
        let pool = TaskPool::with_workers(3);
        let out = pool.map_indexed(257, |i| i * 2);
        assert_eq!(out[0], 0);
        assert_eq!(out[256], 512);
    }
}
