//! Worker pool for parallel chunk transforms
//!
//! A fixed set of OS threads pulls compress/decompress jobs from a bounded
//! queue. `submit` blocks when the queue is full (backpressure caps memory
//! use on very large archives) and `drain` blocks until the whole batch has
//! completed, returning results sorted by sequence number. Consuming results
//! in sequence order keeps archive output byte-identical for any thread
//! count, which the builder relies on.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::codec::{self, CompressionLevel, CompressionMethod};
use crate::error::CodecError;

/// Hard cap on pool size when the caller asks for hardware concurrency.
pub const MAX_POOL_THREADS: usize = 32;

/// Bounded queue depth, per worker thread.
pub const QUEUE_DEPTH_PER_WORKER: usize = 4;

/// What to do with a work item's payload.
#[derive(Debug, Clone, Copy)]
pub enum JobKind {
    /// Compress the payload; fall back to storing it raw when compression
    /// would not shrink it (or when the source opted out of compression).
    Compress {
        level: CompressionLevel,
        allow_compression: bool,
    },
    /// Decompress (or, for raw chunks, length-check) the payload.
    Decompress {
        method: CompressionMethod,
        expected_len: usize,
    },
}

/// One chunk transform submitted to the pool.
pub struct WorkItem {
    pub seq: u64,
    pub payload: Vec<u8>,
    pub job: JobKind,
}

/// Transformed chunk bytes plus how they ended up stored.
pub struct ChunkPayload {
    pub bytes: Vec<u8>,
    pub method: CompressionMethod,
}

/// Outcome of one work item. A failed item never takes the pool down; the
/// failure is reported here and the remaining items keep processing.
pub struct WorkResult {
    pub seq: u64,
    pub outcome: Result<ChunkPayload, CodecError>,
}

struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

struct BatchState {
    completed: Vec<WorkResult>,
}

struct Shared {
    queue: Mutex<QueueState>,
    work_ready: Condvar,
    space_ready: Condvar,
    batch: Mutex<BatchState>,
    batch_done: Condvar,
    capacity: usize,
}

/// Fixed-size pool of compute threads, alive for the duration of one
/// pack/unpack call. Dropping the pool closes the queue and joins every
/// worker.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    in_flight: usize,
}

/// Recover the guard even if a worker panicked while holding the lock; the
/// protected state is plain data and stays usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Resolve a requested thread count: 0 means hardware concurrency, capped.
pub fn resolve_thread_count(requested: usize) -> usize {
    if requested == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_POOL_THREADS)
    } else {
        requested.min(MAX_POOL_THREADS)
    }
}

impl WorkerPool {
    /// Spawn a pool with `threads` workers (0 = hardware concurrency).
    pub fn new(threads: usize) -> Self {
        let threads = resolve_thread_count(threads);
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            work_ready: Condvar::new(),
            space_ready: Condvar::new(),
            batch: Mutex::new(BatchState {
                completed: Vec::new(),
            }),
            batch_done: Condvar::new(),
            capacity: threads * QUEUE_DEPTH_PER_WORKER,
        });

        let handles = (0..threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        WorkerPool {
            shared,
            handles,
            in_flight: 0,
        }
    }

    /// Number of worker threads in the pool.
    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Queue one item, blocking while the bounded queue is full.
    pub fn submit(&mut self, item: WorkItem) {
        let mut queue = lock(&self.shared.queue);
        while queue.items.len() >= self.shared.capacity {
            queue = self
                .shared
                .space_ready
                .wait(queue)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        queue.items.push_back(item);
        self.in_flight += 1;
        self.shared.work_ready.notify_one();
    }

    /// Wait for every submitted item of the current batch and return the
    /// results sorted by sequence number, never completion order.
    pub fn drain(&mut self) -> Vec<WorkResult> {
        let mut batch = lock(&self.shared.batch);
        while batch.completed.len() < self.in_flight {
            batch = self
                .shared
                .batch_done
                .wait(batch)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        self.in_flight = 0;

        let mut results = std::mem::take(&mut batch.completed);
        results.sort_by_key(|r| r.seq);
        results
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut queue = lock(&self.shared.queue);
            queue.closed = true;
            self.shared.work_ready.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let item = {
            let mut queue = lock(&shared.queue);
            loop {
                if let Some(item) = queue.items.pop_front() {
                    shared.space_ready.notify_one();
                    break item;
                }
                if queue.closed {
                    return;
                }
                queue = shared
                    .work_ready
                    .wait(queue)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        let outcome = run_job(item.payload, item.job);

        let mut batch = lock(&shared.batch);
        batch.completed.push(WorkResult {
            seq: item.seq,
            outcome,
        });
        shared.batch_done.notify_all();
    }
}

fn run_job(payload: Vec<u8>, job: JobKind) -> Result<ChunkPayload, CodecError> {
    match job {
        JobKind::Compress {
            level,
            allow_compression,
        } => {
            if !allow_compression {
                return Ok(ChunkPayload {
                    bytes: payload,
                    method: CompressionMethod::None,
                });
            }
            let compressed = codec::compress(&payload, level)?;
            if compressed.len() < payload.len() {
                Ok(ChunkPayload {
                    bytes: compressed,
                    method: CompressionMethod::Compressed,
                })
            } else {
                // Already-dense data would only grow; keep it raw.
                Ok(ChunkPayload {
                    bytes: payload,
                    method: CompressionMethod::None,
                })
            }
        }
        JobKind::Decompress {
            method,
            expected_len,
        } => match method {
            CompressionMethod::None => {
                if payload.len() != expected_len {
                    return Err(CodecError::Corrupt(format!(
                        "raw chunk is {} bytes, expected {}",
                        payload.len(),
                        expected_len
                    )));
                }
                Ok(ChunkPayload {
                    bytes: payload,
                    method: CompressionMethod::None,
                })
            }
            CompressionMethod::Compressed => {
                let bytes = codec::decompress(&payload, expected_len)?;
                Ok(ChunkPayload {
                    bytes,
                    method: CompressionMethod::Compressed,
                })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_sorted_by_seq() {
        let mut pool = WorkerPool::new(4);
        for seq in 0..64u64 {
            pool.submit(WorkItem {
                seq,
                payload: vec![(seq & 0xFF) as u8; 4096],
                job: JobKind::Compress {
                    level: CompressionLevel::Fastest,
                    allow_compression: true,
                },
            });
        }
        let results = pool.drain();
        assert_eq!(results.len(), 64);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.seq, i as u64);
            assert!(result.outcome.is_ok());
        }
    }

    #[test]
    fn test_failure_does_not_kill_pool() {
        let mut pool = WorkerPool::new(2);
        // Garbage that is not a zstd stream.
        pool.submit(WorkItem {
            seq: 0,
            payload: vec![0xA5; 64],
            job: JobKind::Decompress {
                method: CompressionMethod::Compressed,
                expected_len: 128,
            },
        });
        pool.submit(WorkItem {
            seq: 1,
            payload: vec![7u8; 64],
            job: JobKind::Decompress {
                method: CompressionMethod::None,
                expected_len: 64,
            },
        });
        let results = pool.drain();
        assert_eq!(results.len(), 2);
        assert!(results[0].outcome.is_err());
        let payload = results[1].outcome.as_ref().unwrap();
        assert_eq!(payload.bytes, vec![7u8; 64]);
    }

    #[test]
    fn test_pool_reusable_across_batches() {
        let mut pool = WorkerPool::new(2);
        for batch in 0..3 {
            for seq in 0..8u64 {
                pool.submit(WorkItem {
                    seq,
                    payload: vec![batch as u8; 256],
                    job: JobKind::Compress {
                        level: CompressionLevel::Fastest,
                        allow_compression: true,
                    },
                });
            }
            assert_eq!(pool.drain().len(), 8);
        }
    }

    #[test]
    fn test_incompressible_payload_stays_raw() {
        let mut pool = WorkerPool::new(1);
        // Xorshift noise does not compress.
        let mut state = 0x2545F4914F6CDD1Du64;
        let noise: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 0xFF) as u8
            })
            .collect();
        pool.submit(WorkItem {
            seq: 0,
            payload: noise.clone(),
            job: JobKind::Compress {
                level: CompressionLevel::Uber,
                allow_compression: true,
            },
        });
        let results = pool.drain();
        let payload = results[0].outcome.as_ref().unwrap();
        assert!(payload.bytes.len() <= noise.len());
        if payload.method == CompressionMethod::None {
            assert_eq!(payload.bytes, noise);
        }
    }

    #[test]
    fn test_resolve_thread_count() {
        assert!(resolve_thread_count(0) >= 1);
        assert!(resolve_thread_count(0) <= MAX_POOL_THREADS);
        assert_eq!(resolve_thread_count(4), 4);
        assert_eq!(resolve_thread_count(1000), MAX_POOL_THREADS);
    }
}
