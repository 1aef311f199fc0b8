//! Fixed-partition fan-out over plain OS threads.
//!
//! Every parallel pass in the engine divides the half-open spectrum index
//! range `[0, n)` into `T` contiguous, near-equal partitions and runs one
//! worker per partition. Workers own their file handles and accumulators;
//! nothing is shared, so no locking is needed. All workers are joined before
//! the caller continues, and thread-private accumulators are folded
//! single-threaded afterwards.

use std::ops::Range;
use std::panic;
use std::thread;

use crate::error::EngineError;

fn check_dimensions(item_count: usize, thread_count: usize) -> Result<(), EngineError> {
    if item_count == 0 {
        return Err(EngineError::configuration(
            "cannot partition an empty item range",
        ));
    }
    if thread_count == 0 {
        return Err(EngineError::configuration("thread count must be at least 1"));
    }
    Ok(())
}

/// Contiguous partition bounds: each of the `thread_count` partitions gets
/// `item_count / thread_count` items, the last also takes the remainder.
/// When there are more threads than items the thread count is halved until
/// every partition is populated.
fn partition_bounds(item_count: usize, thread_count: usize) -> Vec<Range<usize>> {
    let chunk = item_count / thread_count;
    if chunk == 0 {
        return partition_bounds(item_count, thread_count / 2);
    }
    (0..thread_count)
        .map(|tid| {
            let lo = tid * chunk;
            let hi = if tid + 1 == thread_count {
                item_count
            } else {
                lo + chunk
            };
            lo..hi
        })
        .collect()
}

fn join_all<S>(
    handles: Vec<thread::ScopedJoinHandle<'_, Result<S, EngineError>>>,
) -> Result<Vec<S>, EngineError> {
    let mut results = Vec::with_capacity(handles.len());
    let mut first_err = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(state)) => results.push(state),
            Ok(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

/// Run `worker(thread_id, index_range)` over contiguous partitions of
/// `[0, item_count)`, blocking until every partition finishes. The first
/// worker error is returned after all partitions have joined.
pub fn map_partitions<F>(
    item_count: usize,
    thread_count: usize,
    worker: F,
) -> Result<(), EngineError>
where
    F: Fn(usize, Range<usize>) -> Result<(), EngineError> + Sync,
{
    map_partitions_collect(item_count, thread_count, worker).map(|_| ())
}

/// Like [`map_partitions`], but each worker returns a thread-private
/// accumulator. The result vector is indexed by thread id, ready for a
/// single-threaded fold.
pub fn map_partitions_collect<S, F>(
    item_count: usize,
    thread_count: usize,
    worker: F,
) -> Result<Vec<S>, EngineError>
where
    S: Send,
    F: Fn(usize, Range<usize>) -> Result<S, EngineError> + Sync,
{
    check_dimensions(item_count, thread_count)?;
    let bounds = partition_bounds(item_count, thread_count);
    thread::scope(|scope| {
        let handles: Vec<_> = bounds
            .into_iter()
            .enumerate()
            .map(|(tid, range)| {
                let worker = &worker;
                scope.spawn(move || worker(tid, range))
            })
            .collect();
        join_all(handles)
    })
}

/// Partition a mutable slice so every worker owns its chunk exclusively.
/// `worker(thread_id, base_index, chunk)` sees `chunk == &mut items[base..]`
/// for its partition. Used wherever a pass writes one cell per item.
pub fn map_partitions_mut<T, F>(
    items: &mut [T],
    thread_count: usize,
    worker: F,
) -> Result<(), EngineError>
where
    T: Send,
    F: Fn(usize, usize, &mut [T]) -> Result<(), EngineError> + Sync,
{
    map_partitions_mut_collect(items, thread_count, |tid, base, chunk| {
        worker(tid, base, chunk)
    })
    .map(|_| ())
}

/// Combination of [`map_partitions_mut`] and [`map_partitions_collect`]:
/// workers mutate their exclusive chunk and hand back a thread-private
/// accumulator, so a single pass can both update per-item state and gather
/// partial sums. The result vector is indexed by thread id.
pub fn map_partitions_mut_collect<T, S, F>(
    items: &mut [T],
    thread_count: usize,
    worker: F,
) -> Result<Vec<S>, EngineError>
where
    T: Send,
    S: Send,
    F: Fn(usize, usize, &mut [T]) -> Result<S, EngineError> + Sync,
{
    check_dimensions(items.len(), thread_count)?;
    let bounds = partition_bounds(items.len(), thread_count);
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(bounds.len());
        let mut rest = items;
        for (tid, range) in bounds.into_iter().enumerate() {
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            rest = tail;
            let worker = &worker;
            let base = range.start;
            handles.push(scope.spawn(move || worker(tid, base, chunk)));
        }
        join_all(handles)
    })
}
