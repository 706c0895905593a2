// src/sched/worker_pool.rs

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, trace};

use crate::errors::Result;

/// Bounded set of threads draining one shared queue.
///
/// Each worker locks the queue, pops the next item, unlocks, then
/// processes it, so no item is handed to two workers. Workers exit when
/// the queue is empty. Local to one process.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every item with `f`; results come back in input order.
    pub fn run<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let total = items.len();
        let workers = self.workers.min(total.max(1));
        let queue: Mutex<VecDeque<(usize, T)>> = Mutex::new(items.into_iter().enumerate().collect());
        let results: Mutex<Vec<(usize, R)>> = Mutex::new(Vec::with_capacity(total));

        thread::scope(|scope| -> Result<()> {
            for id in 0..workers {
                let queue = &queue;
                let results = &results;
                let f = &f;
                thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn_scoped(scope, move || {
                        let mut handled = 0usize;
                        loop {
                            let next = relock(queue).pop_front();
                            let Some((idx, item)) = next else { break };
                            trace!(worker = id, item = idx, "picked item");
                            let out = f(item);
                            relock(results).push((idx, out));
                            handled += 1;
                        }
                        debug!(worker = id, handled, "worker drained queue");
                    })?;
            }
            Ok(())
        })?;

        let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        results.sort_by_key(|(idx, _)| *idx);
        Ok(results.into_iter().map(|(_, r)| r).collect())
    }
}

// Items leave the queue before they are processed, so a poisoned queue is
// still consistent.
fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn each_item_processed_exactly_once() {
        let pool = WorkerPool::new(4);
        let calls = AtomicUsize::new(0);
        let out = pool
            .run((0..100).collect(), |n: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                n * 2
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 100);
        assert_eq!(out, (0..100).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn uses_named_workers() {
        let pool = WorkerPool::new(3);
        let names = Mutex::new(BTreeSet::new());
        pool.run((0..30).collect(), |_: u32| {
            let name = thread::current().name().unwrap_or("").to_string();
            names.lock().unwrap().insert(name);
            thread::sleep(std::time::Duration::from_millis(2));
        })
        .unwrap();

        let names = names.into_inner().unwrap();
        assert!(!names.is_empty());
        assert!(names.iter().all(|n| n.starts_with("worker-")));
    }

    #[test]
    fn empty_input_and_zero_workers() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.workers(), 1);
        let out: Vec<u32> = pool.run(Vec::<u32>::new(), |n| n).unwrap();
        assert!(out.is_empty());
    }
}
