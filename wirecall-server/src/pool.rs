//! Fixed-size worker pool.
//!
//! Workers pull from an unbounded FIFO queue. Submission is non-blocking;
//! a stopping pool refuses new tasks but drains the ones already queued
//! before the workers exit.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use tracing::debug;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    tasks: VecDeque<Task>,
    stopped: bool,
}

struct PoolInner {
    state: Mutex<PoolState>,
    notify: Condvar,
}

/// Fixed worker pool with a FIFO task queue.
pub(crate) struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    /// Starts `size` workers. `size` must be at least 1.
    pub(crate) fn new(size: usize) -> Self {
        assert!(size > 0);

        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                stopped: false,
            }),
            notify: Condvar::new(),
        });

        let workers = (0..size)
            .map(|id| {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("wirecall-worker-{id}"))
                    .spawn(move || worker_loop(id, &inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { inner, workers }
    }

    /// Enqueues a task. Returns false if the pool is stopping.
    pub(crate) fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return false;
            }
            state.tasks.push_back(Box::new(task));
        }
        self.inner.notify.notify_one();
        true
    }

    /// Stops the pool: refuses further submissions and wakes the workers
    /// to drain the queue.
    pub(crate) fn stop(&self) {
        self.inner.state.lock().stopped = true;
        self.inner.notify.notify_all();
    }

    /// Joins all workers. Call after [`ThreadPool::stop`].
    pub(crate) fn wait(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

fn worker_loop(id: usize, inner: &PoolInner) {
    loop {
        let task = {
            let mut state = inner.state.lock();
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                if state.stopped {
                    debug!("worker {id} exiting");
                    return;
                }
                inner.notify.wait(&mut state);
            }
        };
        task();
    }
}
