//! Worker pool draining a shared two-priority task queue.
//!
//! Pairs are independent during the narrow phase, so any unit of work that
//! owns its data can be pushed here. `work_and_wait` lets the submitting
//! thread help drain the queue instead of idling.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPriority {
    #[default]
    Normal,
    /// Runs before any queued normal task.
    High,
}

#[derive(Default)]
struct Queue {
    high: VecDeque<Task>,
    normal: VecDeque<Task>,
    running: usize,
    shutdown: bool,
}

impl Queue {
    fn pop(&mut self) -> Option<Task> {
        let task = self.high.pop_front().or_else(|| self.normal.pop_front());
        if task.is_some() {
            self.running += 1;
        }
        task
    }

    fn is_idle(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty() && self.running == 0
    }
}

struct Shared {
    queue: Mutex<Queue>,
    work_ready: Condvar,
    idle: Condvar,
}

impl Shared {
    fn execute(&self, task: Task) {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("task panicked inside the task pool");
        }
        let mut queue = self.queue.lock();
        queue.running -= 1;
        if queue.is_idle() {
            self.idle.notify_all();
        }
    }

    fn worker_loop(&self) {
        loop {
            let task = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(task) = queue.pop() {
                        break Some(task);
                    }
                    if queue.shutdown {
                        break None;
                    }
                    self.work_ready.wait(&mut queue);
                }
            };
            match task {
                Some(task) => self.execute(task),
                None => return,
            }
        }
    }
}

pub struct TaskPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Spawns `threads` workers. A pool with zero workers only makes progress
    /// through [`TaskPool::work_and_wait`].
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("collision-worker-{index}"))
                .spawn(move || worker_shared.worker_loop());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => warn!("failed to spawn task pool worker {index}: {err}"),
            }
        }
        debug!("task pool started with {} workers", workers.len());

        Self { shared, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn push<F>(&self, priority: TaskPriority, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        match priority {
            TaskPriority::High => queue.high.push_back(Box::new(task)),
            TaskPriority::Normal => queue.normal.push_back(Box::new(task)),
        }
        self.shared.work_ready.notify_one();
    }

    pub fn pending(&self) -> usize {
        let queue = self.shared.queue.lock();
        queue.high.len() + queue.normal.len()
    }

    /// Blocks until every queued and running task has finished.
    pub fn wait(&self) {
        let mut queue = self.shared.queue.lock();
        while !queue.is_idle() {
            self.shared.idle.wait(&mut queue);
        }
    }

    /// Runs queued tasks on the calling thread, then waits for the workers.
    pub fn work_and_wait(&self) {
        loop {
            let task = self.shared.queue.lock().pop();
            match task {
                Some(task) => self.shared.execute(task),
                None => break,
            }
        }
        self.wait();
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("workers", &self.workers.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.work_ready.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("task pool worker exited abnormally");
            }
        }
        debug!("task pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_task_before_wait_returns() {
        let pool = TaskPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.push(TaskPriority::Normal, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn calling_thread_drains_pool_without_workers() {
        let pool = TaskPool::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));
        for (priority, tag) in [
            (TaskPriority::Normal, "normal-1"),
            (TaskPriority::High, "high"),
            (TaskPriority::Normal, "normal-2"),
        ] {
            let order = Arc::clone(&order);
            pool.push(priority, move || order.lock().push(tag));
        }
        assert_eq!(pool.pending(), 3);
        pool.work_and_wait();
        assert_eq!(*order.lock(), vec!["high", "normal-1", "normal-2"]);
    }

    #[test]
    fn panicking_task_does_not_wedge_the_pool() {
        let pool = TaskPool::new(1);
        pool.push(TaskPriority::Normal, || panic!("boom"));
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        pool.push(TaskPriority::Normal, move || {
            flag.store(1, Ordering::SeqCst);
        });
        pool.wait();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
