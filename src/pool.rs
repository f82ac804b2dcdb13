//! Self-feeding task queue drained by a fixed pool of workers.
//!
//! A [`Task`] is an opaque unit of work. While it runs it receives a
//! [`TaskQueue`] handle and may push more tasks; the pool does not know or
//! care which tasks produce more work and which do not.
//!
//! Termination is driven by an in-flight counter, not by the number of
//! workers. A push increments the counter before the task is sent, and a
//! worker decrements it only after the task body (including every push it
//! made) has returned. The counter can therefore only reach zero when no
//! task is queued or running, and at that point the pool stops itself.
//!
//! The first task that returns an error aborts the pool: the stop signal
//! fires, queued tasks are dropped without running, and [`WorkerPool::run`]
//! returns that error once the running tasks have finished.
//!
//! A producer that must not run too far ahead of its consumers calls
//! [`TaskQueue::wait_for_room`]. While it waits it runs queued tasks on its
//! own worker, so a pool of one worker cannot deadlock on it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::errors::SyncError;

/// Boxed future returned by a running task.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send>>;

/// A deferred unit of work.
pub struct Task {
    label: &'static str,
    run: Box<dyn FnOnce(TaskQueue) -> TaskFuture + Send>,
}

impl Task {
    /// Wrap an async closure. `label` only appears in logs.
    pub fn new<F, Fut>(label: &'static str, f: F) -> Self
    where
        F: FnOnce(TaskQueue) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        Self {
            label,
            run: Box::new(move |queue| Box::pin(f(queue))),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("label", &self.label).finish()
    }
}

/// Counters reported when a pool finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks accepted by [`TaskQueue::push`], the seed included.
    pub tasks_enqueued: u64,
    /// Tasks whose body ran to completion, successfully or not.
    pub tasks_completed: u64,
}

struct QueueShared {
    sender: mpsc::UnboundedSender<Task>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Task>>,
    in_flight: AtomicUsize,
    /// Signalled on every completion and on abort.
    room: Notify,
    enqueued: AtomicU64,
    completed: AtomicU64,
    stop: watch::Sender<bool>,
    failure: Mutex<Option<SyncError>>,
}

/// Handle for pushing tasks. Cheap to clone; every running task gets one.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<QueueShared>,
}

impl TaskQueue {
    /// Enqueue a task.
    ///
    /// Returns `false` (dropping the task) once the pool is stopping.
    pub fn push(&self, task: Task) -> bool {
        if self.is_stopped() {
            trace!(task = task.label, "pool stopping, task dropped");
            return false;
        }
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.shared.sender.send(task).is_err() {
            self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!(crate::metrics::TASKS_IN_FLIGHT).increment(1.0);
        true
    }

    /// Whether the pool has drained or aborted.
    pub fn is_stopped(&self) -> bool {
        *self.shared.stop.borrow()
    }

    /// Tasks queued or running right now.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at most `limit` tasks are in flight, the caller's own
    /// task included. Queued tasks are run on the caller's worker in the
    /// meantime. Returns early once the pool stops.
    pub async fn wait_for_room(&self, limit: usize) {
        loop {
            let notified = self.shared.room.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() || self.in_flight() <= limit {
                return;
            }

            let task = match self.shared.receiver.try_lock() {
                Ok(mut receiver) => receiver.try_recv().ok(),
                // An idle worker holds the receiver and will take the next task.
                Err(_) => None,
            };
            match task {
                Some(task) if !self.is_stopped() => self.run_task(task).await,
                Some(_) => return,
                None => notified.await,
            }
        }
    }

    /// Run one dequeued task to completion and account for it.
    async fn run_task(&self, task: Task) {
        trace!(task = task.label, "running task");
        let result = (task.run)(self.clone()).await;
        if let Err(err) = result {
            debug!(task = task.label, error = %err, "task failed, aborting pool");
            self.abort(err);
        }
        self.complete();
    }

    /// Mark one task finished; the last one stops the pool.
    fn complete(&self) {
        self.shared.completed.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!(crate::metrics::TASKS_IN_FLIGHT).decrement(1.0);
        if self.shared.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("queue drained, stopping workers");
            self.shared.stop.send_replace(true);
        }
        self.shared.room.notify_waiters();
    }

    /// Record the first failure and stop the pool.
    fn abort(&self, err: SyncError) {
        {
            let mut failure = self.shared.failure.lock().expect("mutex poisoned");
            if failure.is_none() {
                *failure = Some(err);
            }
        }
        self.shared.stop.send_replace(true);
        self.shared.room.notify_waiters();
    }
}

/// Fixed-size pool of workers sharing one unbounded queue.
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with `workers` loops (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Run `seed` and everything it transitively enqueues.
    ///
    /// Resolves once the queue has drained, or with the first task error.
    pub async fn run(self, seed: Task) -> Result<PoolStats, SyncError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop, _) = watch::channel(false);
        let queue = TaskQueue {
            shared: Arc::new(QueueShared {
                sender,
                receiver: AsyncMutex::new(receiver),
                in_flight: AtomicUsize::new(0),
                room: Notify::new(),
                enqueued: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                stop,
                failure: Mutex::new(None),
            }),
        };

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(worker_loop(id, queue.clone()));
        }
        debug!(workers = self.workers, "worker pool started");

        queue.push(seed);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                queue.abort(SyncError::TaskPanicked(err.to_string()));
            }
        }
        // Tasks dropped by an abort never complete.
        metrics::gauge!(crate::metrics::TASKS_IN_FLIGHT).set(0.0);

        let stats = PoolStats {
            tasks_enqueued: queue.shared.enqueued.load(Ordering::Relaxed),
            tasks_completed: queue.shared.completed.load(Ordering::Relaxed),
        };
        debug!(
            enqueued = stats.tasks_enqueued,
            completed = stats.tasks_completed,
            "worker pool stopped"
        );

        let failure = queue.shared.failure.lock().expect("mutex poisoned").take();
        match failure {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }
}

async fn worker_loop(id: usize, queue: TaskQueue) {
    let mut stop = queue.shared.stop.subscribe();
    loop {
        let next = {
            let mut receiver = queue.shared.receiver.lock().await;
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => None,
                task = receiver.recv() => task,
            }
        };
        let Some(task) = next else {
            break;
        };
        if queue.is_stopped() {
            break;
        }

        queue.run_task(task).await;
    }
    trace!(worker = id, "worker exiting");
}

/// Resolves once the stop flag is set, or immediately if it already is.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        let is_stopped = *stop.borrow_and_update();
        if is_stopped || stop.changed().await.is_err() {
            return;
        }
    }
}
