//! Background task scheduler.
//!
//! A fixed set of worker tasks consumes an unbounded task queue; a ticker
//! task enqueues [`Task::Maintenance`] at a fixed interval. Workers hold the
//! handler only weakly, so dropping the pool stops them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Work performed off the callers' path.
#[derive(Debug)]
pub enum Task<T> {
    /// Open a new connection, optionally on behalf of a queued request.
    AddConnection {
        /// Waiter to notify if every attempt fails.
        waiter: Option<u64>,
    },
    /// Reset a returned connection and put it back in the pool.
    ReturnConnection(T),
    /// Close a connection.
    CloseConnection(T),
    /// Periodic housekeeping.
    Maintenance,
}

impl<T> Task<T> {
    /// Short name used in log records.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddConnection { .. } => "add_connection",
            Self::ReturnConnection(_) => "return_connection",
            Self::CloseConnection(_) => "close_connection",
            Self::Maintenance => "maintenance",
        }
    }
}

/// Executes tasks pulled from the queue.
#[async_trait]
pub trait TaskHandler<T: Send + 'static>: Send + Sync + 'static {
    /// Run one task. `shutdown` is cancelled when the scheduler stops.
    async fn run(&self, task: Task<T>, shutdown: &CancellationToken);

    /// Dispose of a task that was still queued at shutdown.
    async fn discard(&self, task: Task<T>);
}

/// Owner of the task queue, the workers and the ticker.
pub struct Scheduler<T> {
    tx: mpsc::UnboundedSender<Task<T>>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Task<T>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl<T: Send + 'static> Scheduler<T> {
    /// Create a scheduler with no worker running yet.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            handles: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn `num_workers` workers and the maintenance ticker.
    pub fn start<H: TaskHandler<T>>(
        &self,
        handler: Weak<H>,
        num_workers: usize,
        maintenance_interval: Duration,
    ) {
        let mut handles = self.handles.lock();

        for worker_id in 0..num_workers {
            let rx = Arc::clone(&self.rx);
            let token = self.shutdown.clone();
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                tracing::trace!(worker_id, "worker started");
                loop {
                    let task = tokio::select! {
                        biased;
                        () = token.cancelled() => break,
                        task = async { rx.lock().await.recv().await } => task,
                    };
                    let Some(task) = task else { break };
                    let Some(handler) = handler.upgrade() else { break };
                    tracing::trace!(worker_id, task = task.name(), "running task");
                    handler.run(task, &token).await;
                }
                tracing::trace!(worker_id, "worker stopped");
            }));
        }

        let Some(start) = tokio::time::Instant::now().checked_add(maintenance_interval) else {
            tracing::debug!(
                ?maintenance_interval,
                "maintenance interval out of range, not ticking"
            );
            return;
        };
        let tx = self.tx.clone();
        let token = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(start, maintenance_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(Task::Maintenance).is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Queue a task. Gives it back if the scheduler is stopped.
    pub fn dispatch(&self, task: Task<T>) -> Option<Task<T>> {
        if self.shutdown.is_cancelled() {
            return Some(task);
        }
        self.tx.send(task).err().map(|e| e.0)
    }

    /// Whether [`shutdown`](Self::shutdown) or [`cancel`](Self::cancel) ran.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled when the scheduler stops.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Stop the workers without waiting for them.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Stop the workers, wait for them, then hand every task still queued
    /// to `handler` for disposal.
    pub async fn shutdown<H: TaskHandler<T>>(&self, handler: &H) {
        self.shutdown.cancel();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "pool worker failed");
            }
        }

        let mut rx = self.rx.lock().await;
        let mut drained = 0usize;
        while let Ok(task) = rx.try_recv() {
            drained += 1;
            handler.discard(task).await;
        }
        if drained > 0 {
            tracing::debug!(tasks = drained, "discarded queued tasks");
        }
    }
}

impl<T: Send + 'static> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.handles.lock().len())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        ran: Mutex<Vec<String>>,
        discarded: AtomicUsize,
        maintenance: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler<u32> for Recorder {
        async fn run(&self, task: Task<u32>, _shutdown: &CancellationToken) {
            match task {
                Task::Maintenance => {
                    self.maintenance.fetch_add(1, Ordering::SeqCst);
                }
                Task::ReturnConnection(n) => self.ran.lock().push(format!("return {n}")),
                Task::CloseConnection(n) => self.ran.lock().push(format!("close {n}")),
                Task::AddConnection { waiter } => {
                    self.ran.lock().push(format!("add {waiter:?}"));
                }
            }
        }

        async fn discard(&self, _task: Task<u32>) {
            self.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_in_order_with_one_worker() {
        let handler = Arc::new(Recorder::default());
        let scheduler = Scheduler::new();
        scheduler.start(Arc::downgrade(&handler), 1, Duration::from_secs(60));

        assert!(scheduler.dispatch(Task::AddConnection { waiter: Some(3) }).is_none());
        assert!(scheduler.dispatch(Task::ReturnConnection(1)).is_none());
        assert!(scheduler.dispatch(Task::CloseConnection(2)).is_none());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            *handler.ran.lock(),
            vec!["add Some(3)", "return 1", "close 2"]
        );
        scheduler.shutdown(handler.as_ref()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_enqueues_maintenance() {
        let handler = Arc::new(Recorder::default());
        let scheduler: Scheduler<u32> = Scheduler::new();
        scheduler.start(Arc::downgrade(&handler), 2, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(handler.maintenance.load(Ordering::SeqCst), 3);
        scheduler.shutdown(handler.as_ref()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_disables_ticker() {
        let handler = Arc::new(Recorder::default());
        let scheduler = Scheduler::new();
        scheduler.start(Arc::downgrade(&handler), 1, Duration::MAX);

        assert!(scheduler.dispatch(Task::CloseConnection(7)).is_none());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*handler.ran.lock(), vec!["close 7"]);
        assert_eq!(handler.maintenance.load(Ordering::SeqCst), 0);
        scheduler.shutdown(handler.as_ref()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_queue() {
        let handler = Arc::new(Recorder::default());
        let scheduler = Scheduler::new();
        // No worker started: everything stays queued.
        scheduler.dispatch(Task::CloseConnection(1));
        scheduler.dispatch(Task::ReturnConnection(2));

        scheduler.shutdown(handler.as_ref()).await;
        assert_eq!(handler.discarded.load(Ordering::SeqCst), 2);
        assert!(scheduler.is_stopped());
        assert!(matches!(
            scheduler.dispatch(Task::Maintenance),
            Some(Task::Maintenance)
        ));
    }
}
