//! Bounded worker pool for background tasks.
//!
//! `N` workers pull boxed futures from a bounded queue. When the queue is
//! full, [`TaskExecutor::submit`] runs the task on the submitting task
//! instead, which throttles submitters without dropping work.
//!
//! Dropping the executor closes the queue; workers finish what is already
//! queued and then exit.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error};

type Task = BoxFuture<'static, ()>;

/// Tracks queued and running tasks so callers can wait for quiescence.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct TaskExecutor {
    name: &'static str,
    tx: mpsc::Sender<Task>,
    in_flight: Arc<InFlight>,
}

impl TaskExecutor {
    /// Start `workers` workers behind a queue of `backlog` slots.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: &'static str, workers: usize, backlog: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(backlog.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for index in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let task = rx.lock().await.recv().await;
                    let Some(task) = task else { break };
                    task.await;
                }
                debug!("{} worker {} stopped", name, index);
            });
        }

        Self {
            name,
            tx,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Queue `task`, or run it here if the queue is full.
    pub async fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        let in_flight = self.in_flight.clone();
        let name = self.name;
        let wrapped: Task = Box::pin(async move {
            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                error!("{} task panicked", name);
            }
            in_flight.finish();
        });

        match self.tx.try_send(wrapped) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) => {
                debug!("{} queue full, running task on caller", self.name);
                task.await;
            }
            Err(TrySendError::Closed(task)) => task.await,
        }
    }

    /// Tasks queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Wait until every submitted task has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
