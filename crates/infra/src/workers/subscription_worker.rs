use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::event_store::EventStore;
use crate::subscription::{SubscriptionEngine, SubscriptionEngineCriteria, SubscriptionStore};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A batch in progress runs to completion first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(thread::JoinHandle::is_finished)
    }
}

/// Keeps subscriptions caught up with the event store.
///
/// Every tick first boots whatever `setup` finds (new subscriptions, ones
/// discovered by a previous tick, retried `BOOTING` ones) and only once booting
/// is drained calls `run`. A tick whose batch was cut by the message limit is
/// followed immediately by the next one. Batch errors are logged and the loop
/// keeps going.
#[derive(Debug)]
pub struct SubscriptionWorker;

impl SubscriptionWorker {
    /// Spawn a named worker thread polling with the engine's configured interval.
    pub fn spawn<E, S>(
        name: impl Into<String>,
        engine: Arc<SubscriptionEngine<E, S>>,
        criteria: SubscriptionEngineCriteria,
    ) -> io::Result<WorkerHandle>
    where
        E: EventStore + 'static,
        S: SubscriptionStore + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let poll_interval = engine.config().poll_interval;

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&name, &engine, &criteria, poll_interval, shutdown_rx))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<E, S>(
    name: &str,
    engine: &SubscriptionEngine<E, S>,
    criteria: &SubscriptionEngineCriteria,
    poll_interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) where
    E: EventStore,
    S: SubscriptionStore,
{
    info!(worker = name, "subscription worker started");

    loop {
        let wait = if tick(name, engine, criteria) {
            poll_interval
        } else {
            Duration::ZERO
        };

        match shutdown_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => continue,
        }
    }
    info!(worker = name, "subscription worker stopped");
}

/// One poll. Returns `false` when a batch stopped at its limit.
fn tick<E, S>(name: &str, engine: &SubscriptionEngine<E, S>, criteria: &SubscriptionEngineCriteria) -> bool
where
    E: EventStore,
    S: SubscriptionStore,
{
    match engine.setup(criteria, None) {
        Ok(result) => {
            log_batch_errors(name, "setup", &result.errors);
            if !result.finished {
                return false;
            }
        }
        Err(err) => warn!(worker = name, error = %err, "subscription setup failed"),
    }

    match engine.run(criteria, None) {
        Ok(result) => {
            log_batch_errors(name, "run", &result.errors);
            result.finished
        }
        Err(err) => {
            warn!(worker = name, error = %err, "subscription run failed");
            true
        }
    }
}

fn log_batch_errors(name: &str, process: &str, errors: &[crate::subscription::ProcessingError]) {
    for error in errors {
        warn!(
            worker = name,
            process,
            subscription_id = %error.subscription_id,
            error = %error.message,
            "subscription failed during batch"
        );
    }
}
