//! Controller runtime.
//!
//! Drives the [`Reconciler`] from store change notifications:
//!
//! | Piece | Role |
//! |-------|------|
//! | [`WorkQueue`] | Deduplicated keys, never handed to two workers at once |
//! | [`Backoff`] | Per-key retry delay after failed reconciles |
//! | watch task | Maps experiment and owned-job events to experiment keys |
//! | resync task | Periodically re-enqueues every experiment |
//! | workers | Pull keys and run one reconcile each under a deadline |
//!
//! Startup waits for the store to sync, subscribes to the watch stream, and
//! then enqueues every existing experiment so nothing created before the
//! subscription is missed.

mod backoff;
mod queue;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{API_VERSION, FinetuneExperiment, FinetuneJob, ObjectKey, Resource};
use crate::config::ControllerConfig;
use crate::errors::{ControllerError, StoreError};
use crate::reconciler::{Action, Reconciler};
use crate::store::{Client, WatchEvent};

pub use backoff::Backoff;
pub use queue::WorkQueue;

/// Runtime options for [`Controller`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerOptions {
    /// Number of worker tasks (distinct keys reconciled in parallel)
    pub max_concurrent_reconciles: usize,
    pub cache_sync_timeout: Duration,
    pub reconcile_timeout: Duration,
    /// `None` disables periodic resync
    pub resync_period: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 1,
            cache_sync_timeout: Duration::from_secs(10),
            reconcile_timeout: Duration::from_secs(30),
            resync_period: Some(Duration::from_secs(300)),
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1000),
        }
    }
}

impl ControllerOptions {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            max_concurrent_reconciles: config.controller.max_concurrent_reconciles,
            cache_sync_timeout: config.cache_sync_timeout(),
            reconcile_timeout: config.reconcile_timeout(),
            resync_period: config.resync_period(),
            backoff_base: config.base_delay(),
            backoff_max: config.max_delay(),
        }
    }

    pub fn with_max_concurrent_reconciles(mut self, max: usize) -> Self {
        self.max_concurrent_reconciles = max;
        self
    }

    pub fn with_cache_sync_timeout(mut self, timeout: Duration) -> Self {
        self.cache_sync_timeout = timeout;
        self
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn with_resync_period(mut self, period: Option<Duration>) -> Self {
        self.resync_period = period;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.max_concurrent_reconciles == 0 {
            return Err(ControllerError::InvalidConfig(
                "max_concurrent_reconciles must be at least 1".to_string(),
            ));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "reconcile_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Maps a watch event to the experiment key it should trigger.
///
/// Experiment events map to their own key. Job events map to the key of the
/// experiment holding their controller reference; jobs without one are ignored.
pub fn map_event(event: &WatchEvent) -> Option<ObjectKey> {
    if event.kind == FinetuneExperiment::KIND {
        return Some(event.key.clone());
    }
    if event.kind == FinetuneJob::KIND {
        return event
            .controller
            .as_ref()
            .filter(|owner| owner.kind == FinetuneExperiment::KIND && owner.api_version == API_VERSION)
            .map(|owner| ObjectKey::new(event.key.namespace.as_str(), owner.name.as_str()));
    }
    None
}

/// Enqueues every experiment in the store. Returns how many were queued.
async fn enqueue_all<C: Client>(client: &C, queue: &WorkQueue) -> Result<usize, StoreError> {
    let experiments = client.list::<FinetuneExperiment>(None).await?;
    let count = experiments.len();
    for experiment in experiments {
        queue.add(experiment.key());
    }
    Ok(count)
}

pub struct Controller<C: Client> {
    reconciler: Reconciler<C>,
    options: ControllerOptions,
    queue: Arc<WorkQueue>,
    backoff: Arc<Mutex<Backoff>>,
}

impl<C: Client> Controller<C> {
    pub fn new(client: Arc<C>, options: ControllerOptions) -> Self {
        let backoff = Backoff::new(options.backoff_base, options.backoff_max);
        Self {
            reconciler: Reconciler::new(client),
            options,
            queue: Arc::new(WorkQueue::new()),
            backoff: Arc::new(Mutex::new(backoff)),
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// The work queue, for callers that need to observe idleness.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// In-flight reconciles observe the cancellation through their context
    /// token; the call returns once every worker has exited.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        self.options.validate()?;
        let client = Arc::clone(self.reconciler.client());

        match tokio::time::timeout(self.options.cache_sync_timeout, client.wait_for_sync()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ControllerError::CacheSyncTimeout {
                    timeout: self.options.cache_sync_timeout,
                });
            }
        }

        let events = client.watch();
        let queued = enqueue_all(client.as_ref(), &self.queue).await?;
        info!(
            experiments = queued,
            workers = self.options.max_concurrent_reconciles,
            "Starting finetuneExperiment controller"
        );

        let mut background: Vec<JoinHandle<()>> = Vec::new();
        background.push(tokio::spawn(watch_loop(
            Arc::clone(&client),
            Arc::clone(&self.queue),
            events,
            shutdown.clone(),
        )));
        if let Some(period) = self.options.resync_period {
            background.push(tokio::spawn(resync_loop(
                Arc::clone(&client),
                Arc::clone(&self.queue),
                period,
                shutdown.clone(),
            )));
        }

        let workers: Vec<JoinHandle<()>> = (0..self.options.max_concurrent_reconciles)
            .map(|id| {
                let worker = Worker {
                    id,
                    reconciler: self.reconciler.clone(),
                    queue: Arc::clone(&self.queue),
                    backoff: Arc::clone(&self.backoff),
                    reconcile_timeout: self.options.reconcile_timeout,
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        shutdown.cancelled().await;
        info!("Shutting down finetuneExperiment controller");
        self.queue.shutdown();

        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        for handle in background {
            handle.abort();
        }
        Ok(())
    }
}

async fn watch_loop<C: Client>(
    client: Arc<C>,
    queue: Arc<WorkQueue>,
    mut events: broadcast::Receiver<WatchEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = events.recv() => received,
        };
        match received {
            Ok(event) => {
                if let Some(key) = map_event(&event) {
                    debug!(
                        kind = %event.kind,
                        object = %event.key,
                        experiment = %key,
                        "Enqueue from watch event"
                    );
                    queue.add(key);
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Watch stream lagged, resyncing all experiments");
                if let Err(e) = enqueue_all(client.as_ref(), &queue).await {
                    warn!(error = %e, "Resync after lag failed");
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("Watch stream closed");
                return;
            }
        }
    }
}

async fn resync_loop<C: Client>(
    client: Arc<C>,
    queue: Arc<WorkQueue>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    // The first tick fires immediately and startup has already enqueued everything.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        match enqueue_all(client.as_ref(), &queue).await {
            Ok(count) => debug!(experiments = count, "Periodic resync"),
            Err(e) => warn!(error = %e, "Periodic resync failed"),
        }
    }
}

struct Worker<C: Client> {
    id: usize,
    reconciler: Reconciler<C>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Mutex<Backoff>>,
    reconcile_timeout: Duration,
    shutdown: CancellationToken,
}

impl<C: Client> Worker<C> {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");
        while let Some(key) = self.queue.get().await {
            let ctx = self.shutdown.child_token();
            let action =
                match tokio::time::timeout(self.reconcile_timeout, self.reconciler.run(&key, &ctx))
                    .await
                {
                    Ok(action) => action,
                    Err(_) => {
                        ctx.cancel();
                        warn!(
                            name = %key.name,
                            namespace = %key.namespace,
                            timeout = ?self.reconcile_timeout,
                            "Reconcile timed out"
                        );
                        Action::Requeue
                    }
                };
            self.queue.done(&key);
            self.apply(key, action).await;
        }
        debug!(worker = self.id, "Worker stopped");
    }

    async fn apply(&self, key: ObjectKey, action: Action) {
        match action {
            Action::Done => self.backoff.lock().await.forget(&key),
            Action::Requeue => {
                let delay = self.backoff.lock().await.next_delay(&key);
                debug!(object = %key, delay = ?delay, "Requeue with backoff");
                self.queue.add_after(key, delay);
            }
            Action::RequeueAfter(delay) => self.queue.add_after(key, delay),
        }
    }
}
