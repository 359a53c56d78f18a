//! Worker pool that drains the work queue through the reconciler.

use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::{task::JoinSet, time::Instant};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cache::ResourceCache;
use crate::config::ControllerConfig;
use crate::error::Error;
use crate::event::Outcome;
use crate::metrics::Metrics;
use crate::queue::{WorkQueue, default_controller_rate_limiter};
use crate::reconcile::Reconciler;
use crate::translator::EventTranslator;

pub struct Controller {
    queue: WorkQueue<String>,
    reconciler: Reconciler,
    cache: Arc<dyn ResourceCache>,
    metrics: Arc<Metrics>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        cache: Arc<dyn ResourceCache>,
        reconciler: Reconciler,
        metrics: Arc<Metrics>,
    ) -> Self {
        let queue = WorkQueue::new(default_controller_rate_limiter(
            config.base_delay,
            config.max_delay,
        ));
        Self {
            queue,
            reconciler: reconciler.with_finalizer(config.finalizer.clone()),
            cache,
            metrics,
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Translator feeding this controller's queue.
    pub fn translator(&self) -> EventTranslator {
        EventTranslator::new(self.queue.clone())
    }

    /// Waits for the cache, then processes keys until `shutdown` resolves.
    ///
    /// After shutdown no new keys are taken; reconciles already running are
    /// allowed to finish before this returns.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let mut shutdown = std::pin::pin!(shutdown);
        info!("Starting Foo controller");

        tokio::select! {
            synced = self.cache.wait_for_initial_sync() => {
                if !synced {
                    self.queue.shut_down();
                    error!("cache stopped before its initial sync");
                    return Err(Error::CacheSync);
                }
            }
            _ = &mut shutdown => {
                self.queue.shut_down();
                info!("shutdown requested before caches synced");
                return Ok(());
            }
        }
        info!(workers = self.config.workers, "Foo controller synced and ready");

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let controller = Arc::clone(&self);
            workers.spawn(
                async move { controller.run_worker().await }
                    .instrument(info_span!("worker", id)),
            );
        }

        shutdown.await;
        info!("shutting down Foo controller");
        self.queue.shut_down();

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "worker task failed");
            }
        }
        info!("Foo controller stopped");
        Ok(())
    }

    async fn run_worker(&self) {
        while self.process_next_item().await {}
        debug!("worker exiting");
    }

    /// Takes one key, reconciles it and reports back to the queue.
    /// Returns `false` once the queue is shut down.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        self.metrics.set_queue_depth(self.queue.len());

        let started = Instant::now();
        let result = self
            .reconcile_guarded(&key)
            .instrument(info_span!("reconcile", %key))
            .await;
        self.handle_result(&key, result, started);
        self.queue.done(&key);
        true
    }

    async fn reconcile_guarded(&self, key: &str) -> Result<Outcome, Error> {
        let timeout = self.config.reconcile_timeout;
        let pass = tokio::time::timeout(timeout, self.reconciler.reconcile(key));
        match AssertUnwindSafe(pass).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(Error::Timeout(timeout)),
            Err(panic) => Err(Error::Panicked(panic_message(panic))),
        }
    }

    fn handle_result(&self, key: &String, result: Result<Outcome, Error>, started: Instant) {
        let elapsed = started.elapsed();
        let err = match result {
            Ok(outcome) => {
                debug!(%key, outcome = outcome.as_str(), "reconciled");
                self.metrics.reconciled(outcome.as_str(), elapsed);
                self.queue.forget(key);
                return;
            }
            Err(err) => err,
        };
        self.metrics.reconcile_failed(&err, elapsed);

        if !err.is_retryable() {
            error!(%key, error = %err, "dropping key: error is not retryable");
            self.queue.forget(key);
            self.metrics.dropped();
            return;
        }

        let failures = self.queue.num_requeues(key) + 1;
        if failures < self.config.max_retries {
            warn!(%key, error = %err, failures, "error syncing Foo, requeueing");
            self.queue.add_rate_limited(key.clone());
            self.metrics.retried();
        } else {
            error!(%key, error = %err, failures, "dropping Foo out of the queue");
            self.queue.forget(key);
            self.metrics.dropped();
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}
