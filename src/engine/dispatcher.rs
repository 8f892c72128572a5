//! Inference Dispatcher
//!
//! Routes normalized samples to the scoring backend with at most
//! `max_concurrency` calls in flight. Callers wait at most `queue_timeout`
//! for a slot before getting `Overloaded`.

use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

use crate::models::{NormalizedSample, PredictionResult};
use super::assembler;
use super::backend::ScoringBackend;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Backend failure for one sample
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("no scoring capacity within {0:?}")]
    Overloaded(Duration),

    #[error("server is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrency: usize,
    pub queue_timeout: Duration,
    pub score_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 64,
            queue_timeout: Duration::from_secs(2),
            score_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    /// No new admissions; in-flight calls may finish
    Draining,
    /// Remaining calls are failed
    Stopped,
}

pub struct Dispatcher {
    backend: Arc<dyn ScoringBackend>,
    permits: Arc<Semaphore>,
    config: DispatcherConfig,
    lifecycle: watch::Sender<Lifecycle>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn ScoringBackend>, config: DispatcherConfig) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Running);
        Self {
            backend,
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            lifecycle,
        }
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub fn capacity(&self) -> usize {
        self.config.max_concurrency
    }

    /// Calls currently holding a scoring slot
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrency.saturating_sub(self.permits.available_permits())
    }

    pub fn is_accepting(&self) -> bool {
        *self.lifecycle.borrow() == Lifecycle::Running
    }

    /// Score one sample
    pub async fn dispatch(&self, sample: &NormalizedSample) -> Result<PredictionResult, DispatchError> {
        let mut lifecycle = self.lifecycle.subscribe();
        if *lifecycle.borrow_and_update() != Lifecycle::Running {
            return Err(DispatchError::ShuttingDown);
        }

        tokio::select! {
            outcome = self.admit_and_score(sample) => outcome,
            _ = stopped(&mut lifecycle) => Err(DispatchError::ShuttingDown),
        }
    }

    /// Score a batch with at most `max_concurrency` of its samples pending
    /// at once; outcomes keep input order.
    ///
    /// A sample only starts its queue wait once an earlier one has finished,
    /// so a large batch never times out against itself.
    pub async fn dispatch_batch(
        &self,
        samples: &[NormalizedSample],
    ) -> Vec<Result<PredictionResult, DispatchError>> {
        // Boxed so the closure's higher-ranked type doesn't leak into callers'
        // `Send` checks (axum handlers).
        let outcomes: BoxFuture<'_, Vec<Result<PredictionResult, DispatchError>>> = Box::pin(
            stream::iter(samples)
                .map(|sample| self.dispatch(sample))
                .buffered(self.config.max_concurrency.max(1))
                .collect(),
        );
        outcomes.await
    }

    async fn admit_and_score(&self, sample: &NormalizedSample) -> Result<PredictionResult, DispatchError> {
        let permit = match tokio::time::timeout(
            self.config.queue_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(DispatchError::ShuttingDown),
            Err(_elapsed) => {
                tracing::warn!(
                    sample_id = %sample.id,
                    capacity = self.config.max_concurrency,
                    "No scoring slot within {:?}",
                    self.config.queue_timeout
                );
                return Err(DispatchError::Overloaded(self.config.queue_timeout));
            }
        };

        let backend = Arc::clone(&self.backend);
        let owned = sample.clone();
        // The permit moves into the blocking task so a hung backend keeps its
        // slot until it actually returns.
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            backend.score(&owned)
        });

        match tokio::time::timeout(self.config.score_timeout, task).await {
            Ok(Ok(Ok(raw))) => Ok(assembler::assemble(sample.id.clone(), raw, Utc::now())),
            Ok(Ok(Err(e))) => {
                tracing::warn!(sample_id = %sample.id, "Backend error: {}", e);
                Err(DispatchError::Inference(e.to_string()))
            }
            Ok(Err(join_err)) => {
                let reason = if join_err.is_panic() {
                    "scoring backend crashed"
                } else {
                    "scoring task was cancelled"
                };
                tracing::error!(sample_id = %sample.id, "{}", reason);
                Err(DispatchError::Inference(reason.to_string()))
            }
            Err(_elapsed) => {
                tracing::warn!(sample_id = %sample.id, "Backend timed out after {:?}", self.config.score_timeout);
                Err(DispatchError::Inference(format!(
                    "scoring backend timed out after {:?}",
                    self.config.score_timeout
                )))
            }
        }
    }

    /// Stop admitting work, wait up to `grace` for in-flight calls, then fail
    /// whatever is left with `ShuttingDown`.
    pub async fn shutdown(&self, grace: Duration) {
        self.lifecycle.send_replace(Lifecycle::Draining);
        tracing::info!(in_flight = self.in_flight(), "Draining dispatcher (grace {:?})", grace);

        let all = u32::try_from(self.config.max_concurrency).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.permits.acquire_many(all)).await {
            Ok(Ok(_drained)) => tracing::info!("Dispatcher drained"),
            Ok(Err(_closed)) => {}
            Err(_elapsed) => tracing::warn!(
                in_flight = self.in_flight(),
                "Grace period elapsed, failing remaining calls"
            ),
        }

        self.lifecycle.send_replace(Lifecycle::Stopped);
        self.permits.close();
    }
}

async fn stopped(lifecycle: &mut watch::Receiver<Lifecycle>) {
    // An error means the sender is gone, which only happens on teardown
    let _ = lifecycle.wait_for(|state| *state == Lifecycle::Stopped).await;
}
