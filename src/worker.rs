use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;

use crate::classifier::{Category, ClassificationError, Classifier, Scores};
use crate::config::Config;
use crate::db::{self, StoreError};
use crate::decision::{Decision, DecisionPolicy};
use crate::download::Downloader;
use crate::models::ClaimedImage;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub lease_timeout: Duration,
    pub idle_backoff: Duration,
    pub classify_timeout: Duration,
    pub policy: DecisionPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lease_timeout: config.lease_timeout,
            idle_backoff: config.idle_backoff,
            classify_timeout: config.classifier.timeout,
            policy: config.policy,
        }
    }
}

/// Outcome of evaluating one image, before it is written back.
#[derive(Debug)]
struct Verdict {
    decision: Decision,
    diagnostic: Option<String>,
}

impl Verdict {
    fn review(reason: String) -> Self {
        Self {
            decision: Decision::MANUAL_REVIEW,
            diagnostic: Some(reason),
        }
    }
}

/// Single-item-at-a-time consumer of the `images` queue.
pub struct Worker {
    pool: PgPool,
    downloader: Arc<dyn Downloader>,
    classifier: Arc<dyn Classifier>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        downloader: Arc<dyn Downloader>,
        classifier: Arc<dyn Classifier>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            pool,
            downloader,
            classifier,
            settings,
        }
    }

    /// Spawn the polling loop. It stops once `shutdown` flips to true or its
    /// sender goes away.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Poll the queue until shutdown. Shutdown is only observed before a claim
    /// and while idling; an item that has been claimed is always finished.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {
                    tracing::debug!(
                        "No pending images, sleeping for {:?}",
                        self.settings.idle_backoff
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to claim image: {e}");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.idle_backoff) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Worker stopped");
    }

    /// Claim and fully process one image. Returns false when nothing was
    /// eligible. Only a failed claim is reported as an error.
    pub async fn process_next(self: &Arc<Self>) -> Result<bool, StoreError> {
        let Some(item) = db::images::claim_next(&self.pool, self.settings.lease_timeout).await?
        else {
            return Ok(false);
        };

        let id = item.id;
        tracing::info!("Processing image {id}: {}", item.download_url);

        // Evaluation runs in its own task so a panic is contained to this item.
        let worker = Arc::clone(self);
        let verdict = match tokio::spawn(async move { worker.evaluate(&item).await }).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::error!("Processing of image {id} aborted, routing to review: {e}");
                Verdict::review(format!("processing aborted: {e}"))
            }
        };

        self.record(id, verdict).await;
        Ok(true)
    }

    async fn evaluate(&self, item: &ClaimedImage) -> Verdict {
        let resource = match self.downloader.fetch(&item.download_url).await {
            Ok(resource) => resource,
            Err(e) => {
                tracing::warn!(
                    "Download failed for image {}, routing to review: {e}",
                    item.id
                );
                return Verdict::review(format!("download failed: {e}"));
            }
        };

        let classified = tokio::time::timeout(
            self.settings.classify_timeout,
            self.classifier.classify(&resource),
        )
        .await
        .unwrap_or(Err(ClassificationError::Timeout(self.settings.classify_timeout)));

        drop(resource);

        let scores = match classified {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(
                    "Classification failed for image {}, routing to review: {e}",
                    item.id
                );
                return Verdict::review(format!("classification failed: {e}"));
            }
        };

        match self.settings.policy.decide(&scores) {
            Ok(decision) => {
                log_scores(item.id, &scores);
                Verdict {
                    decision,
                    diagnostic: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Unusable scores for image {}, routing to review: {e}",
                    item.id
                );
                Verdict::review(format!("classification failed: {e}"))
            }
        }
    }

    async fn record(&self, id: i64, verdict: Verdict) {
        let Verdict {
            decision,
            diagnostic,
        } = verdict;

        match db::images::complete(
            &self.pool,
            id,
            decision.status,
            decision.needs_review,
            diagnostic.as_deref(),
        )
        .await
        {
            Ok(()) => {
                tracing::info!(
                    "Image {id} processed - status: {}, needs_review: {}",
                    decision.status,
                    decision.needs_review
                );
            }
            Err(StoreError::AlreadyCompleted(_)) => {
                tracing::warn!("Image {id} was already completed by another worker");
            }
            Err(e) => {
                tracing::error!("Failed to complete image {id}, leaving it for lease expiry: {e}");
            }
        }
    }
}

fn log_scores(id: i64, scores: &Scores) {
    let score = |c: Category| scores.get(c).unwrap_or_default();
    tracing::info!(
        "Image {id} scores - porn: {:.3}, sexy: {:.3}, hentai: {:.3}",
        score(Category::Porn),
        score(Category::Sexy),
        score(Category::Hentai)
    );
}
