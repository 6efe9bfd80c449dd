//! Intake loop: bounded concurrent handling of deliveries from one source.
//!
//! A delivery is only pulled from the source once a concurrency permit is
//! held, so the source itself is the buffer. On cancellation in-flight tasks
//! are aborted; their dedup records stay `processing` until the TTL expires
//! and the transport redelivers.

use crate::config::WorkerConfig;
use crate::decode::JsonRecordDecoder;
use crate::health::{self, HealthState};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pipeline::{Pipeline, PipelineParts};
use crate::retry::RetryPolicy;
use crate::source::{MessageSource, SpoolDirectorySource};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vitalflow_db::DedupGate;
use vitalflow_processors::ProcessorRegistry;
use vitalflow_quality::QualityValidator;
use vitalflow_sinks::{
    FsArtifactSink, LocalObjectStore, ObjectStore, OutputFormatter, QuarantineManager,
};

/// Pause after a failed `recv` before asking again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: usize,
    pub cleanup_interval: Duration,
    /// Serve `/health` and `/metrics` here
    pub health_bind: Option<String>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: vitalflow_protocol::defaults::DEFAULT_CONCURRENCY,
            cleanup_interval: Duration::from_secs(
                vitalflow_protocol::defaults::DEFAULT_CLEANUP_INTERVAL_SECS,
            ),
            health_bind: None,
        }
    }
}

pub struct Worker {
    pipeline: Arc<Pipeline>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(pipeline: Pipeline, options: WorkerOptions) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            options,
        }
    }

    /// Wire every collaborator from configuration.
    pub async fn from_config(config: &WorkerConfig) -> Result<Self> {
        config.validate()?;

        let gate = DedupGate::connect(&config.dedup.url, config.dedup.ttl())
            .await
            .context("Failed to connect dedup store")?;

        let payload_store: Arc<dyn ObjectStore> = Arc::new(
            LocalObjectStore::open(&config.output.payload_root)
                .await
                .context("Failed to open payload store")?,
        );

        let validator =
            QualityValidator::new(config.quality.clone()).context("Invalid quality config")?;

        let router = ProcessorRegistry::with_defaults(&config.processors)
            .and_then(ProcessorRegistry::build)
            .context("Failed to build processor router")?;

        let source: Arc<dyn MessageSource> = Arc::new(
            SpoolDirectorySource::open(&config.source.spool_dir, config.source.poll_interval())
                .await
                .context("Failed to open spool directory")?
                .exit_when_empty(config.source.exit_when_empty),
        );

        let quarantine = QuarantineManager::new(
            payload_store.clone(),
            &config.output.quarantine_bucket,
            &config.output.quarantine_namespace,
        );

        let pipeline = Pipeline::new(PipelineParts {
            gate,
            payload_store,
            decoder: Arc::new(JsonRecordDecoder),
            validator,
            router,
            formatter: OutputFormatter::new(config.output.clone()),
            artifact_sink: Arc::new(FsArtifactSink::from_config(&config.output)),
            quarantine,
            retry: RetryPolicy::new(config.retry.clone()),
            source,
            metrics: Arc::new(Metrics::new()),
            max_payload_bytes: config.worker.max_payload_bytes,
            in_flight_recheck: config.dedup.in_flight_recheck(),
        });

        info!(
            worker_id = %config.worker.worker_id,
            concurrency = config.worker.concurrency,
            dedup_backend = pipeline.gate().backend_name(),
            "Worker configured"
        );

        Ok(Self::new(
            pipeline,
            WorkerOptions {
                concurrency: config.worker.concurrency,
                cleanup_interval: config.dedup.cleanup_interval(),
                health_bind: config.health.enabled.then(|| config.health.bind.clone()),
            },
        ))
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.pipeline.metrics().clone()
    }

    /// Run until the source is exhausted or `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<MetricsSnapshot> {
        let concurrency = self.options.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let background = cancel.child_token();

        let cleanup = tokio::spawn(cleanup_loop(
            self.pipeline.clone(),
            self.options.cleanup_interval,
            background.clone(),
        ));

        let health_server = self.options.health_bind.clone().map(|bind| {
            let state = HealthState {
                gate: self.pipeline.gate().clone(),
                payload_store: self.pipeline.payload_store().clone(),
                source: self.pipeline.source().clone(),
                metrics: self.pipeline.metrics().clone(),
            };
            let token = background.clone();
            tokio::spawn(async move { health::serve(&bind, state, token).await })
        });

        info!(
            source = self.pipeline.source().name(),
            concurrency,
            "Intake loop started"
        );

        let cancelled = loop {
            while let Some(joined) = tasks.try_join_next() {
                log_task_result(joined);
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break true,
                permit = semaphore.clone().acquire_owned() => {
                    permit.context("Concurrency semaphore closed")?
                }
            };

            let received = tokio::select! {
                _ = cancel.cancelled() => break true,
                received = self.pipeline.source().recv() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let pipeline = self.pipeline.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        pipeline.handle(delivery).await
                    });
                }
                Ok(None) => {
                    info!("Message source exhausted");
                    break false;
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive from message source");
                    drop(permit);
                    tokio::select! {
                        _ = cancel.cancelled() => break true,
                        _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                    }
                }
            }
        };

        if cancelled {
            warn!(in_flight = tasks.len(), "Shutdown requested; aborting in-flight messages");
            tasks.abort_all();
        } else {
            debug!(in_flight = tasks.len(), "Draining in-flight messages");
        }
        while let Some(joined) = tasks.join_next().await {
            log_task_result(joined);
        }

        background.cancel();
        if let Err(e) = cleanup.await {
            warn!(error = %e, "Cleanup task ended abnormally");
        }
        if let Some(server) = health_server {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Health endpoint failed"),
                Err(e) => warn!(error = %e, "Health task ended abnormally"),
            }
        }

        let snapshot = self.pipeline.metrics().snapshot();
        info!(
            received = snapshot.received,
            processed = snapshot.processed,
            quarantined = snapshot.quarantined,
            dead_lettered = snapshot.dead_lettered,
            retried = snapshot.retried,
            duplicates = snapshot.duplicates,
            deferred = snapshot.deferred,
            "Intake loop stopped"
        );
        Ok(snapshot)
    }
}

fn log_task_result(joined: std::result::Result<crate::pipeline::Outcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => debug!(outcome = %outcome, "Message settled"),
        Err(e) if e.is_cancelled() => debug!("Message task aborted"),
        Err(e) => error!(error = %e, "Message task panicked"),
    }
}

async fn cleanup_loop(pipeline: Arc<Pipeline>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    // First tick fires immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match pipeline.gate().cleanup_expired_records().await {
                    Ok(removed) => pipeline.metrics().add_expired_cleaned(removed),
                    Err(e) => warn!(error = %e, "Expired record cleanup failed"),
                }
            }
        }
    }
}
