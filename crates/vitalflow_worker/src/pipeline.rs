//! Per-message handling: dedup claim, fetch, decode, validate, process,
//! output, and the retry/quarantine/dead-letter decision on failure.
//!
//! Every delivery ends in exactly one `ack`, `nack`, `defer` or `dead_letter`
//! on the source, and a claimed dedup record always leaves `processing`
//! unless the task is aborted mid-flight.

use crate::decode::{DecodeError, RecordDecoder};
use crate::metrics::{Metrics, Stage};
use crate::retry::{reasons, FailureKind, RetryDecision, RetryPolicy};
use crate::source::{Delivery, MessageSource};
use chrono::Utc;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use vitalflow_db::{ClaimOutcome, DedupGate};
use vitalflow_processors::{ProcessorError, ProcessorRouter};
use vitalflow_protocol::{MessageContext, ProcessingResult, ValidationResult};
use vitalflow_quality::QualityValidator;
use vitalflow_sinks::{
    ArtifactSink, ObjectStore, OutputFormatter, QuarantineManager, SinkError, StorageLocator,
    StoreError,
};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid storage locator: {0}")]
    InvalidLocator(#[source] StoreError),

    #[error("Dedup store unavailable: {0}")]
    DedupUnavailable(String),

    #[error("Payload fetch failed: {0}")]
    Fetch(#[source] StoreError),

    #[error("Payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Payload decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Processor fault: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Processor panicked: {0}")]
    Panic(String),

    #[error("Artifact output failed: {0}")]
    Output(#[source] SinkError),

    #[error("Quarantine failed: {0}")]
    Quarantine(#[source] SinkError),
}

impl PipelineError {
    /// Classification fed to the retry policy.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::InvalidLocator(_) => FailureKind::MalformedInput,
            PipelineError::DedupUnavailable(_) => FailureKind::Transient,
            PipelineError::Fetch(StoreError::InvalidKey(_))
            | PipelineError::Fetch(StoreError::InvalidLocator(_)) => FailureKind::MalformedInput,
            PipelineError::Fetch(_) => FailureKind::Transient,
            PipelineError::PayloadTooLarge { .. } => FailureKind::ResourceExceeded,
            PipelineError::Decode(_) => FailureKind::MalformedInput,
            PipelineError::Processor(_) | PipelineError::Panic(_) => FailureKind::Internal,
            PipelineError::Output(SinkError::Store(_))
            | PipelineError::Output(SinkError::Io { .. }) => FailureKind::Transient,
            PipelineError::Output(_) => FailureKind::Internal,
            PipelineError::Quarantine(_) => FailureKind::Transient,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Artifact written, record completed, acked
    Completed,
    /// This correlation id already completed; acked
    Duplicate,
    /// Another worker holds a live claim; put back unchanged for a recheck
    Deferred,
    /// Payload and reason written to quarantine; record failed, acked
    Quarantined,
    /// Processor returned `success = false`; record failed, acked
    ProcessorFailed,
    /// Nacked for redelivery after backoff
    Retried,
    DeadLettered,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Duplicate => "duplicate",
            Outcome::Deferred => "deferred",
            Outcome::Quarantined => "quarantined",
            Outcome::ProcessorFailed => "processor_failed",
            Outcome::Retried => "retried",
            Outcome::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Everything a [`Pipeline`] needs, wired by the caller.
pub struct PipelineParts {
    pub gate: DedupGate,
    pub payload_store: Arc<dyn ObjectStore>,
    pub decoder: Arc<dyn RecordDecoder>,
    pub validator: QualityValidator,
    pub router: ProcessorRouter,
    pub formatter: OutputFormatter,
    pub artifact_sink: Arc<dyn ArtifactSink>,
    pub quarantine: QuarantineManager,
    pub retry: RetryPolicy,
    pub source: Arc<dyn MessageSource>,
    pub metrics: Arc<Metrics>,
    pub max_payload_bytes: u64,
    /// How long a delivery waits before rechecking a claim held elsewhere
    pub in_flight_recheck: Duration,
}

pub struct Pipeline {
    gate: DedupGate,
    payload_store: Arc<dyn ObjectStore>,
    decoder: Arc<dyn RecordDecoder>,
    validator: QualityValidator,
    router: ProcessorRouter,
    formatter: OutputFormatter,
    artifact_sink: Arc<dyn ArtifactSink>,
    quarantine: QuarantineManager,
    retry: RetryPolicy,
    source: Arc<dyn MessageSource>,
    metrics: Arc<Metrics>,
    max_payload_bytes: u64,
    in_flight_recheck: Duration,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("dedup_backend", &self.gate.backend_name())
            .field("payload_store", &self.payload_store.backend_name())
            .field("decoder", &self.decoder.name())
            .field("artifact_sink", &self.artifact_sink.backend_name())
            .field("source", &self.source.name())
            .field("router", &self.router)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("in_flight_recheck", &self.in_flight_recheck)
            .finish()
    }
}

/// A fetched payload and where it came from.
struct Payload<'a> {
    locator: &'a StorageLocator,
    bytes: &'a [u8],
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            gate: parts.gate,
            payload_store: parts.payload_store,
            decoder: parts.decoder,
            validator: parts.validator,
            router: parts.router,
            formatter: parts.formatter,
            artifact_sink: parts.artifact_sink,
            quarantine: parts.quarantine,
            retry: parts.retry,
            source: parts.source,
            metrics: parts.metrics,
            max_payload_bytes: parts.max_payload_bytes,
            in_flight_recheck: parts.in_flight_recheck,
        }
    }

    pub fn gate(&self) -> &DedupGate {
        &self.gate
    }

    pub fn source(&self) -> &Arc<dyn MessageSource> {
        &self.source
    }

    pub fn payload_store(&self) -> &Arc<dyn ObjectStore> {
        &self.payload_store
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Handle one delivery to completion and settle it on the source.
    pub async fn handle(&self, delivery: Delivery) -> Outcome {
        let span = info_span!(
            "message",
            correlation_id = %delivery.message.correlation_id,
            data_type = %delivery.message.data_type,
            retry_count = delivery.message.retry_count,
        );
        self.handle_inner(delivery).instrument(span).await
    }

    async fn handle_inner(&self, delivery: Delivery) -> Outcome {
        self.metrics.inc_received();
        let key = delivery.message.correlation_id.as_str();

        // First sight is bookkeeping only; the claim below decides.
        if let Err(e) = self.gate.observe(key).await {
            warn!(error = %e, "Could not record first sight of message");
        }

        match self.gate.mark_processing_started(key).await {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadyCompleted => {
                info!(decision = "duplicate", "Message already completed; dropping");
                self.metrics.inc_duplicate();
                self.ack(&delivery).await;
                return Outcome::Duplicate;
            }
            ClaimOutcome::InFlight => return self.defer(&delivery).await,
            ClaimOutcome::StoreUnavailable { error } => {
                let err = PipelineError::DedupUnavailable(error);
                return self.settle_failure(&delivery, err, None, false).await;
            }
        }

        let locator = match StorageLocator::parse(&delivery.message.storage_locator) {
            Ok(locator) => locator,
            Err(e) => {
                return self
                    .settle_failure(&delivery, PipelineError::InvalidLocator(e), None, true)
                    .await
            }
        };

        let bytes = match self.fetch(&locator).await {
            Ok(bytes) => bytes,
            Err(e) => return self.settle_failure(&delivery, e, None, true).await,
        };

        let payload = Payload {
            locator: &locator,
            bytes: &bytes,
        };
        match self.analyze(&delivery, &payload).await {
            Ok(outcome) => outcome,
            Err(e) => self.settle_failure(&delivery, e, Some(&payload), true).await,
        }
    }

    async fn fetch(&self, locator: &StorageLocator) -> Result<Vec<u8>, PipelineError> {
        let started = Instant::now();
        let result = self
            .payload_store
            .get(&locator.bucket, &locator.key)
            .await
            .map_err(PipelineError::Fetch);
        self.metrics.record_stage(Stage::Fetch, started);
        let bytes = result?;

        let size = bytes.len() as u64;
        if size > self.max_payload_bytes {
            return Err(PipelineError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }
        debug!(locator = %locator, bytes = size, "Fetched payload");
        Ok(bytes)
    }

    /// Decode through output. Errors are settled by the caller.
    async fn analyze(
        &self,
        delivery: &Delivery,
        payload: &Payload<'_>,
    ) -> Result<Outcome, PipelineError> {
        let message = &delivery.message;
        let context = message.context();

        let started = Instant::now();
        let decoded = self.decoder.decode(payload.bytes);
        self.metrics.record_stage(Stage::Decode, started);
        let records = decoded?;

        let started = Instant::now();
        let validation =
            self.validator
                .validate(&records, &message.data_type, payload.bytes.len() as u64);
        self.metrics.record_stage(Stage::Validate, started);

        if !validation.is_valid {
            info!(
                decision = "quarantine",
                quality_score = validation.quality_score,
                errors = ?validation.errors,
                "Batch failed quality validation"
            );
            return self
                .quarantine_and_settle(delivery, payload, &validation)
                .await
                .map_err(PipelineError::Quarantine);
        }

        let processor = self.router.get_processor(&message.data_type);
        let started = Instant::now();
        let processed = catch_unwind(AssertUnwindSafe(|| {
            processor.process(&records, &context, &validation)
        }));
        let elapsed = started.elapsed();
        self.metrics.record_stage(Stage::Process, started);

        let result = match processed {
            Ok(result) => result?.with_processing_time(elapsed),
            Err(panic) => return Err(PipelineError::Panic(panic_message(panic.as_ref()))),
        };

        if !result.success {
            let reason = result.error_message.as_deref().unwrap_or("unspecified");
            warn!(
                decision = "processor_failed",
                processor = processor.name(),
                reason,
                "Processor reported failure"
            );
            self.mark_failed(&message.correlation_id).await;
            self.metrics.inc_failed();
            self.ack(delivery).await;
            return Ok(Outcome::ProcessorFailed);
        }

        let started = Instant::now();
        let written = self.write_artifact(&result, &context).await;
        self.metrics.record_stage(Stage::Output, started);
        written?;

        if let Err(e) = self.gate.mark_processing_completed(&message.correlation_id).await {
            // Artifact is already written; the record converges via TTL.
            error!(error = %e, "Could not mark record completed after output");
        }
        self.metrics.inc_processed();
        self.ack(delivery).await;
        info!(
            decision = "completed",
            processor = processor.name(),
            records = result.records_processed,
            quality_score = result.quality_score,
            processing_time_ms = elapsed.as_millis() as u64,
            "Message processed"
        );
        Ok(Outcome::Completed)
    }

    async fn write_artifact(
        &self,
        result: &ProcessingResult,
        context: &MessageContext,
    ) -> Result<(), PipelineError> {
        let artifact = self
            .formatter
            .format(result, context)
            .map_err(PipelineError::Output)?;
        let partition = self.formatter.partition_for(context, Utc::now());
        self.artifact_sink
            .append(&partition, &artifact)
            .await
            .map_err(PipelineError::Output)?;
        debug!(partition = %partition, "Appended training artifact");
        Ok(())
    }

    async fn quarantine_and_settle(
        &self,
        delivery: &Delivery,
        payload: &Payload<'_>,
        validation: &ValidationResult,
    ) -> Result<Outcome, SinkError> {
        let started = Instant::now();
        let placed = self
            .quarantine
            .quarantine(
                payload.locator,
                payload.bytes,
                &delivery.message.data_type,
                validation,
                Utc::now(),
            )
            .await;
        self.metrics.record_stage(Stage::Output, started);
        let placement = placed?;

        debug!(quarantined_to = %placement.payload, "Quarantine placement written");
        self.mark_failed(&delivery.message.correlation_id).await;
        self.metrics.inc_quarantined();
        self.ack(delivery).await;
        Ok(Outcome::Quarantined)
    }

    /// Route a failure through the retry policy and settle the delivery.
    async fn settle_failure(
        &self,
        delivery: &Delivery,
        err: PipelineError,
        payload: Option<&Payload<'_>>,
        claimed: bool,
    ) -> Outcome {
        let message = &delivery.message;
        let kind = err.kind();
        let mut decision = self.retry.decide(kind, message.retry_count);
        warn!(
            failure = %kind,
            decision = decision.as_str(),
            error = %err,
            "Message handling failed"
        );

        if decision == RetryDecision::Quarantine {
            if let Some(payload) = payload {
                let validation = ValidationResult::rejected(err.to_string());
                match self
                    .quarantine_and_settle(delivery, payload, &validation)
                    .await
                {
                    Ok(outcome) => return outcome,
                    Err(e) => {
                        decision = self.retry.decide(FailureKind::Transient, message.retry_count);
                        warn!(
                            error = %e,
                            decision = decision.as_str(),
                            "Quarantine of malformed payload failed"
                        );
                    }
                }
            }
        }

        if claimed {
            self.mark_failed(&message.correlation_id).await;
        }

        match decision {
            RetryDecision::Retry { delay } => {
                info!(
                    decision = "retry",
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling redelivery"
                );
                if let Err(e) = self.source.nack(delivery, delay).await {
                    error!(error = %e, "Failed to nack delivery");
                }
                self.metrics.inc_retried();
                Outcome::Retried
            }
            RetryDecision::DeadLetter { reason } => self.dead_letter(delivery, reason).await,
            RetryDecision::Quarantine => self.dead_letter(delivery, reasons::UNQUARANTINABLE).await,
        }
    }

    /// The claim is live elsewhere. An abandoned claim only converges if the
    /// message is still queued when its TTL runs out.
    async fn defer(&self, delivery: &Delivery) -> Outcome {
        info!(
            decision = "deferred",
            delay_ms = self.in_flight_recheck.as_millis() as u64,
            "Message claimed by another worker; rechecking later"
        );
        if let Err(e) = self.source.defer(delivery, self.in_flight_recheck).await {
            error!(error = %e, "Failed to defer delivery");
        }
        self.metrics.inc_deferred();
        Outcome::Deferred
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Outcome {
        error!(decision = "dead_letter", reason, "Routing message to dead letter");
        if let Err(e) = self.source.dead_letter(delivery, reason).await {
            error!(error = %e, "Failed to dead-letter delivery");
        }
        self.metrics.inc_dead_lettered();
        Outcome::DeadLettered
    }

    async fn mark_failed(&self, correlation_id: &str) {
        if let Err(e) = self.gate.mark_processing_failed(correlation_id).await {
            error!(error = %e, "Could not mark record failed");
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.source.ack(delivery).await {
            error!(error = %e, "Failed to ack delivery");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
