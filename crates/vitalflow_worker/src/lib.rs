//! VitalFlow intake worker.
//!
//! Wires the dedup gate, payload store, quality validator, processor router
//! and output sinks into a [`Pipeline`], and drives it from a
//! [`MessageSource`] with bounded concurrency in [`Worker`].

pub mod config;
pub mod decode;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod worker;

pub use config::WorkerConfig;
pub use decode::{DecodeError, JsonRecordDecoder, RecordDecoder};
pub use metrics::{Metrics, MetricsSnapshot, Stage};
pub use pipeline::{Outcome, Pipeline, PipelineError, PipelineParts};
pub use retry::{FailureKind, RetryConfig, RetryDecision, RetryPolicy};
pub use source::{
    Delivery, MemoryMessageSource, MessageSource, SourceError, SourceResult,
    SpoolDirectorySource,
};
pub use worker::{Worker, WorkerOptions};
