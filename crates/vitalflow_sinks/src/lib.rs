//! Payload storage and output sinks for VitalFlow.
//!
//! - [`ObjectStore`]: byte blobs addressed by `(bucket, key)`; a local
//!   filesystem backend and an in-memory backend for tests.
//! - [`OutputFormatter`] + [`ArtifactSink`]: training artifacts appended to
//!   the partitioned NDJSON stream.
//! - [`QuarantineManager`]: all-or-nothing quarantine of rejected payloads.

pub mod artifact;
pub mod config;
mod error;
pub mod locator;
pub mod memory;
pub mod quarantine;
pub mod store;

pub use artifact::{
    ArtifactPartition, ArtifactSink, FsArtifactSink, MemoryArtifactSink, OutputFormatter,
};
pub use config::OutputConfig;
pub use error::{SinkError, SinkResult, StoreError, StoreResult};
pub use locator::StorageLocator;
pub use memory::MemoryObjectStore;
pub use quarantine::{QuarantineManager, QuarantinePlacement};
pub use store::{LocalObjectStore, ObjectStore};
