//! Shared data model for the VitalFlow ingestion pipeline.
//!
//! Every crate in the workspace speaks these types:
//!
//! ```text
//! InboundMessage --> [dedup gate] --> Vec<Record> --> ValidationResult
//!                                                  \-> ProcessingResult --> TrainingArtifact
//!                                                  \-> QuarantineRecord
//! ```

pub mod defaults;
pub mod keys;
pub mod paths;
pub mod types;

pub use types::{
    DataType, InboundMessage, MessageContext, ProcessingRecord, ProcessingResult,
    InsightMap, ProcessingStatus, QuarantineRecord, Record, TrainingArtifact, ValidationResult,
};
