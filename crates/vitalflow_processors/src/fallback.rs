//! Processor for data types nobody registered.

use crate::error::Result;
use crate::processor::Processor;
use std::time::Instant;
use tracing::warn;
use vitalflow_protocol::{DataType, MessageContext, ProcessingResult, Record, ValidationResult};

/// Name reported by [`FallbackProcessor::data_type`].
pub const UNREGISTERED_TYPE: &str = "unregistered";

/// Always answers with an unsuccessful result naming the unknown type.
///
/// One instance serves every unregistered type; the type comes from the
/// message context.
#[derive(Debug, Default)]
pub struct FallbackProcessor;

impl FallbackProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Processor for FallbackProcessor {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn data_type(&self) -> DataType {
        DataType::Other(UNREGISTERED_TYPE.to_string())
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn process(
        &self,
        records: &[Record],
        context: &MessageContext,
        validation: &ValidationResult,
    ) -> Result<ProcessingResult> {
        let started = Instant::now();
        warn!(
            correlation_id = %context.correlation_id,
            data_type = %context.data_type,
            records = records.len(),
            "No processor registered for data type"
        );
        Ok(ProcessingResult::failed(
            format!(
                "no processor registered for data type '{}' ({} records left unprocessed)",
                context.data_type,
                records.len()
            ),
            validation.quality_score,
        )
        .with_processing_time(started.elapsed()))
    }
}
