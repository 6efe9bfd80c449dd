use crate::error::Result;
use vitalflow_protocol::{DataType, MessageContext, ProcessingResult, Record, ValidationResult};

/// A data-type-specific analysis step.
///
/// `initialize` runs exactly once, inside [`crate::ProcessorRegistry::build`],
/// before the processor is shared. `process` takes `&self` and must not
/// rely on interior mutation.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn data_type(&self) -> DataType;

    fn initialize(&mut self) -> Result<()>;

    /// Analyze one decoded batch.
    ///
    /// Returns `Ok` with `success = false` for expected domain failures;
    /// `Err` only for faults.
    fn process(
        &self,
        records: &[Record],
        context: &MessageContext,
        validation: &ValidationResult,
    ) -> Result<ProcessingResult>;
}
