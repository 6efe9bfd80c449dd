//! Processor registry (startup builder) and router (read-only lookup).

use crate::activity::ActivityProcessor;
use crate::config::ProcessorsConfig;
use crate::error::{ProcessorError, Result};
use crate::fallback::FallbackProcessor;
use crate::glucose::GlucoseProcessor;
use crate::heart_rate::HeartRateProcessor;
use crate::processor::Processor;
use crate::sleep::SleepProcessor;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use vitalflow_protocol::DataType;

/// Collects processors before startup completes.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<DataType, Box<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four built-in processors.
    pub fn with_defaults(config: &ProcessorsConfig) -> Result<Self> {
        config.validate()?;
        let mut registry = Self::new();
        registry.register(Box::new(GlucoseProcessor::new(config.glucose.clone())));
        registry.register(Box::new(HeartRateProcessor::new(config.heart_rate.clone())));
        registry.register(Box::new(SleepProcessor::new(config.sleep.clone())));
        registry.register(Box::new(ActivityProcessor::new(config.activity.clone())));
        Ok(registry)
    }

    /// Register a processor under its own data type, replacing any previous one.
    pub fn register(&mut self, processor: Box<dyn Processor>) -> &mut Self {
        let data_type = processor.data_type();
        debug!("Registering processor '{}' for {}", processor.name(), data_type);
        self.processors.insert(data_type, processor);
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Initialize every processor once and freeze the map.
    pub fn build(self) -> Result<ProcessorRouter> {
        let mut processors: HashMap<DataType, Arc<dyn Processor>> =
            HashMap::with_capacity(self.processors.len());
        for (data_type, mut processor) in self.processors {
            processor
                .initialize()
                .map_err(|e| match e {
                    ProcessorError::Initialization { .. } => e,
                    other => ProcessorError::Initialization {
                        processor: processor.name().to_string(),
                        reason: other.to_string(),
                    },
                })?;
            processors.insert(data_type, Arc::from(processor));
        }
        info!("Processor router ready with {} processors", processors.len());
        Ok(ProcessorRouter {
            processors,
            fallback: Arc::new(FallbackProcessor::new()),
        })
    }
}

/// Immutable data-type to processor map.
#[derive(Clone)]
pub struct ProcessorRouter {
    processors: HashMap<DataType, Arc<dyn Processor>>,
    fallback: Arc<dyn Processor>,
}

impl ProcessorRouter {
    /// Registered processor for `data_type`, or a fallback for anything unknown.
    pub fn get_processor(&self, data_type: &DataType) -> Arc<dyn Processor> {
        match self.processors.get(data_type) {
            Some(processor) => Arc::clone(processor),
            None => Arc::clone(&self.fallback),
        }
    }

    pub fn has_processor(&self, data_type: &DataType) -> bool {
        self.processors.contains_key(data_type)
    }

    /// Registered types in name order.
    pub fn registered_types(&self) -> Vec<DataType> {
        let mut types: Vec<DataType> = self.processors.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for ProcessorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRouter")
            .field("registered_types", &self.registered_types())
            .finish()
    }
}
