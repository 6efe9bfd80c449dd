//! Domain processors for VitalFlow.
//!
//! A [`ProcessorRouter`] is built once at startup from a
//! [`ProcessorRegistry`] and is read-only afterwards. Each data type maps to
//! one [`Processor`]; anything unregistered resolves to the
//! [`FallbackProcessor`].
//!
//! Processors share a small toolkit: typed sample extraction
//! ([`samples`]), summary statistics ([`stats`]), reference bands
//! ([`bands`]), sustained-threshold detection ([`window`]) and ordered
//! narrative assembly ([`narrative`]).

pub mod activity;
pub mod bands;
pub mod config;
mod error;
pub mod fallback;
pub mod glucose;
pub mod heart_rate;
mod insights;
pub mod narrative;
mod processor;
pub mod registry;
pub mod samples;
pub mod sleep;
pub mod stats;
pub mod window;

pub use activity::ActivityProcessor;
pub use config::ProcessorsConfig;
pub use error::{ProcessorError, Result};
pub use fallback::FallbackProcessor;
pub use glucose::GlucoseProcessor;
pub use heart_rate::HeartRateProcessor;
pub use processor::Processor;
pub use registry::{ProcessorRegistry, ProcessorRouter};
pub use sleep::SleepProcessor;
