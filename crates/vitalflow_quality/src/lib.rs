//! Quality scoring for decoded sensor batches.
//!
//! [`QualityValidator::validate`] is a pure function of its inputs and the
//! configuration the validator was built with. It never touches storage.

pub mod config;
pub mod fields;
mod validator;

pub use config::{PlausibilityRange, QualityConfig, QualityError, QualityWeights};
pub use fields::{lookup_path, numeric_value, parse_timestamp};
pub use validator::QualityValidator;
