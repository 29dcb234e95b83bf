//! Canonical billing model
//!
//! - [`spec`]: the fixed enumerations and column sets
//! - [`record`]: the [`FocusRecord`] every mapper produces
//! - [`validator`]: conformance checks run by the transform stage

pub mod record;
pub mod spec;
pub mod validator;

pub use record::FocusRecord;
pub use validator::{FocusValidator, Severity, ValidationIssue, ValidationResult};
