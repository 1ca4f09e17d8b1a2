//! Error taxonomy for the conversion pipeline.
//!
//! Validation problems are user-input errors: they are collected into a
//! single [`ValidationReport`] so one run surfaces every violation at once.
//! [`ConvertError::CyclicOrUnresolvedGraph`] is detected later, at
//! scheduling time, and is treated as fatal without cleaning up the partial
//! module already on disk.

use std::fmt;

use thiserror::Error;

/// Failure while reading or decoding a model export file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid model JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed export: {0}")]
    Malformed(String),
}

/// A single validator finding. One model can produce many of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("'{name}' is not a valid C identifier")]
    InvalidIdentifier { name: String },
    #[error("layer type '{class_name}' is not supported")]
    UnsupportedLayer { class_name: String },
    #[error("{kind} '{activation}' for layer '{layer}' is not supported")]
    UnsupportedActivation {
        layer: String,
        activation: String,
        /// "activation" or "recurrent activation"
        kind: &'static str,
    },
    #[error("{reason} for layer '{layer}' is not supported")]
    UnsupportedConfiguration { layer: String, reason: String },
}

/// Aggregate of every violation found by the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "the following errors were found:")?;
        for v in &self.violations {
            writeln!(f, "  - {v}")?;
        }
        Ok(())
    }
}

/// Top-level failure of one conversion run.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("model failed validation:\n{0}")]
    Validation(ValidationReport),
    #[error(
        "graph is cyclic or has unresolved tensors; no progress on: {}",
        stuck.join(", ")
    )]
    CyclicOrUnresolvedGraph { stuck: Vec<String> },
    #[error("reference prediction failed: {0}")]
    Reference(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
