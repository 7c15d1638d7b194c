//! Error taxonomy for the course structure pipeline.

use std::fmt;

use thiserror::Error;

use crate::models::UsageKey;

/// Which half of a transformation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Collect,
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Collect => f.write_str("collect"),
            Phase::Apply => f.write_str("apply"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or cyclic block hierarchy.
    #[error("Structural error at {usage_key}: {message}")]
    Structural { usage_key: UsageKey, message: String },

    /// Unknown or misconfigured transformation id or inheritance policy.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Course or root block absent from the content store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cache backend read/write failure.
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A transformation raised during collect or apply.
    #[error("Transformation '{id}' failed during {phase}: {source}")]
    Transformation {
        id: String,
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn structural(usage_key: &UsageKey, message: impl Into<String>) -> Self {
        Error::Structural {
            usage_key: usage_key.clone(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
