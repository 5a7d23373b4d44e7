use rowsheet_model::RangeParseError;
use thiserror::Error;

use crate::model::ValidationError;
use crate::store::StoreError;

/// Every fatal error names the operation that failed and the offending parameter.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("{operation}: invalid configuration: {message}")]
    Config { operation: &'static str, message: String },
    #[error("{operation}: {message}")]
    Lookup { operation: &'static str, message: String },
    #[error("{operation}: integrity violation: {message}")]
    Integrity { operation: &'static str, message: String },
    #[error("{operation}: sheet `{sheet}` still unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        operation: &'static str,
        sheet: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("{operation}: backing store error: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("{operation}: validation failed: {source}")]
    Validation {
        operation: &'static str,
        #[source]
        source: ValidationError,
    },
    #[error("{operation}: invalid range reference `{reference}`: {source}")]
    Range {
        operation: &'static str,
        reference: String,
        #[source]
        source: RangeParseError,
    },
}

pub type Result<T> = std::result::Result<T, TableError>;

impl TableError {
    pub(crate) fn config(operation: &'static str, message: impl Into<String>) -> Self {
        TableError::Config {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn lookup(operation: &'static str, message: impl Into<String>) -> Self {
        TableError::Lookup {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn integrity(operation: &'static str, message: impl Into<String>) -> Self {
        TableError::Integrity {
            operation,
            message: message.into(),
        }
    }

    /// Adapter for `map_err` on backing-store calls.
    pub(crate) fn store(operation: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| TableError::Store { operation, source }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            TableError::Config { operation, .. }
            | TableError::Lookup { operation, .. }
            | TableError::Integrity { operation, .. }
            | TableError::Unavailable { operation, .. }
            | TableError::Store { operation, .. }
            | TableError::Validation { operation, .. }
            | TableError::Range { operation, .. } => operation,
        }
    }
}
