//! Custom error types for the frontend.
//!
//! The readout path (synthesis, encoding, event production) has no error
//! taxonomy of its own: sample values are clamped, missing configuration keys
//! are defaulted and an inactive run yields a zero-length event. Errors only
//! surface at the edges, where configuration is loaded or a finished event is
//! read back.
//!
//! ## Error Hierarchy
//!
//! `DaqError` consolidates the edge failures:
//!
//! - **`Config`**: the application settings file or environment could not be
//!   parsed (wraps `figment::Error`).
//! - **`Configuration`**: values that parse but cannot drive acquisition, such
//!   as a zero sampling clock.
//! - **`Store`**: the hierarchical configuration store holds a value of the
//!   wrong type, or a path is malformed.
//! - **`Bank`**: an event buffer handed back for decoding is malformed.

use thiserror::Error;

use crate::bank::BankError;
use crate::store::StoreError;

/// Convenience alias for results using the frontend error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the frontend.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings file or environment parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but is not usable for acquisition.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration store access failed.
    #[error("Configuration store error: {0}")]
    Store(#[from] StoreError),

    /// Event buffer could not be decoded.
    #[error("Event buffer error: {0}")]
    Bank(#[from] BankError),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl DaqError {
    /// Whether the host can retry the failed transition after fixing the store.
    ///
    /// Store and validation failures leave the previous configuration snapshot
    /// in effect, so a later run start may succeed once the offending value
    /// has been corrected.
    pub fn can_recover(&self) -> bool {
        matches!(self, DaqError::Store(_) | DaqError::Configuration(_))
    }
}
