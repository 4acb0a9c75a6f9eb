//! Custom error types for the attribute engine.
//!
//! This module defines the primary error type, `DaqError`, used by every part of
//! the engine. Using the `thiserror` crate, it provides a single place where the
//! failure modes of attribute registration, client reads/writes and hardware
//! access are spelled out.
//!
//! ## Error Hierarchy
//!
//! - **Validation** (`NotFound`, `TypeMismatch`, `UnknownSymbol`,
//!   `ReadOnlyViolation`): rejected synchronously, before any hardware call.
//! - **Translation** (`UnmappedCode`): the detector reported an enum code that
//!   has no symbolic counterpart. Never silently defaulted.
//! - **Hardware** (`HardwareAccess`): wraps an [`AccessorError`] together with the
//!   command that failed.
//! - **Construction** (`Topology`, `DuplicateName`, `RegistrationClosed`,
//!   `InvalidTranslation`, `InvalidBinding`, `InvalidGroup`): contract violations
//!   found while building the attribute set. These are fatal at start-up.
//! - **`Config`**: wraps errors from `figment` while loading the engine
//!   configuration.

use thiserror::Error;

use crate::accessor::AccessorError;

/// Convenience alias for results using the engine error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum DaqError {
    #[error("Unknown attribute or command '{0}'")]
    NotFound(String),

    #[error("Type mismatch for '{attribute}': expected {expected}, got {actual}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        actual: String,
    },

    #[error("'{symbol}' is not a valid value for '{attribute}'")]
    UnknownSymbol { attribute: String, symbol: String },

    #[error("Hardware code {code} for '{attribute}' has no symbolic value")]
    UnmappedCode { attribute: String, code: i64 },

    #[error("Attribute '{0}' is read-only")]
    ReadOnlyViolation(String),

    #[error("Hardware access failed for '{command}': {source}")]
    HardwareAccess {
        command: String,
        #[source]
        source: AccessorError,
    },

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Attribute '{0}' is already registered")]
    DuplicateName(String),

    #[error("Registry is sealed; cannot register '{0}'")]
    RegistrationClosed(String),

    #[error("Invalid enum translation: {0}")]
    InvalidTranslation(String),

    #[error("Invalid binding for '{attribute}': {reason}")]
    InvalidBinding { attribute: String, reason: String },

    #[error("Invalid composite group '{group}': {reason}")]
    InvalidGroup { group: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl DaqError {
    pub(crate) fn hardware(command: impl Into<String>, source: AccessorError) -> Self {
        DaqError::HardwareAccess {
            command: command.into(),
            source,
        }
    }

    /// True for errors that are rejected before the accessor is ever called.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DaqError::NotFound(_)
                | DaqError::TypeMismatch { .. }
                | DaqError::UnknownSymbol { .. }
                | DaqError::ReadOnlyViolation(_)
        )
    }

    /// True for construction-time contract violations that must abort start-up.
    pub fn is_fatal_at_init(&self) -> bool {
        matches!(
            self,
            DaqError::Topology(_)
                | DaqError::DuplicateName(_)
                | DaqError::RegistrationClosed(_)
                | DaqError::InvalidTranslation(_)
                | DaqError::InvalidBinding { .. }
                | DaqError::InvalidGroup { .. }
        )
    }
}
