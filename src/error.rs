//! Error types for the sshid library.
//!
//! This module defines all error types used throughout the library.
//! Every variant carries the field, alias or path it concerns so a front end
//! can render a precise message without parsing strings.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// An input field of [`crate::generator::KeyGenerator::create_identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Email,
    Alias,
    Host,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Email => "email",
            Field::Alias => "alias",
            Field::Host => "host",
        };
        f.write_str(name)
    }
}

/// A single rejected input field and the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: Field,
    pub reason: String,
}

/// All field problems found while validating one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: Field, reason: impl Into<String>) {
        self.0.push(FieldError {
            field,
            reason: reason.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The rejected fields, in the order they were checked.
    pub fn fields(&self) -> Vec<Field> {
        self.0.iter().map(|e| e.field).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", err.field, err.reason)?;
        }
        Ok(())
    }
}

/// The step of a store export that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStep {
    /// Resolving and checking the destination before anything is touched.
    Prepare,
    /// Removing a `keys` directory left by an earlier export.
    RemoveExisting,
    /// Creating the new `keys` directory.
    CreateTarget,
    /// Copying store files into the new directory.
    Copy,
}

impl fmt::Display for ExportStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            ExportStep::Prepare => "prepare destination",
            ExportStep::RemoveExisting => "remove previous export",
            ExportStep::CreateTarget => "create export directory",
            ExportStep::Copy => "copy store files",
        };
        f.write_str(step)
    }
}

/// The main error type for sshid operations.
#[derive(Error, Debug)]
pub enum SshIdError {
    /// One or more request fields are missing or malformed. Nothing was written.
    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    /// The alias cannot be used as a file name or config token
    #[error("Invalid alias '{alias}': {reason}")]
    InvalidAlias { alias: String, reason: String },

    /// The registry already holds a record for this alias
    #[error("Alias '{0}' is already registered")]
    DuplicateAlias(String),

    /// A key file for this alias is already on disk
    #[error("Key already exists at {}", path.display())]
    KeyAlreadyExists { path: PathBuf },

    /// The external key generator exited unsuccessfully or produced no key pair
    #[error("Key generation failed for {}: {reason}", path.display())]
    KeyGenerationFailed { path: PathBuf, reason: String },

    /// The external key generator did not finish in time and was killed
    #[error("Key generation for {} timed out after {}s", path.display(), timeout.as_secs_f64())]
    KeyGenerationTimeout { path: PathBuf, timeout: Duration },

    /// The connection config could not be written; key files were kept
    #[error("Failed to write connection config for '{alias}' (host {host}, identity {}): {source}", identity_file.display())]
    ConfigWrite {
        alias: String,
        host: String,
        identity_file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The registry could not be written; the previous document is untouched
    #[error("Failed to write registry {} for '{alias}': {source}", path.display())]
    RegistryWrite {
        alias: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The registry document exists but does not parse
    #[error("Registry {} is corrupt: {source}", path.display())]
    CorruptRegistry {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Export could not write into the destination
    #[error("Cannot export to {} ({step}): {source}", path.display())]
    DestinationUnwritable {
        path: PathBuf,
        step: ExportStep,
        #[source]
        source: std::io::Error,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage I/O error
    #[error("Storage I/O error: {0}")]
    Storage(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for sshid operations.
pub type Result<T> = std::result::Result<T, SshIdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SshIdError::DuplicateAlias("origin".to_string());
        assert_eq!(err.to_string(), "Alias 'origin' is already registered");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SshIdError>();
    }

    #[test]
    fn test_validation_errors_list_every_field() {
        let mut errors = ValidationErrors::default();
        errors.push(Field::Email, "must not be empty");
        errors.push(Field::Host, "must not contain whitespace");

        assert_eq!(errors.fields(), vec![Field::Email, Field::Host]);
        assert_eq!(
            SshIdError::Validation(errors).to_string(),
            "Validation error: email: must not be empty; host: must not contain whitespace"
        );
    }

    #[test]
    fn test_export_error_names_step() {
        let err = SshIdError::DestinationUnwritable {
            path: PathBuf::from("/backup/keys"),
            step: ExportStep::RemoveExisting,
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("remove previous export"));
    }
}
