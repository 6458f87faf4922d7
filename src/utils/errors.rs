//! Custom error types for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input (address, volume name, archive name). Aborts the
    /// current operation only.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required collaborator tool is missing. Fatal to the invocation.
    #[error("Missing dependency: {0}")]
    Dependency(String),

    /// Probe or authentication failure against a remote endpoint.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// A streaming stage (volume read, compress, copy) terminated with an
    /// error. Marks the affected job failed without touching siblings.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Post-backup verification failure. The archive is kept for inspection.
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, EngineError>;
