//! Error handling for scanlab
//!
//! This module defines the crate-wide error type and a Result alias.
//! Validation errors are returned synchronously by the operation that
//! detected them; device errors raised inside a running scan are attached
//! to the terminal `Errored` state of the engine.

use thiserror::Error;

/// Main error type for scanlab operations
#[derive(Error, Debug)]
pub enum ScanError {
    /// The configuration cannot be used to start a scan
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Sweep range preconditions failed (e.g. non-positive bound in log mode)
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Sweep step or point count preconditions failed
    #[error("Invalid step: {0}")]
    InvalidStep(String),

    /// A variable expression refers to the variable being defined
    #[error("Circular reference: variable '{0}' cannot be used in its own definition")]
    CircularReference(String),

    /// A name is already taken in the target scope
    #[error("Name conflict: '{0}' already exists")]
    NameConflict(String),

    /// A named entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A device element call failed
    #[error("Device error at '{address}': {message}")]
    Device { address: String, message: String },

    /// A configuration document could not be imported
    #[error("Import error: {0}")]
    Import(String),

    /// A mutation was attempted while a scan is running
    #[error("Scan in progress: {0}")]
    Busy(String),

    /// A scan control operation is not valid in the current state
    #[error("Invalid scan state: {0}")]
    InvalidState(String),

    /// Errors related to Rhai expression evaluation
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ScanError>,
    },
}

impl ScanError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ScanError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a device error for the element at `address`
    pub fn device(address: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ScanError::Device {
            address: address.into(),
            message: message.to_string(),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        ScanError::Script(err.to_string())
    }

    /// Strip any context wrappers and return the innermost error
    pub fn root(&self) -> &ScanError {
        match self {
            ScanError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(err: toml::de::Error) -> Self {
        ScanError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for ScanError {
    fn from(err: toml::ser::Error) -> Self {
        ScanError::Serialization(err.to_string())
    }
}

/// Result type alias for scanlab operations
pub type Result<T> = std::result::Result<T, ScanError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ScanError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ScanError::Io(e).with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ScanError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ScanError::from_rhai_error(e).with_context(f()))
    }
}
