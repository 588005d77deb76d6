//! Error types for engine construction and control.
//!
//! The render path never produces errors; everything here is raised at the
//! configuration or control boundary.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Sample rate outside the supported window.
    #[error("invalid sample rate: {rate} Hz (supported: {min}-{max} Hz)")]
    InvalidSampleRate { rate: f64, min: f64, max: f64 },

    /// Drawbar registration with the wrong number of entries.
    #[error("drawbar registration needs {expected} levels, got {found}")]
    RegistrationLength { expected: usize, found: usize },

    /// Drawbar level above the top stop.
    #[error("drawbar {index} level {level} out of range (0-8)")]
    DrawbarLevel { index: usize, level: u8 },

    /// Configuration value outside its documented range.
    #[error("invalid config parameter '{name}': {message}")]
    InvalidConfig { name: String, message: String },

    /// Control event dropped because the render side has not drained the queue.
    #[error("control queue full, event dropped")]
    QueueFull,

    /// Control event dropped because the engine has been torn down.
    #[error("engine disconnected, event dropped")]
    Disconnected,
}

impl EngineError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            message: message.into(),
        }
    }
}
