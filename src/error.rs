//! Custom error types for the application.
//!
//! This module defines the primary error type, `ControlError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and consistent
//! way to handle the different kinds of failures that can occur while driving a
//! remote instrument driver, from transport problems to faults reported by the
//! driver itself.
//!
//! ## Error Hierarchy
//!
//! `ControlError` is an enum that consolidates the error sources:
//!
//! - **`Transport`**: The driver process endpoint could not be reached, or the
//!   connection failed mid-request. Background loops treat these as retryable.
//! - **`Protocol`**: The endpoint responded, but the payload was not the shape
//!   a well-formed driver produces (e.g. a state reply without a `state` key).
//! - **`Timeout`**: A state transition or wait did not complete before its
//!   deadline. Carries the name of the state that was being waited for.
//! - **`DriverFault`**: The driver answered a command with an exception event.
//!   Carries the decoded fault payload.
//! - **`Script`**: A script file could not be parsed into known commands.
//! - **`Io`** / **`Config`**: File access and YAML parsing failures for
//!   configure files and scripts.
//!
//! `reqwest` errors are split on construction: body-decode failures become
//! `Protocol`, everything else becomes `Transport`.

use serde_json::Value;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// All failure modes of the remote-control client.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The driver endpoint was unreachable or the connection dropped.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The endpoint replied with a payload that violates the driver protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A state transition or wait missed its deadline.
    #[error("Timed out waiting for driver state: {state}")]
    Timeout {
        /// Wire name of the state that was being waited for.
        state: String,
    },

    /// The driver answered a command with an exception event.
    #[error("Exception event from driver: {value}")]
    DriverFault {
        /// Decoded fault payload from the reply.
        value: Value,
    },

    /// A script file could not be parsed into known commands.
    #[error("Script error: {0}")]
    Script(String),

    /// File access failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing failure in a configure file.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl From<reqwest::Error> for ControlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ControlError::Protocol(err.to_string())
        } else {
            ControlError::Transport(err.to_string())
        }
    }
}
