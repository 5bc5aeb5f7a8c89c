//! Relay Errors
//!
//! Typed failures for each stage of forwarding an event. Every variant is
//! caught and logged by the forwarder; none of them reach the trigger.

use thiserror::Error;

/// Errors that can occur while relaying an event
#[derive(Debug, Error)]
pub enum RelayError {
    /// The identity token could not be issued
    #[error("Identity provider error: {0}")]
    IdentityProvider(String),

    /// The identity token could not be exchanged for AWS credentials
    #[error("Federation error: {0}")]
    Federation(String),

    /// The event bus rejected or never received the event
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Invalid process configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Short stage name used as a structured log field
    pub fn stage(&self) -> &'static str {
        match self {
            RelayError::IdentityProvider(_) => "identity",
            RelayError::Federation(_) => "federation",
            RelayError::Dispatch(_) => "dispatch",
            RelayError::Config(_) => "config",
        }
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
