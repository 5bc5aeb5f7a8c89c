//! GCP Relay Library
//!
//! Forwards GCP Pub/Sub change events onto an AWS EventBridge bus, using a
//! GCP identity token federated into short-lived AWS credentials.

pub mod clock;
pub mod config;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod forwarder;
pub mod server;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BusTarget, RelayConfig};
pub use error::{RelayError, Result};
pub use forwarder::{ForwardOutcome, Forwarder};
pub use server::router;
