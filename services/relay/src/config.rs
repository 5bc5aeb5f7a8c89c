//! Relay Configuration
//!
//! Loaded once at startup from flags or environment variables and treated
//! as immutable for the life of the process.

use std::fmt;
use std::str::FromStr;

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};

use crate::credentials::metadata::DEFAULT_METADATA_HOST;
use crate::credentials::sts::DEFAULT_STS_ENDPOINT;
use crate::error::{RelayError, Result};
use crate::forwarder::{DEFAULT_AUDIENCE, DEFAULT_DETAIL_TYPE, DEFAULT_SESSION_NAME};

/// Relay GCP Pub/Sub change events to an AWS EventBridge bus
#[derive(Parser, Debug, Clone)]
#[command(name = "relay")]
#[command(about = "Relay GCP Pub/Sub change events to an AWS EventBridge bus")]
#[command(version)]
pub struct RelayConfig {
    /// ARN of the AWS role assumed with the GCP identity token
    #[arg(long, env = "AWS_ROLE")]
    pub aws_role: String,

    /// Full ARN of the destination event bus
    #[arg(long, env = "AWS_EVENT_BUS")]
    pub aws_event_bus: String,

    /// Detail type attached to every forwarded event
    #[arg(long, env = "AWS_DETAIL_TYPE", default_value = DEFAULT_DETAIL_TYPE)]
    pub detail_type: String,

    /// Idle connections kept per host by the metadata server and STS HTTP
    /// client (EventBridge uses the SDK's own connection pool)
    #[arg(long, env = "AWS_MAX_POOL_CONNECTIONS", default_value_t = 10)]
    pub max_pool_connections: usize,

    /// Audience of the GCP identity token
    #[arg(long, env = "FEDERATION_AUDIENCE", default_value = DEFAULT_AUDIENCE)]
    pub audience: String,

    /// Session name used when assuming the role
    #[arg(long, env = "AWS_ROLE_SESSION_NAME", default_value = DEFAULT_SESSION_NAME)]
    pub session_name: String,

    /// Requested credential lifetime in seconds (role default when unset)
    #[arg(long, env = "AWS_SESSION_DURATION")]
    pub session_duration: Option<u32>,

    /// AWS STS endpoint
    #[arg(long, env = "AWS_STS_ENDPOINT", default_value = DEFAULT_STS_ENDPOINT)]
    pub sts_endpoint: String,

    /// GCP metadata server
    #[arg(long, env = "GCE_METADATA_HOST", default_value = DEFAULT_METADATA_HOST)]
    pub metadata_host: String,

    /// Port to listen on for pushed events
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Enable debug logging (any value except 0/false/no/off/empty)
    #[arg(
        long,
        env = "LOG_DEBUG",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub log_debug: bool,
}

impl RelayConfig {
    /// Region and bus name derived from the configured bus ARN
    pub fn bus_target(&self) -> Result<BusTarget> {
        self.aws_event_bus.parse()
    }
}

/// Destination bus, split out of its ARN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusTarget {
    pub arn: String,
    pub region: String,
    pub bus_name: String,
}

impl FromStr for BusTarget {
    type Err = RelayError;

    /// `arn:aws:events:<region>:<account>:event-bus/<name>`
    fn from_str(arn: &str) -> Result<Self> {
        let parts: Vec<&str> = arn.split(':').collect();

        if parts.len() < 6 || parts[0] != "arn" {
            return Err(RelayError::Config(format!("Not an event bus ARN: {arn}")));
        }

        let region = parts[3];
        if region.is_empty() {
            return Err(RelayError::Config(format!("Event bus ARN has no region: {arn}")));
        }

        let bus_name = match arn.rsplit_once('/') {
            Some((_, name)) if !name.is_empty() => name,
            _ => {
                return Err(RelayError::Config(format!(
                    "Event bus ARN has no bus name: {arn}"
                )))
            }
        };

        Ok(Self {
            arn: arn.to_string(),
            region: region.to_string(),
            bus_name: bus_name.to_string(),
        })
    }
}

impl fmt::Display for BusTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.bus_name, self.region)
    }
}
