//! EventBridge Publisher
//!
//! `ClientFactory` implementation that builds AWS SDK EventBridge clients
//! from federated credentials. Retries are left to the SDK's standard retry
//! mode, bounded to a few attempts.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_sdk_eventbridge::config::retry::RetryConfig;
use aws_sdk_eventbridge::config::timeout::TimeoutConfig;
use aws_sdk_eventbridge::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_eventbridge::error::DisplayErrorContext;
use aws_sdk_eventbridge::primitives::DateTime as AwsDateTime;
use aws_sdk_eventbridge::types::PutEventsRequestEntry;
use aws_sdk_eventbridge::Client;
use tracing::debug;

use super::client::{BusEntry, ClientFactory, EventPublisher};
use crate::credentials::CredentialSet;
use crate::error::{RelayError, Result};

/// Attempts per PutEvents call, including the first
pub const DISPATCH_MAX_ATTEMPTS: u32 = 3;

const CREDENTIALS_PROVIDER_NAME: &str = "gcp-relay-federation";

/// Builds EventBridge clients with transport timeouts and bounded retries
#[derive(Debug, Clone)]
pub struct EventBridgeFactory {
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl Default for EventBridgeFactory {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientFactory for EventBridgeFactory {
    fn build(&self, region: &str, credentials: &CredentialSet) -> Arc<dyn EventPublisher> {
        let provider = Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            Some(credentials.session_token().to_string()),
            Some(SystemTime::from(credentials.expires_at())),
            CREDENTIALS_PROVIDER_NAME,
        );

        let config = aws_sdk_eventbridge::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(provider)
            .retry_config(RetryConfig::standard().with_max_attempts(DISPATCH_MAX_ATTEMPTS))
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(self.connect_timeout)
                    .operation_timeout(self.operation_timeout)
                    .build(),
            )
            .build();

        Arc::new(EventBridgePublisher {
            client: Client::from_conf(config),
        })
    }
}

/// EventBridge client wrapper
pub struct EventBridgePublisher {
    client: Client,
}

#[async_trait]
impl EventPublisher for EventBridgePublisher {
    async fn put_event(&self, bus_name: &str, entry: BusEntry) -> Result<String> {
        let request_entry = PutEventsRequestEntry::builder()
            .time(AwsDateTime::from(SystemTime::from(entry.time)))
            .source(entry.source)
            .detail_type(entry.detail_type)
            .detail(entry.detail)
            .event_bus_name(bus_name)
            .build();

        let output = self
            .client
            .put_events()
            .entries(request_entry)
            .send()
            .await
            .map_err(|e| RelayError::Dispatch(format!("PutEvents failed: {}", DisplayErrorContext(&e))))?;

        debug!("PutEvents response: {:?}", output);

        let result = output
            .entries()
            .first()
            .ok_or_else(|| RelayError::Dispatch("PutEvents returned no result entries".to_string()))?;

        if let Some(code) = result.error_code() {
            return Err(RelayError::Dispatch(format!(
                "Event rejected by bus {}: {}: {}",
                bus_name,
                code,
                result.error_message().unwrap_or_default()
            )));
        }

        Ok(result.event_id().unwrap_or_default().to_string())
    }
}
