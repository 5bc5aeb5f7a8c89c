//! Forwarding Orchestrator
//!
//! Drives one relay invocation: token, credentials, client, transform and
//! dispatch. Every failure is classified and logged here; nothing escapes
//! to the trigger.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{BusTarget, RelayConfig};
use crate::credentials::{
    FederatedCredentialCache, GcpMetadataIssuer, IdentityTokenCache, StsWebIdentityExchanger,
};
use crate::delivery::{transform, BusEntry, DownstreamClientCache, Envelope, EventBridgeFactory};
use crate::error::{RelayError, Result};

/// Source attached to every bus entry
pub const EVENT_SOURCE: &str = "GCP Relay";
pub const DEFAULT_DETAIL_TYPE: &str = "GCP Cloud Asset Change";
pub const DEFAULT_AUDIENCE: &str = "sts.amazonaws.com";
pub const DEFAULT_SESSION_NAME: &str = "StackletGCPRelay";

const HTTP_TIMEOUT_SECS: u64 = 30;

/// How a single invocation ended
#[derive(Debug)]
pub enum ForwardOutcome {
    /// Accepted by the bus
    Delivered { event_id: String },
    /// Payload was not forwardable
    Dropped,
    /// A stage failed; already logged
    Failed(RelayError),
}

impl ForwardOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ForwardOutcome::Delivered { .. })
    }
}

pub struct Forwarder {
    identity: Arc<IdentityTokenCache>,
    federation: Arc<FederatedCredentialCache>,
    clients: Arc<DownstreamClientCache>,
    clock: Arc<dyn Clock>,
    target: BusTarget,
    audience: String,
    detail_type: String,
}

impl Forwarder {
    pub fn new(
        identity: Arc<IdentityTokenCache>,
        federation: Arc<FederatedCredentialCache>,
        clients: Arc<DownstreamClientCache>,
        clock: Arc<dyn Clock>,
        target: BusTarget,
    ) -> Self {
        Self {
            identity,
            federation,
            clients,
            clock,
            target,
            audience: DEFAULT_AUDIENCE.to_string(),
            detail_type: DEFAULT_DETAIL_TYPE.to_string(),
        }
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn with_detail_type(mut self, detail_type: impl Into<String>) -> Self {
        self.detail_type = detail_type.into();
        self
    }

    /// Wire the production issuer, exchanger and EventBridge factory.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let target = config.bus_target()?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .pool_max_idle_per_host(config.max_pool_connections)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let identity = IdentityTokenCache::new(
            Arc::new(GcpMetadataIssuer::new(
                http_client.clone(),
                config.metadata_host.clone(),
            )),
            clock.clone(),
        );
        let federation = FederatedCredentialCache::new(
            Arc::new(StsWebIdentityExchanger::new(
                http_client,
                config.sts_endpoint.clone(),
                config.session_duration,
            )),
            clock.clone(),
            config.aws_role.clone(),
            config.session_name.clone(),
        );
        let clients = DownstreamClientCache::new(Arc::new(EventBridgeFactory::default()));

        Ok(Self::new(
            Arc::new(identity),
            Arc::new(federation),
            Arc::new(clients),
            clock,
            target,
        )
        .with_audience(config.audience.clone())
        .with_detail_type(config.detail_type.clone()))
    }

    pub fn target(&self) -> &BusTarget {
        &self.target
    }

    /// Relay one envelope. Never returns an error; the outcome is
    /// informational.
    pub async fn forward(&self, envelope: &Envelope) -> ForwardOutcome {
        match self.try_forward(envelope).await {
            Ok(Some(event_id)) => {
                info!(
                    event_id = %envelope.id,
                    bus_event_id = %event_id,
                    bus = %self.target,
                    "Event forwarded"
                );
                ForwardOutcome::Delivered { event_id }
            }
            Ok(None) => {
                warn!(event_id = %envelope.id, "Dropping message with non-JSON payload");
                ForwardOutcome::Dropped
            }
            Err(e) => {
                error!(
                    event_id = %envelope.id,
                    stage = e.stage(),
                    bus = %self.target,
                    "Failed to deliver event: {}",
                    e
                );
                ForwardOutcome::Failed(e)
            }
        }
    }

    async fn try_forward(&self, envelope: &Envelope) -> Result<Option<String>> {
        let now = self.clock.now();

        let token = self.identity.get_token(&self.audience, now).await?;
        let credentials = self.federation.get_credentials(&token, now).await?;
        let handle = self.clients.get_client(&self.target.region, &credentials).await;

        let Some(payload) = transform(envelope) else {
            return Ok(None);
        };

        let entry = BusEntry {
            time: now,
            source: EVENT_SOURCE.to_string(),
            detail_type: self.detail_type.clone(),
            detail: payload.to_detail()?,
        };
        debug!(event_id = %envelope.id, "Dispatching to {}", self.target.bus_name);

        let event_id = handle.client().put_event(&self.target.bus_name, entry).await?;
        Ok(Some(event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    use crate::clock::ManualClock;
    use crate::delivery::{PubSubMessage, PubSubPush};
    use crate::test_support::{FakeClientFactory, FakeExchanger, FakeIssuer, FakePublisher};

    const ROLE: &str = "arn:aws:iam::123456789012:role/relay";
    const BUS: &str = "arn:aws:events:us-east-1:123456789012:event-bus/my-bus";

    struct Harness {
        forwarder: Forwarder,
        issuer: Arc<FakeIssuer>,
        exchanger: Arc<FakeExchanger>,
        factory: Arc<FakeClientFactory>,
        publisher: Arc<FakePublisher>,
    }

    fn harness(publisher: FakePublisher) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 10, 16, 12, 0, 0).unwrap(),
        ));
        let issuer = Arc::new(FakeIssuer::new(chrono::Duration::minutes(60)));
        let exchanger = Arc::new(FakeExchanger::new(chrono::Duration::days(365)));
        let publisher = Arc::new(publisher);
        let factory = Arc::new(FakeClientFactory::sharing(publisher.clone()));

        let forwarder = Forwarder::new(
            Arc::new(IdentityTokenCache::new(issuer.clone(), clock.clone())),
            Arc::new(FederatedCredentialCache::new(
                exchanger.clone(),
                clock.clone(),
                ROLE,
                DEFAULT_SESSION_NAME,
            )),
            Arc::new(DownstreamClientCache::new(factory.clone())),
            clock,
            BUS.parse().unwrap(),
        )
        .with_detail_type("Asset Change");

        Harness {
            forwarder,
            issuer,
            exchanger,
            factory,
            publisher,
        }
    }

    fn envelope(data: String) -> Envelope {
        Envelope {
            id: "evt-1".to_string(),
            source: "//pubsub.googleapis.com/projects/demo/topics/assets".to_string(),
            specversion: "1.0".to_string(),
            event_type: "google.cloud.pubsub.topic.v1.messagePublished".to_string(),
            time: Some("2024-10-16T12:00:00Z".to_string()),
            data: PubSubPush {
                message: PubSubMessage {
                    data,
                    message_id: Some("evt-1".to_string()),
                    publish_time: None,
                    attributes: HashMap::new(),
                },
                subscription: None,
            },
        }
    }

    fn asset_change() -> Envelope {
        envelope(STANDARD.encode(r#"{"asset":{"name":"bucket"}}"#))
    }

    #[tokio::test]
    async fn test_forward_delivers_detail_to_bus() {
        let h = harness(FakePublisher::default());

        let outcome = h.forwarder.forward(&asset_change()).await;
        assert!(matches!(&outcome, ForwardOutcome::Delivered { event_id } if event_id == "event-1"));

        let sent = h.publisher.sent();
        assert_eq!(sent.len(), 1);
        let (bus_name, entry) = &sent[0];
        assert_eq!(bus_name, "my-bus");
        assert_eq!(entry.source, EVENT_SOURCE);
        assert_eq!(entry.detail_type, "Asset Change");
        assert_eq!(entry.time, Utc.with_ymd_and_hms(2024, 10, 16, 12, 0, 0).unwrap());

        let detail: Value = serde_json::from_str(&entry.detail).unwrap();
        assert_eq!(detail["event"]["asset"]["name"], "bucket");
        assert_eq!(detail["id"], "evt-1");
        assert_eq!(detail["type"], "google.cloud.pubsub.topic.v1.messagePublished");

        let (token, role, session) = h.exchanger.last_request().unwrap();
        assert_eq!(token, "token-1");
        assert_eq!(role, ROLE);
        assert_eq!(session, DEFAULT_SESSION_NAME);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped_without_dispatch() {
        let h = harness(FakePublisher::default());

        let outcome = h.forwarder.forward(&envelope(STANDARD.encode("not json"))).await;

        assert!(matches!(outcome, ForwardOutcome::Dropped));
        assert!(h.publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_failure_skips_dispatch() {
        let h = harness(FakePublisher::default());
        h.exchanger.fail_next();

        let outcome = h.forwarder.forward(&asset_change()).await;

        assert!(matches!(outcome, ForwardOutcome::Failed(RelayError::Federation(_))));
        assert!(h.publisher.sent().is_empty());
        assert_eq!(h.factory.builds(), 0);
    }

    #[tokio::test]
    async fn test_identity_failure_is_classified() {
        let h = harness(FakePublisher::default());
        h.issuer.fail_next();

        let outcome = h.forwarder.forward(&asset_change()).await;

        assert!(matches!(outcome, ForwardOutcome::Failed(RelayError::IdentityProvider(_))));
        assert_eq!(h.exchanger.calls(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_reported() {
        let h = harness(FakePublisher::failing());

        let outcome = h.forwarder.forward(&asset_change()).await;

        match outcome {
            ForwardOutcome::Failed(e) => assert_eq!(e.stage(), "dispatch"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repeated_forwards_reuse_cached_state() {
        let h = harness(FakePublisher::default());

        for _ in 0..5 {
            assert!(h.forwarder.forward(&asset_change()).await.is_delivered());
        }

        assert_eq!(h.issuer.calls(), 1);
        assert_eq!(h.exchanger.calls(), 1);
        assert_eq!(h.factory.builds(), 1);
        assert_eq!(h.publisher.sent().len(), 5);
    }
}
