//! Downstream Client Cache
//!
//! Keeps one event-bus client per process. The client is rebuilt only when
//! the credential identity (or region) it was built for stops matching, so
//! re-reading cached credentials never costs a client construction.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::credentials::{CredentialIdentity, CredentialSet, RefreshCell};
use crate::error::Result;

/// A single event to put on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusEntry {
    pub time: DateTime<Utc>,
    pub source: String,
    pub detail_type: String,
    /// JSON-encoded event detail
    pub detail: String,
}

/// Client able to put events on a bus
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Put one entry on `bus_name`, returning the id assigned by the bus
    async fn put_event(&self, bus_name: &str, entry: BusEntry) -> Result<String>;
}

/// Builds publishers bound to a region and a credential set
pub trait ClientFactory: Send + Sync {
    fn build(&self, region: &str, credentials: &CredentialSet) -> Arc<dyn EventPublisher>;
}

/// Client together with what it was built from
pub struct ClientHandle {
    region: String,
    bound_identity: CredentialIdentity,
    client: Arc<dyn EventPublisher>,
}

impl ClientHandle {
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn bound_identity(&self) -> &CredentialIdentity {
        &self.bound_identity
    }

    pub fn client(&self) -> &Arc<dyn EventPublisher> {
        &self.client
    }

    fn serves(&self, region: &str, identity: &CredentialIdentity) -> bool {
        self.region == region && &self.bound_identity == identity
    }
}

/// Process-wide cache of the active client handle
pub struct DownstreamClientCache {
    factory: Arc<dyn ClientFactory>,
    cell: RefreshCell<ClientHandle>,
}

impl DownstreamClientCache {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            cell: RefreshCell::new(),
        }
    }

    /// Handle for `region` bound to `credentials`, rebuilt on rotation
    pub async fn get_client(&self, region: &str, credentials: &CredentialSet) -> Arc<ClientHandle> {
        let identity = credentials.identity();

        if let Some(handle) = self.cell.current().await {
            if handle.serves(region, identity) {
                return handle;
            }
        }

        self.cell
            .refresh_with(
                |handle| handle.serves(region, identity),
                || async {
                    info!(
                        region = %region,
                        identity = %identity,
                        "Building event bus client for new credentials"
                    );
                    Ok::<_, Infallible>(ClientHandle {
                        region: region.to_string(),
                        bound_identity: identity.clone(),
                        client: self.factory.build(region, credentials),
                    })
                },
            )
            .await
            .unwrap_or_else(|never| match never {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeClientFactory;
    use chrono::Duration;

    fn credentials(key: &str, expires_at: DateTime<Utc>) -> CredentialSet {
        CredentialSet::new(key, "secret", "session", expires_at)
    }

    #[tokio::test]
    async fn test_same_identity_reuses_client() {
        let factory = Arc::new(FakeClientFactory::default());
        let cache = DownstreamClientCache::new(factory.clone());
        let expires = Utc::now() + Duration::hours(1);

        let first = cache.get_client("us-east-1", &credentials("ASIA1", expires)).await;
        // A separately fetched copy of the same credentials
        let second = cache.get_client("us-east-1", &credentials("ASIA1", expires)).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(first.client(), second.client()));
        assert_eq!(factory.builds(), 1);
    }

    #[tokio::test]
    async fn test_rotated_identity_rebuilds_client() {
        let factory = Arc::new(FakeClientFactory::default());
        let cache = DownstreamClientCache::new(factory.clone());
        let expires = Utc::now() + Duration::hours(1);

        let first = cache.get_client("us-east-1", &credentials("ASIA1", expires)).await;
        let rotated = credentials("ASIA2", expires + Duration::hours(1));
        let second = cache.get_client("us-east-1", &rotated).await;

        assert!(!Arc::ptr_eq(first.client(), second.client()));
        assert_eq!(second.bound_identity(), rotated.identity());
        assert_eq!(factory.builds(), 2);
    }

    #[tokio::test]
    async fn test_region_change_rebuilds_client() {
        let factory = Arc::new(FakeClientFactory::default());
        let cache = DownstreamClientCache::new(factory.clone());
        let creds = credentials("ASIA1", Utc::now() + Duration::hours(1));

        cache.get_client("us-east-1", &creds).await;
        let moved = cache.get_client("eu-west-1", &creds).await;

        assert_eq!(moved.region(), "eu-west-1");
        assert_eq!(factory.builds(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_rotation_builds_once() {
        let factory = Arc::new(FakeClientFactory::default());
        let cache = DownstreamClientCache::new(factory.clone());
        let creds = credentials("ASIA1", Utc::now() + Duration::hours(1));

        let handles =
            futures::future::join_all((0..10).map(|_| cache.get_client("us-east-1", &creds))).await;

        assert_eq!(factory.builds(), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }
}
