//! Federated Credential Cache
//!
//! Exchanges identity tokens for temporary AWS credentials and keeps the
//! active set until it enters the expiry buffer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::identity::IdentityToken;
use super::{is_fresh, RefreshCell};
use crate::clock::Clock;
use crate::error::Result;

/// Opaque fingerprint of a credential set.
///
/// Derived from the access key id and expiry so that a rotation can be
/// detected without looking at secret material.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialIdentity(String);

impl CredentialIdentity {
    fn derive(access_key_id: &str, expires_at: DateTime<Utc>) -> Self {
        Self(format!("{}@{}", access_key_id, expires_at.timestamp_millis()))
    }
}

impl fmt::Display for CredentialIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Temporary AWS credentials
#[derive(Clone)]
pub struct CredentialSet {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expires_at: DateTime<Utc>,
    identity: CredentialIdentity,
}

impl CredentialSet {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let access_key_id = access_key_id.into();
        let identity = CredentialIdentity::derive(&access_key_id, expires_at);

        Self {
            access_key_id,
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
            expires_at,
            identity,
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn identity(&self) -> &CredentialIdentity {
        &self.identity
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        is_fresh(self.expires_at, now)
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Trades an identity token for credentials in the target cloud
#[async_trait]
pub trait CredentialExchanger: Send + Sync {
    async fn exchange(&self, token: &str, role_arn: &str, session_name: &str) -> Result<CredentialSet>;
}

/// Process-wide cache of the active credential set
pub struct FederatedCredentialCache {
    exchanger: Arc<dyn CredentialExchanger>,
    clock: Arc<dyn Clock>,
    role_arn: String,
    session_name: String,
    cell: RefreshCell<CredentialSet>,
}

impl FederatedCredentialCache {
    pub fn new(
        exchanger: Arc<dyn CredentialExchanger>,
        clock: Arc<dyn Clock>,
        role_arn: impl Into<String>,
        session_name: impl Into<String>,
    ) -> Self {
        Self {
            exchanger,
            clock,
            role_arn: role_arn.into(),
            session_name: session_name.into(),
            cell: RefreshCell::new(),
        }
    }

    /// Get credentials valid at `now`, exchanging `token` if the cached
    /// set is missing or inside the expiry buffer.
    ///
    /// A failed exchange leaves the previous set cached and is reported
    /// only to this caller.
    pub async fn get_credentials(&self, token: &IdentityToken, now: DateTime<Utc>) -> Result<Arc<CredentialSet>> {
        if let Some(credentials) = self.cell.current().await {
            if credentials.is_valid_at(now) {
                return Ok(credentials);
            }
        }

        let gate = self.cell.lock().await;
        let refreshed_at = now.max(self.clock.now());

        if let Some(credentials) = gate.current().await {
            if credentials.is_valid_at(refreshed_at) {
                return Ok(credentials);
            }
        }

        let credentials = self.exchange(token).await?;
        Ok(gate.publish(credentials).await)
    }

    async fn exchange(&self, token: &IdentityToken) -> Result<CredentialSet> {
        debug!("Exchanging identity token for role: {}", self.role_arn);

        let credentials = self
            .exchanger
            .exchange(token.value(), &self.role_arn, &self.session_name)
            .await
            .map_err(|e| {
                warn!(role = %self.role_arn, "Credential exchange failed: {}", e);
                e
            })?;

        info!(
            role = %self.role_arn,
            access_key_id = %credentials.access_key_id(),
            expires_at = %credentials.expires_at(),
            "Federated credentials refreshed"
        );

        Ok(credentials)
    }
}
