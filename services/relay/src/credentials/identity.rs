//! Identity Token Cache
//!
//! Caches the self-issued identity token presented to STS. The token is
//! only re-issued once it enters the expiry buffer, and concurrent callers
//! share a single issuance.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::{is_fresh, RefreshCell};
use crate::clock::Clock;
use crate::error::Result;

/// Margin subtracted from the issuer-declared lifetime
pub const ISSUANCE_MARGIN_SECS: i64 = 60;

/// Token as returned by an issuer, before the cache stamps its expiry
#[derive(Clone)]
pub struct IssuedToken {
    pub value: String,
    /// Remaining lifetime declared by the issuer
    pub lifetime: Duration,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("value", &"<redacted>")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Issues identity tokens for an audience
#[async_trait]
pub trait IdentityIssuer: Send + Sync {
    async fn issue(&self, audience: &str) -> Result<IssuedToken>;
}

/// Identity token with the expiry computed at issuance
#[derive(Clone)]
pub struct IdentityToken {
    value: String,
    audience: String,
    expires_at: DateTime<Utc>,
}

impl IdentityToken {
    pub fn new(value: impl Into<String>, audience: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            audience: audience.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Usable for `audience` at `now`, outside the expiry buffer
    pub fn is_valid_for(&self, audience: &str, now: DateTime<Utc>) -> bool {
        self.audience == audience && is_fresh(self.expires_at, now)
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("value", &"<redacted>")
            .field("audience", &self.audience)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Process-wide cache of the active identity token
pub struct IdentityTokenCache {
    issuer: Arc<dyn IdentityIssuer>,
    clock: Arc<dyn Clock>,
    cell: RefreshCell<IdentityToken>,
}

impl IdentityTokenCache {
    pub fn new(issuer: Arc<dyn IdentityIssuer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer,
            clock,
            cell: RefreshCell::new(),
        }
    }

    /// Get a token for `audience` that is valid at `now`.
    ///
    /// Issuance failures are returned to this caller only; they are not
    /// retried and do not clear the cached token.
    pub async fn get_token(&self, audience: &str, now: DateTime<Utc>) -> Result<Arc<IdentityToken>> {
        if let Some(token) = self.cell.current().await {
            if token.is_valid_for(audience, now) {
                return Ok(token);
            }
        }

        let gate = self.cell.lock().await;
        let refreshed_at = now.max(self.clock.now());

        if let Some(token) = gate.current().await {
            if token.is_valid_for(audience, refreshed_at) {
                return Ok(token);
            }
        }

        let token = self.issue(audience, refreshed_at).await?;
        Ok(gate.publish(token).await)
    }

    async fn issue(&self, audience: &str, issued_at: DateTime<Utc>) -> Result<IdentityToken> {
        debug!("Requesting identity token for audience: {}", audience);

        let issued = self.issuer.issue(audience).await?;
        let expires_at = issued_at + issued.lifetime - Duration::seconds(ISSUANCE_MARGIN_SECS);

        info!(
            audience = %audience,
            expires_at = %expires_at,
            "Identity token refreshed"
        );

        Ok(IdentityToken::new(issued.value, audience, expires_at))
    }
}
