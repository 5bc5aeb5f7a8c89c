//! GCP Metadata Server Identity
//!
//! Fetches Google-signed identity tokens for the runtime service account
//! from the metadata server (Cloud Run, Cloud Functions, GCE, GKE with
//! Workload Identity). No keys are involved.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::identity::{IdentityIssuer, IssuedToken};
use crate::error::{RelayError, Result};

pub const DEFAULT_METADATA_HOST: &str = "http://metadata.google.internal";

const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

/// Google identity tokens are valid for one hour
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Identity issuer backed by the metadata server
pub struct GcpMetadataIssuer {
    http_client: Client,
    metadata_host: String,
}

impl GcpMetadataIssuer {
    pub fn new(http_client: Client, metadata_host: impl Into<String>) -> Self {
        Self {
            http_client,
            metadata_host: metadata_host.into(),
        }
    }

    fn identity_url(&self, audience: &str) -> String {
        format!(
            "{}{}?audience={}&format=full",
            self.metadata_host.trim_end_matches('/'),
            IDENTITY_PATH,
            urlencoding::encode(audience)
        )
    }
}

#[async_trait]
impl IdentityIssuer for GcpMetadataIssuer {
    async fn issue(&self, audience: &str) -> Result<IssuedToken> {
        let url = self.identity_url(audience);
        debug!("Fetching identity token from metadata server: {}", url);

        let response = self
            .http_client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| RelayError::IdentityProvider(format!("Failed to call metadata server: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::IdentityProvider(format!(
                "Metadata server returned {}: {}",
                status,
                body.trim()
            )));
        }

        let token = response
            .text()
            .await
            .map_err(|e| RelayError::IdentityProvider(format!("Failed to read identity token: {e}")))?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(RelayError::IdentityProvider(
                "Metadata server returned an empty identity token".to_string(),
            ));
        }

        let lifetime = token_lifetime(&token, Utc::now()).unwrap_or_else(|| {
            warn!("Could not read identity token expiry, assuming one hour");
            Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)
        });

        Ok(IssuedToken {
            value: token,
            lifetime,
        })
    }
}

/// Remaining lifetime from the token's `exp` claim.
///
/// The signature is not checked; the token is only forwarded to STS, which
/// validates it.
pub fn token_lifetime(token: &str, now: DateTime<Utc>) -> Option<Duration> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data =
        jsonwebtoken::decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    let expires_at = DateTime::from_timestamp(data.claims.exp, 0)?;
    let lifetime = expires_at - now;

    (lifetime > Duration::zero()).then_some(lifetime)
}
