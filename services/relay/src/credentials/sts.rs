//! AWS STS Web Identity Exchange
//!
//! Calls `AssumeRoleWithWebIdentity` directly over HTTPS. The call is
//! authenticated by the web identity token itself, so no AWS credentials or
//! request signing are needed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::federation::{CredentialExchanger, CredentialSet};
use crate::error::{RelayError, Result};

pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.amazonaws.com";

const STS_API_VERSION: &str = "2011-06-15";

// ============================================================
// STS Response Types
// ============================================================

#[derive(Debug, Deserialize)]
struct AssumeRoleWithWebIdentityResponse {
    #[serde(rename = "AssumeRoleWithWebIdentityResult")]
    result: AssumeRoleWithWebIdentityResult,
}

#[derive(Debug, Deserialize)]
struct AssumeRoleWithWebIdentityResult {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
struct StsCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "SessionToken")]
    session_token: String,
    #[serde(rename = "Expiration")]
    expiration: String,
}

#[derive(Debug, Deserialize)]
struct StsErrorResponse {
    #[serde(rename = "Error")]
    error: StsErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StsErrorDetail {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

// ============================================================
// Exchanger
// ============================================================

/// Credential exchanger backed by AWS STS
pub struct StsWebIdentityExchanger {
    http_client: Client,
    endpoint: String,
    duration_seconds: Option<u32>,
}

impl StsWebIdentityExchanger {
    pub fn new(http_client: Client, endpoint: impl Into<String>, duration_seconds: Option<u32>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
            duration_seconds,
        }
    }

    fn request_url(&self, token: &str, role_arn: &str, session_name: &str) -> String {
        let mut url = format!(
            "{}/?Action=AssumeRoleWithWebIdentity&Version={}&RoleArn={}&RoleSessionName={}&WebIdentityToken={}",
            self.endpoint.trim_end_matches('/'),
            STS_API_VERSION,
            urlencoding::encode(role_arn),
            urlencoding::encode(session_name),
            urlencoding::encode(token)
        );

        if let Some(duration) = self.duration_seconds {
            url.push_str(&format!("&DurationSeconds={}", duration));
        }

        url
    }
}

#[async_trait]
impl CredentialExchanger for StsWebIdentityExchanger {
    async fn exchange(&self, token: &str, role_arn: &str, session_name: &str) -> Result<CredentialSet> {
        debug!("Calling AWS STS AssumeRoleWithWebIdentity for role: {}", role_arn);

        let response = self
            .http_client
            .get(self.request_url(token, role_arn, session_name))
            .send()
            .await
            .map_err(|e| RelayError::Federation(format!("Failed to call AWS STS: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Federation(format!("Failed to read AWS STS response: {e}")))?;

        if !status.is_success() {
            return Err(RelayError::Federation(format!(
                "AWS STS failed with {}: {}",
                status,
                describe_error(&body)
            )));
        }

        parse_credentials(&body)
    }
}

/// Parse the XML body of a successful `AssumeRoleWithWebIdentity` call
fn parse_credentials(body: &str) -> Result<CredentialSet> {
    let response: AssumeRoleWithWebIdentityResponse = quick_xml::de::from_str(body)
        .map_err(|e| RelayError::Federation(format!("Failed to parse AWS STS XML response: {e}")))?;

    let creds = response.result.credentials;
    let expires_at = DateTime::parse_from_rfc3339(creds.expiration.trim())
        .map_err(|e| {
            RelayError::Federation(format!(
                "Invalid credential expiration '{}': {e}",
                creds.expiration
            ))
        })?
        .with_timezone(&Utc);

    Ok(CredentialSet::new(
        creds.access_key_id,
        creds.secret_access_key,
        creds.session_token,
        expires_at,
    ))
}

/// `Code: Message` from an STS error document, or the raw body
fn describe_error(body: &str) -> String {
    match quick_xml::de::from_str::<StsErrorResponse>(body) {
        Ok(response) => format!("{}: {}", response.error.code, response.error.message),
        Err(_) => body.trim().to_string(),
    }
}
