//! Federated Credentials
//!
//! GCP identity token → AWS temporary credentials, cached per process.
//!
//! ## Flow
//!
//! 1. [`IdentityTokenCache`] asks the metadata server for an identity token
//!    scoped to the STS audience.
//! 2. [`FederatedCredentialCache`] trades that token for AWS credentials via
//!    STS `AssumeRoleWithWebIdentity`.
//!
//! Both caches use the same double-checked refresh ([`RefreshCell`]) and
//! treat anything expiring within [`EXPIRY_BUFFER_SECS`] as already expired.

use chrono::{DateTime, Duration, Utc};

pub mod cell;
pub mod federation;
pub mod identity;
pub mod metadata;
pub mod sts;

pub use cell::{RefreshCell, RefreshGuard};
pub use federation::{CredentialExchanger, CredentialIdentity, CredentialSet, FederatedCredentialCache};
pub use identity::{IdentityIssuer, IdentityToken, IdentityTokenCache, IssuedToken};
pub use metadata::GcpMetadataIssuer;
pub use sts::StsWebIdentityExchanger;

/// Safety buffer applied to every expiry check
pub const EXPIRY_BUFFER_SECS: i64 = 300;

/// True when `expires_at` is still outside the safety buffer at `now`
pub fn is_fresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now + Duration::seconds(EXPIRY_BUFFER_SECS) < expires_at
}
