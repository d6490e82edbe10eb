//! Credential resolution.
//!
//! Every inbound call is charged to exactly one credential. The resolver walks
//! an ordered chain of tiers and stops at the first tier that *resolves*:
//!
//! 1. **Admin** - a matching `Admin-API-Key` header borrows the server's key
//! 2. **User** - a key supplied in the request payload
//! 3. **Environment** - a fallback key configured on the gateway
//!
//! A tier that does not apply (including a mismatching admin header) hands
//! over to the next one. When none applies the call fails with
//! [`CredentialError::Unauthorized`] before any gate is touched.

use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::CredentialError;

/// Which tier a credential was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Admin,
    User,
    Environment,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::Admin => "admin",
            SourceTier::User => "user",
            SourceTier::Environment => "environment",
        }
    }
}

/// A resolved backend credential, immutable for the lifetime of one call
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    api_key: String,
    source_tier: SourceTier,
}

impl Credential {
    pub fn new(api_key: impl Into<String>, source_tier: SourceTier) -> Self {
        Self { api_key: api_key.into(), source_tier }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn source_tier(&self) -> SourceTier {
        self.source_tier
    }
}

// Keys must never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .field("source_tier", &self.source_tier)
            .finish()
    }
}

/// Keys configured on the gateway itself
#[derive(Clone, Default)]
pub struct CredentialSources {
    /// Key that callers must present in the admin header
    pub admin_key: Option<String>,
    /// Server's own backend key, lent to admin callers
    pub server_key: Option<String>,
    /// Fallback backend key used when the caller brings none
    pub env_key: Option<String>,
}

impl CredentialSources {
    pub fn admin_configured(&self) -> bool {
        non_empty(self.admin_key.as_deref()).is_some()
    }

    pub fn server_configured(&self) -> bool {
        non_empty(self.server_key.as_deref()).is_some()
    }

    pub fn env_configured(&self) -> bool {
        non_empty(self.env_key.as_deref()).is_some()
    }
}

impl fmt::Debug for CredentialSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSources")
            .field("admin_key", &self.admin_configured())
            .field("server_key", &self.server_configured())
            .field("env_key", &self.env_configured())
            .finish()
    }
}

/// What the caller presented
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialRequest<'a> {
    pub admin_header: Option<&'a str>,
    pub payload_key: Option<&'a str>,
}

impl<'a> CredentialRequest<'a> {
    pub fn new(admin_header: Option<&'a str>, payload_key: Option<&'a str>) -> Self {
        Self { admin_header, payload_key }
    }
}

/// Result of evaluating a single tier
type TierResult = Result<Option<Credential>, CredentialError>;

/// One link in the resolution chain. `Ok(None)` means "not applicable".
type TierResolver = fn(&CredentialRequest<'_>, &CredentialSources) -> TierResult;

const DEFAULT_CHAIN: [(SourceTier, TierResolver); 3] = [
    (SourceTier::Admin, resolve_admin),
    (SourceTier::User, resolve_user),
    (SourceTier::Environment, resolve_environment),
];

/// Resolves the credential for each inbound call
#[derive(Clone)]
pub struct CredentialResolver {
    sources: CredentialSources,
    chain: Vec<(SourceTier, TierResolver)>,
}

impl CredentialResolver {
    /// Create a resolver using the admin → user → environment chain
    pub fn new(sources: CredentialSources) -> Self {
        Self { sources, chain: DEFAULT_CHAIN.to_vec() }
    }

    pub fn sources(&self) -> &CredentialSources {
        &self.sources
    }

    /// Walk the chain and return the first resolved credential
    pub fn resolve(&self, request: &CredentialRequest<'_>) -> Result<Credential, CredentialError> {
        for (tier, resolver) in &self.chain {
            if let Some(credential) = resolver(request, &self.sources)? {
                debug!(tier = tier.as_str(), "Credential resolved");
                return Ok(credential);
            }
        }

        debug!("No credential tier applied");
        Err(CredentialError::Unauthorized)
    }

    /// Whether `header` passes the admin check on its own.
    ///
    /// Used to guard administrative operations, which need no backend key.
    pub fn authenticate_admin(&self, header: Option<&str>) -> bool {
        admin_header_matches(header, &self.sources)
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tiers: Vec<&str> = self.chain.iter().map(|(tier, _)| tier.as_str()).collect();
        f.debug_struct("CredentialResolver")
            .field("sources", &self.sources)
            .field("chain", &tiers)
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn admin_header_matches(header: Option<&str>, sources: &CredentialSources) -> bool {
    match (non_empty(header), non_empty(sources.admin_key.as_deref())) {
        (Some(presented), Some(expected)) => {
            bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
        }
        _ => false,
    }
}

fn resolve_admin(request: &CredentialRequest<'_>, sources: &CredentialSources) -> TierResult {
    if !admin_header_matches(request.admin_header, sources) {
        return Ok(None);
    }

    match non_empty(sources.server_key.as_deref()) {
        Some(key) => Ok(Some(Credential::new(key, SourceTier::Admin))),
        None => Err(CredentialError::AdminKeyUnavailable),
    }
}

fn resolve_user(request: &CredentialRequest<'_>, _sources: &CredentialSources) -> TierResult {
    Ok(non_empty(request.payload_key).map(|key| Credential::new(key, SourceTier::User)))
}

fn resolve_environment(_request: &CredentialRequest<'_>, sources: &CredentialSources) -> TierResult {
    Ok(non_empty(sources.env_key.as_deref()).map(|key| Credential::new(key, SourceTier::Environment)))
}
