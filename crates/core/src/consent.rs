use crate::types::{ConsentId, ConsentLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Method-name pattern a grant applies to.
///
/// `"*"` matches everything. Patterns containing glob metacharacters
/// (`*`, `?`, `[`) are matched with glob semantics (`tools/*`, `read_?`);
/// everything else, including patterns that fail to compile, matches exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct OperationPattern {
    raw: String,
    compiled: Option<glob::Pattern>,
}

impl OperationPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let compiled = if raw.contains(['*', '?', '[']) {
            glob::Pattern::new(&raw).ok()
        } else {
            None
        };
        Self { raw, compiled }
    }

    pub fn any() -> Self {
        Self::new("*")
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, method: &str) -> bool {
        if self.raw == "*" {
            return true;
        }
        match &self.compiled {
            Some(pattern) => pattern.matches(method),
            None => self.raw == method,
        }
    }
}

impl PartialEq for OperationPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for OperationPattern {}

impl From<String> for OperationPattern {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for OperationPattern {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<OperationPattern> for String {
    fn from(pattern: OperationPattern) -> Self {
        pattern.raw
    }
}

fn default_pattern() -> OperationPattern {
    OperationPattern::any()
}

/// Parameters for a new grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConsent {
    pub client_id: String,
    pub server_id: String,
    #[serde(default = "default_pattern")]
    pub operation_pattern: OperationPattern,
    #[serde(default)]
    pub level: ConsentLevel,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

impl NewConsent {
    pub fn new(
        client_id: impl Into<String>,
        server_id: impl Into<String>,
        operation_pattern: impl Into<OperationPattern>,
        level: ConsentLevel,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            server_id: server_id.into(),
            operation_pattern: operation_pattern.into(),
            level,
            expiration: None,
        }
    }

    pub fn expires_at(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

/// An authorization grant for a client on a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentGrant {
    pub consent_id: ConsentId,
    pub client_id: String,
    pub server_id: String,
    pub operation_pattern: OperationPattern,
    pub level: ConsentLevel,
    pub expiration: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ConsentGrant {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|expiration| expiration <= now)
    }

    /// Whether this grant covers `method` for the given client/server pair
    pub fn applies_to(&self, client_id: &str, server_id: &str, method: &str) -> bool {
        self.client_id == client_id
            && self.server_id == server_id
            && self.operation_pattern.matches(method)
    }
}

/// Result of a consent check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentDecision {
    /// A grant at or above the required level exists
    Granted {
        consent_id: ConsentId,
        level: ConsentLevel,
    },
    /// Nothing matched and the registry runs with auto-consent
    AutoGranted,
    /// The method needs no consent at all
    NotRequired,
    Denied {
        required: ConsentLevel,
        best: Option<ConsentLevel>,
    },
}

impl ConsentDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Denied { .. })
    }
}

/// Registry of consent grants, consulted on every routed call.
///
/// Expired grants are dropped lazily when a check runs into them; there is no
/// background sweep.
pub struct ConsentRegistry {
    grants: RwLock<HashMap<ConsentId, ConsentGrant>>,
    auto_consent: bool,
}

impl ConsentRegistry {
    pub fn new(auto_consent: bool) -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            auto_consent,
        }
    }

    pub fn auto_consent(&self) -> bool {
        self.auto_consent
    }

    /// Register a grant; always succeeds with a fresh id
    pub async fn register_consent(&self, consent: NewConsent) -> ConsentId {
        let grant = ConsentGrant {
            consent_id: ConsentId::generate(),
            client_id: consent.client_id,
            server_id: consent.server_id,
            operation_pattern: consent.operation_pattern,
            level: consent.level,
            expiration: consent.expiration,
            created_at: Utc::now(),
        };
        let consent_id = grant.consent_id.clone();

        tracing::info!(
            consent_id = %consent_id,
            client_id = %grant.client_id,
            server_id = %grant.server_id,
            pattern = %grant.operation_pattern.as_str(),
            level = %grant.level,
            "Registered consent"
        );

        self.grants.write().await.insert(consent_id.clone(), grant);
        consent_id
    }

    /// Revoke a grant; `false` when the id is unknown
    pub async fn revoke_consent(&self, consent_id: &ConsentId) -> bool {
        let removed = self.grants.write().await.remove(consent_id).is_some();
        if removed {
            tracing::info!(consent_id = %consent_id, "Revoked consent");
        }
        removed
    }

    pub async fn get_consent(&self, consent_id: &ConsentId) -> Option<ConsentGrant> {
        self.grants.read().await.get(consent_id).cloned()
    }

    /// All grants held by a client, oldest first
    pub async fn list_for_client(&self, client_id: &str) -> Vec<ConsentGrant> {
        let mut grants: Vec<_> = self
            .grants
            .read()
            .await
            .values()
            .filter(|grant| grant.client_id == client_id)
            .cloned()
            .collect();
        grants.sort_by_key(|grant| grant.created_at);
        grants
    }

    /// Decide whether `client_id` may call `method` on `server_id` at `required`
    pub async fn check(
        &self,
        client_id: &str,
        server_id: &str,
        method: &str,
        required: ConsentLevel,
    ) -> ConsentDecision {
        self.check_at(client_id, server_id, method, required, Utc::now())
            .await
    }

    pub async fn check_at(
        &self,
        client_id: &str,
        server_id: &str,
        method: &str,
        required: ConsentLevel,
        now: DateTime<Utc>,
    ) -> ConsentDecision {
        let (best, expired) = {
            let grants = self.grants.read().await;
            let mut best: Option<&ConsentGrant> = None;
            let mut expired = Vec::new();

            for grant in grants
                .values()
                .filter(|grant| grant.applies_to(client_id, server_id, method))
            {
                if grant.is_expired_at(now) {
                    expired.push(grant.consent_id.clone());
                } else if best.map_or(true, |current| grant.level > current.level) {
                    best = Some(grant);
                }
            }

            (best.map(|grant| (grant.consent_id.clone(), grant.level)), expired)
        };

        if !expired.is_empty() {
            let mut grants = self.grants.write().await;
            for consent_id in &expired {
                if grants.remove(consent_id).is_some() {
                    tracing::info!(consent_id = %consent_id, "Dropped expired consent");
                }
            }
        }

        if required == ConsentLevel::None {
            return ConsentDecision::NotRequired;
        }

        match best {
            Some((consent_id, level)) if level >= required => {
                ConsentDecision::Granted { consent_id, level }
            }
            Some((_, level)) => ConsentDecision::Denied {
                required,
                best: Some(level),
            },
            None if self.auto_consent => ConsentDecision::AutoGranted,
            None => ConsentDecision::Denied {
                required,
                best: None,
            },
        }
    }
}

impl Default for ConsentRegistry {
    fn default() -> Self {
        Self::new(false)
    }
}
