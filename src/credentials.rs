use crate::models::Marketplace;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub marketplace: Marketplace,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_active(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Read-only view of the connected marketplace accounts. Missing or expired
/// entries surface as a per-marketplace "not connected" condition, never as
/// a batch-fatal error.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    entries: HashMap<Marketplace, Credential>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `MARKETPLACE_TOKENS` entries of the form
    /// `marketplace:access_token[:refresh_token[:ttl_secs]]`, comma separated.
    pub fn from_env() -> Self {
        let raw = env::var("MARKETPLACE_TOKENS").unwrap_or_default();
        let mut set = Self::new();
        for token in raw.split(',') {
            let trimmed = token.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_entry(trimmed) {
                Some(credential) => set.insert(credential),
                None => warn!(
                    target = "crosslist.credentials",
                    "ignored malformed MARKETPLACE_TOKENS entry: {trimmed}"
                ),
            }
        }
        if !set.entries.is_empty() {
            info!(
                target = "crosslist.credentials",
                connected = set.entries.len(),
                "loaded marketplace credentials from env"
            );
        }
        set
    }

    pub fn insert(&mut self, credential: Credential) {
        self.entries.insert(credential.marketplace, credential);
    }

    pub fn get(&self, marketplace: Marketplace) -> Option<&Credential> {
        self.entries.get(&marketplace)
    }

    /// Present *and* unexpired, the only form the orchestrator dispatches with.
    pub fn active(&self, marketplace: Marketplace) -> Option<&Credential> {
        self.entries
            .get(&marketplace)
            .filter(|credential| credential.is_active())
    }

    pub fn connected(&self) -> Vec<Marketplace> {
        let mut connected: Vec<Marketplace> = self
            .entries
            .values()
            .filter(|credential| credential.is_active())
            .map(|credential| credential.marketplace)
            .collect();
        connected.sort();
        connected
    }
}

fn parse_entry(raw: &str) -> Option<Credential> {
    let mut parts = raw.splitn(4, ':');
    let marketplace = Marketplace::from_str(parts.next()?)?;
    let access_token = parts.next().map(str::trim).filter(|s| !s.is_empty())?;
    let refresh_token = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let ttl_secs = parts
        .next()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(7200);
    Some(Credential {
        marketplace,
        access_token: access_token.to_string(),
        refresh_token,
        expires_at: Utc::now() + Duration::seconds(ttl_secs),
    })
}

#[cfg(test)]
pub fn active_credential(marketplace: Marketplace) -> Credential {
    Credential {
        marketplace,
        access_token: format!("token-{marketplace}"),
        refresh_token: None,
        expires_at: Utc::now() + Duration::hours(1),
    }
}

#[cfg(test)]
pub fn expired_credential(marketplace: Marketplace) -> Credential {
    Credential {
        marketplace,
        access_token: format!("stale-{marketplace}"),
        refresh_token: None,
        expires_at: Utc::now() - Duration::hours(1),
    }
}
