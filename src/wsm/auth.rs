//! Principal issuance and bearer-token verification for the WS handshake.
//!
//! Generalizes the host crate's rig API-key scheme (`sk-fleet-<random>`,
//! bcrypt-hashed, verified at the edge) from a per-request REST extractor
//! to a one-shot connect-time handshake: a token is `sk-wsm-<id>.<secret>`,
//! the registry holds `id -> (bcrypt hash of secret, Principal)`, and a
//! presented token is valid only if its secret verifies against the
//! stored hash and the resulting principal carries `realtime-access`.

use crate::types::Principal;
use dashmap::DashMap;
use std::collections::HashSet;

struct Registration {
    secret_hash: String,
    principal: Principal,
}

/// In-memory registry of issued bearer tokens, owned by the pipeline for
/// the lifetime of one race.
pub struct PrincipalRegistry {
    by_id: DashMap<String, Registration>,
}

impl PrincipalRegistry {
    pub fn new() -> Self {
        Self { by_id: DashMap::new() }
    }

    /// Issues a new signed bearer token for `principal`, returning the raw
    /// token to hand to the client (never stored in plaintext).
    pub fn issue(&self, principal: Principal) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let secret: String = {
            let bytes: [u8; 24] = rand::random();
            bytes.iter().map(|b| format!("{b:02x}")).collect()
        };
        let secret_hash = bcrypt::hash(&secret, bcrypt::DEFAULT_COST)
            .expect("bcrypt hash should not fail");
        self.by_id.insert(id.clone(), Registration { secret_hash, principal });
        format!("sk-wsm-{id}.{secret}")
    }

    /// Revokes a previously issued token, closing out its registration.
    pub fn revoke(&self, principal_id: &str) {
        self.by_id.retain(|_, reg| reg.principal.id != principal_id);
    }

    /// Verifies a bearer token presented at connect time. Returns the
    /// principal only if the token is well-formed, the secret matches, and
    /// the required `realtime-access` claim is present.
    pub fn verify(&self, token: &str) -> Option<Principal> {
        let rest = token.strip_prefix("sk-wsm-")?;
        let (id, secret) = rest.split_once('.')?;
        let reg = self.by_id.get(id)?;
        if !bcrypt::verify(secret, &reg.secret_hash).unwrap_or(false) {
            return None;
        }
        if !reg.principal.has("realtime-access") {
            return None;
        }
        Some(reg.principal.clone())
    }
}

impl Default for PrincipalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn admin_principal(id: &str) -> Principal {
    let mut permissions = HashSet::new();
    permissions.insert("admin".to_string());
    permissions.insert("realtime-access".to_string());
    Principal { id: id.to_string(), permissions }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: &str, perms: &[&str]) -> Principal {
        Principal {
            id: id.to_string(),
            permissions: perms.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn issued_token_verifies_back_to_the_same_principal() {
        let registry = PrincipalRegistry::new();
        let token = registry.issue(principal("dash-1", &["realtime-access", "race-data"]));
        let verified = registry.verify(&token).expect("should verify");
        assert_eq!(verified.id, "dash-1");
        assert!(verified.has("race-data"));
    }

    #[test]
    fn missing_realtime_access_is_rejected() {
        let registry = PrincipalRegistry::new();
        let token = registry.issue(principal("dash-2", &["race-data"]));
        assert!(registry.verify(&token).is_none());
    }

    #[test]
    fn tampered_secret_is_rejected() {
        let registry = PrincipalRegistry::new();
        let token = registry.issue(principal("dash-3", &["realtime-access"]));
        let (prefix, _) = token.split_once('.').unwrap();
        let tampered = format!("{prefix}.0000000000000000000000000000000000000000000000");
        assert!(registry.verify(&tampered).is_none());
    }

    #[test]
    fn revoked_principal_no_longer_verifies() {
        let registry = PrincipalRegistry::new();
        let token = registry.issue(principal("dash-4", &["realtime-access"]));
        registry.revoke("dash-4");
        assert!(registry.verify(&token).is_none());
    }
}
