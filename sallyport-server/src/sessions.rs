use crate::audit::{AuditKind, AuditLog, AuditOutcome};
use crate::errors::{
    AuthenticationError, GatewayError, TransientError,
};
use crate::roles::{RoleResolver, RoleTier};
use crate::store::replicated::ReplicatedStore;
use crate::store::{StoreBackend, StoreError};
use crate::tenant::{KeyKind, TenantCatalog};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use log::debug;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

/// How long an expired or revoked session record is retained past its
/// logical expiry so verification can answer with the precise failure
/// instead of a generic "not found".
const TOMBSTONE_GRACE_SECS: u64 = 300;

/// Attempts at a contended subject-index swap before giving up.
const CAS_ATTEMPTS: u32 = 4;

/// One authenticated session. The record in the shared store is the single
/// source of truth; nothing about a session lives in process memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Session {
    /// Bearer token, `{tenant_id}.{random}`
    pub token: String,
    pub tenant_id: String,
    pub subject_id: String,
    pub tier: RoleTier,
    pub scopes: Vec<String>,
    /// Epoch seconds
    pub issued_at: i64,
    pub expires_at: i64,
    pub last_seen: i64,
    /// Region that minted the session
    pub region: String,
    pub revoked: bool,
}

impl Session {
    fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    fn remaining_ttl(&self, now: i64) -> u64 {
        (self.expires_at - now).max(0) as u64 + TOMBSTONE_GRACE_SECS
    }
}

/// Per-subject index used to enforce the session concurrency cap.
/// Mutated only through compare-and-swap; eviction picks the entry with
/// the stalest `last_seen`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SubjectIndex {
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexEntry {
    token: String,
    expires_at: i64,
    last_seen: i64,
}

/// Creates, verifies, and revokes sessions against the replicated store.
pub struct SessionService {
    store: Arc<ReplicatedStore>,
    catalog: Arc<TenantCatalog>,
    roles: Arc<RoleResolver>,
    audit: AuditLog,
    max_sessions_per_subject: usize,
}

impl SessionService {
    pub fn new(
        store: Arc<ReplicatedStore>,
        catalog: Arc<TenantCatalog>,
        roles: Arc<RoleResolver>,
        audit: AuditLog,
        max_sessions_per_subject: usize,
    ) -> Self {
        Self {
            store,
            catalog,
            roles,
            audit,
            max_sessions_per_subject,
        }
    }

    /// Create a session for a verified subject.
    ///
    /// The subject's tier is resolved now, checked against the client's
    /// minimum tier when one is configured, and frozen into the session.
    /// When the subject is at its concurrency cap the oldest session is
    /// evicted before the new one is admitted.
    pub async fn create_session(
        &self,
        tenant_id: &str,
        subject_id: &str,
        minimum_tier: Option<RoleTier>,
    ) -> Result<Session, GatewayError> {
        let tier = self.roles.resolve(tenant_id, subject_id);
        if minimum_tier.is_some_and(|required| tier < required) {
            self.audit.record(
                AuditKind::SessionCreated,
                tenant_id,
                None,
                AuditOutcome::Denied,
                json!({ "subject_id": subject_id, "tier": tier, "required": minimum_tier }),
            );
            return Err(crate::errors::AuthorizationError::InsufficientRole.into());
        }
        let policy = self.roles.policy(tier).clone();

        let now = Utc::now().timestamp();
        let token = mint_token(tenant_id);
        let session = Session {
            token: token.clone(),
            tenant_id: tenant_id.to_string(),
            subject_id: subject_id.to_string(),
            tier,
            scopes: policy.scopes.clone(),
            issued_at: now,
            expires_at: now + policy.max_lifetime_secs as i64,
            last_seen: now,
            region: self.store.active_region_name().unwrap_or_default(),
            revoked: false,
        };

        self.enforce_session_cap(tenant_id, subject_id, &session, now)
            .await?;

        let key = self
            .catalog
            .scoped_key(tenant_id, KeyKind::Session, token_suffix(&token))?;
        self.store
            .put(&key, &session, session.remaining_ttl(now))
            .await
            .map_err(map_store_error)?;

        self.audit.record(
            AuditKind::SessionCreated,
            tenant_id,
            Some(&AuditLog::digest(&token)),
            AuditOutcome::Success,
            json!({ "subject_id": subject_id, "tier": tier, "expires_at": session.expires_at }),
        );
        Ok(session)
    }

    /// Validate a bearer token, optionally against a resource tenant.
    ///
    /// The tenant is recovered from the token itself, so lookup never
    /// touches another tenant's namespace. Sliding-window tiers get their
    /// expiry refreshed on success.
    pub async fn verify_session(
        &self,
        token: &str,
        resource_tenant: Option<&str>,
    ) -> Result<Session, GatewayError> {
        let (tenant_id, suffix) =
            parse_token(token).ok_or(AuthenticationError::SessionNotFound)?;
        let key = self.catalog.scoped_key(tenant_id, KeyKind::Session, suffix)?;

        for _ in 0..CAS_ATTEMPTS {
            let now = Utc::now().timestamp();
            let session: Session = self
                .store
                .get(&key)
                .await
                .map_err(map_store_error)?
                .ok_or(AuthenticationError::SessionNotFound)?;

            let verdict = if session.revoked {
                Err(AuthenticationError::SessionRevoked)
            } else if session.is_expired(now) {
                Err(AuthenticationError::SessionExpired)
            } else {
                Ok(())
            };
            if let Err(e) = verdict {
                self.audit.record(
                    AuditKind::SessionVerified,
                    tenant_id,
                    Some(&AuditLog::digest(token)),
                    AuditOutcome::Denied,
                    json!({ "reason": e.code() }),
                );
                return Err(e.into());
            }

            if let Some(resource_tenant) = resource_tenant {
                if let Err(e) = self
                    .catalog
                    .ensure_same_tenant(&session.tenant_id, resource_tenant)
                {
                    self.audit.record(
                        AuditKind::CrossTenantDenied,
                        &session.tenant_id,
                        Some(&AuditLog::digest(token)),
                        AuditOutcome::Denied,
                        json!({ "resource_tenant": resource_tenant }),
                    );
                    return Err(e.into());
                }
            }

            let mut refreshed = session.clone();
            refreshed.last_seen = now;
            let policy = self.roles.policy(session.tier);
            if policy.sliding_window {
                refreshed.expires_at = now + policy.max_lifetime_secs as i64;
            }
            // The write-back must not clobber a revocation that landed
            // between the read and here; a lost swap means the record
            // changed, so re-read and re-evaluate the verdict.
            let won = self
                .store
                .compare_and_swap(&key, Some(&session), &refreshed, refreshed.remaining_ttl(now))
                .await
                .map_err(map_store_error)?;
            if !won {
                debug!("Session record changed under verification; re-reading");
                continue;
            }

            self.touch_index_entry(tenant_id, &refreshed, token).await;
            self.audit.record(
                AuditKind::SessionVerified,
                &refreshed.tenant_id,
                Some(&AuditLog::digest(token)),
                AuditOutcome::Success,
                json!({ "subject_id": refreshed.subject_id, "tier": refreshed.tier }),
            );
            return Ok(refreshed);
        }
        Err(TransientError::StoreTimeout.into())
    }

    /// Revoke a session. Idempotent: revoking an already-revoked session
    /// succeeds. The record stays behind as a tombstone until its natural
    /// expiry plus a grace window.
    pub async fn revoke_session(&self, token: &str) -> Result<(), GatewayError> {
        let (tenant_id, suffix) =
            parse_token(token).ok_or(AuthenticationError::SessionNotFound)?;
        let key = self.catalog.scoped_key(tenant_id, KeyKind::Session, suffix)?;

        for _ in 0..CAS_ATTEMPTS {
            let current: Session = self
                .store
                .get(&key)
                .await
                .map_err(map_store_error)?
                .ok_or(AuthenticationError::SessionNotFound)?;
            if current.revoked {
                return Ok(());
            }

            let now = Utc::now().timestamp();
            let mut tombstone = current.clone();
            tombstone.revoked = true;
            let won = self
                .store
                .compare_and_swap(&key, Some(&current), &tombstone, current.remaining_ttl(now))
                .await
                .map_err(map_store_error)?;
            if won {
                self.forget_index_entry(tenant_id, &current.subject_id, token)
                    .await;
                self.audit.record(
                    AuditKind::SessionRevoked,
                    tenant_id,
                    Some(&AuditLog::digest(token)),
                    AuditOutcome::Success,
                    json!({ "subject_id": current.subject_id }),
                );
                return Ok(());
            }
            debug!("Revocation of session lost a swap; re-reading");
        }
        Err(GatewayError::Internal(
            "session record kept changing during revocation".to_string(),
        ))
    }

    /// Admit `session` into the subject's index, evicting the least
    /// recently used live session when the cap is reached.
    async fn enforce_session_cap(
        &self,
        tenant_id: &str,
        subject_id: &str,
        session: &Session,
        now: i64,
    ) -> Result<(), GatewayError> {
        let index_key = self
            .catalog
            .scoped_key(tenant_id, KeyKind::SubjectIndex, subject_id)?;

        for _ in 0..CAS_ATTEMPTS {
            let current: Option<SubjectIndex> =
                self.store.get(&index_key).await.map_err(map_store_error)?;

            let mut next = current.clone().unwrap_or_default();
            next.entries.retain(|e| e.expires_at > now);

            let mut evicted = Vec::new();
            while next.entries.len() >= self.max_sessions_per_subject {
                let lru = next
                    .entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.last_seen)
                    .map(|(i, _)| i);
                match lru {
                    Some(i) => evicted.push(next.entries.remove(i)),
                    None => break,
                }
            }
            next.entries.push(IndexEntry {
                token: session.token.clone(),
                expires_at: session.expires_at,
                last_seen: session.last_seen,
            });

            let index_ttl = next
                .entries
                .iter()
                .map(|e| (e.expires_at - now).max(0) as u64)
                .max()
                .unwrap_or(0)
                + TOMBSTONE_GRACE_SECS;
            let won = self
                .store
                .compare_and_swap(&index_key, current.as_ref(), &next, index_ttl)
                .await
                .map_err(map_store_error)?;
            if !won {
                continue;
            }

            for old in evicted {
                if let Ok(old_key) = self.catalog.scoped_key(
                    tenant_id,
                    KeyKind::Session,
                    token_suffix(&old.token),
                ) {
                    if let Err(e) = self.store.delete(&old_key).await {
                        log::warn!("Failed to delete evicted session record: {e}");
                    }
                }
                self.audit.record(
                    AuditKind::SessionEvicted,
                    tenant_id,
                    Some(&AuditLog::digest(&old.token)),
                    AuditOutcome::Success,
                    json!({ "subject_id": subject_id, "reason": "concurrency_cap" }),
                );
            }
            return Ok(());
        }
        Err(TransientError::StoreTimeout.into())
    }

    /// Best-effort recency bump after a successful verification so cap
    /// eviction targets the session that has gone longest without use.
    async fn touch_index_entry(&self, tenant_id: &str, session: &Session, token: &str) {
        let Ok(index_key) = self
            .catalog
            .scoped_key(tenant_id, KeyKind::SubjectIndex, &session.subject_id)
        else {
            return;
        };
        for _ in 0..CAS_ATTEMPTS {
            let Ok(current) = self.store.get::<SubjectIndex>(&index_key).await else {
                return;
            };
            let Some(current) = current else { return };
            let mut next = current.clone();
            let Some(entry) = next.entries.iter_mut().find(|e| e.token == token) else {
                return;
            };
            if entry.last_seen >= session.last_seen {
                return;
            }
            entry.last_seen = session.last_seen;
            entry.expires_at = session.expires_at;

            let now = Utc::now().timestamp();
            let index_ttl = next
                .entries
                .iter()
                .map(|e| (e.expires_at - now).max(0) as u64)
                .max()
                .unwrap_or(0)
                + TOMBSTONE_GRACE_SECS;
            match self
                .store
                .compare_and_swap(&index_key, Some(&current), &next, index_ttl)
                .await
            {
                Ok(true) => return,
                Ok(false) => continue,
                Err(_) => return,
            }
        }
    }

    /// Best-effort removal of a revoked session from its subject index.
    async fn forget_index_entry(&self, tenant_id: &str, subject_id: &str, token: &str) {
        let Ok(index_key) = self
            .catalog
            .scoped_key(tenant_id, KeyKind::SubjectIndex, subject_id)
        else {
            return;
        };
        for _ in 0..CAS_ATTEMPTS {
            let Ok(current) = self.store.get::<SubjectIndex>(&index_key).await else {
                return;
            };
            let Some(current) = current else { return };
            if !current.entries.iter().any(|e| e.token == token) {
                return;
            }
            let mut next = current.clone();
            next.entries.retain(|e| e.token != token);
            let now = Utc::now().timestamp();
            let index_ttl = next
                .entries
                .iter()
                .map(|e| (e.expires_at - now).max(0) as u64)
                .max()
                .unwrap_or(0)
                + TOMBSTONE_GRACE_SECS;
            match self
                .store
                .compare_and_swap(&index_key, Some(&current), &next, index_ttl)
                .await
            {
                Ok(true) => return,
                Ok(false) => continue,
                Err(_) => return,
            }
        }
    }
}

fn mint_token(tenant_id: &str) -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{tenant_id}.{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Split a bearer token into its tenant and random parts.
fn parse_token(token: &str) -> Option<(&str, &str)> {
    match token.split_once('.') {
        Some((tenant, suffix)) if !tenant.is_empty() && !suffix.is_empty() => {
            Some((tenant, suffix))
        }
        _ => None,
    }
}

fn token_suffix(token: &str) -> &str {
    token.split_once('.').map(|(_, s)| s).unwrap_or(token)
}

pub(crate) fn map_store_error(e: StoreError) -> GatewayError {
    match e {
        StoreError::Timeout(_) | StoreError::Unavailable(_) => {
            TransientError::StoreTimeout.into()
        }
        other => GatewayError::Internal(other.to_string()),
    }
}
