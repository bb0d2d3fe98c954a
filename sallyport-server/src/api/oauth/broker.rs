use crate::api::oauth::models::IssuedCode;
use crate::audit::{AuditKind, AuditLog, AuditOutcome};
use crate::config::ClientConfig;
use crate::errors::{AuthenticationError, AuthorizationError, GatewayError};
use crate::sessions::{map_store_error, Session, SessionService};
use crate::store::replicated::ReplicatedStore;
use crate::store::StoreBackend;
use crate::tenant::{KeyKind, TenantCatalog};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use log::info;
use rand::RngCore;
use serde_json::json;
use std::sync::Arc;

/// How long a consumed or expired code record lingers so a replayed
/// exchange gets the precise rejection instead of "invalid".
const CODE_TOMBSTONE_GRACE_SECS: u64 = 120;

/// Issues single-use authorization codes and exchanges them for sessions.
///
/// A code is a random value bound at issue time to the client, the subject,
/// and the exact redirect URI. Exchange consumes the code with a
/// compare-and-swap, so concurrent exchanges of the same code admit exactly
/// one winner; everyone else sees `CodeAlreadyUsed`.
pub struct CodeBroker {
    store: Arc<ReplicatedStore>,
    catalog: Arc<TenantCatalog>,
    sessions: Arc<SessionService>,
    audit: AuditLog,
    code_ttl_secs: u64,
}

impl CodeBroker {
    pub fn new(
        store: Arc<ReplicatedStore>,
        catalog: Arc<TenantCatalog>,
        sessions: Arc<SessionService>,
        audit: AuditLog,
        code_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            catalog,
            sessions,
            audit,
            code_ttl_secs,
        }
    }

    /// Issue a fresh single-use code for a registered client.
    ///
    /// The redirect URI must equal the registered one exactly; near-misses
    /// (scheme, trailing slash, extra query) are mismatches.
    pub async fn issue_code(
        &self,
        client: &ClientConfig,
        redirect_uri: &str,
        subject: Option<&str>,
        tenant_hint: Option<&str>,
    ) -> Result<String, GatewayError> {
        if let Some(hint) = tenant_hint {
            if hint != client.tenant_id {
                self.audit.record(
                    AuditKind::CrossTenantDenied,
                    &client.tenant_id,
                    None,
                    AuditOutcome::Denied,
                    json!({ "client_id": client.client_id, "tenant_hint": hint }),
                );
                return Err(AuthorizationError::CrossTenantDenied.into());
            }
        }
        if redirect_uri != client.redirect_uri {
            self.audit.record(
                AuditKind::CodeIssued,
                &client.tenant_id,
                None,
                AuditOutcome::Denied,
                json!({ "client_id": client.client_id, "reason": "redirect_mismatch" }),
            );
            return Err(AuthenticationError::RedirectMismatch.into());
        }

        let subject_id = subject.unwrap_or(&client.default_subject);
        let now = Utc::now().timestamp();
        let code = mint_code();
        let record = IssuedCode {
            client_id: client.client_id.clone(),
            tenant_id: client.tenant_id.clone(),
            subject_id: subject_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            issued_at: now,
            expires_at: now + self.code_ttl_secs as i64,
            consumed: false,
        };

        let key = self
            .catalog
            .scoped_key(&client.tenant_id, KeyKind::Code, &code)?;
        self.store
            .put(&key, &record, self.code_ttl_secs + CODE_TOMBSTONE_GRACE_SECS)
            .await
            .map_err(map_store_error)?;

        info!(
            "Issued authorization code for client '{}' (subject '{}')",
            client.client_id, subject_id
        );
        self.audit.record(
            AuditKind::CodeIssued,
            &client.tenant_id,
            None,
            AuditOutcome::Success,
            json!({
                "client_id": client.client_id,
                "subject_id": subject_id,
                "code": AuditLog::digest(&code),
                "expires_at": record.expires_at,
            }),
        );
        Ok(code)
    }

    /// Exchange a code for a session. Single winner under concurrency.
    pub async fn exchange_code(
        &self,
        client: &ClientConfig,
        code: &str,
        redirect_uri: &str,
        tenant_hint: Option<&str>,
    ) -> Result<Session, GatewayError> {
        if let Some(hint) = tenant_hint {
            if hint != client.tenant_id {
                self.audit.record(
                    AuditKind::CrossTenantDenied,
                    &client.tenant_id,
                    None,
                    AuditOutcome::Denied,
                    json!({ "client_id": client.client_id, "tenant_hint": hint }),
                );
                return Err(AuthorizationError::CrossTenantDenied.into());
            }
        }

        let key = self
            .catalog
            .scoped_key(&client.tenant_id, KeyKind::Code, code)?;
        let record: IssuedCode = self
            .store
            .get(&key)
            .await
            .map_err(map_store_error)?
            .ok_or(AuthenticationError::CodeInvalid)?;

        let now = Utc::now().timestamp();
        let verdict = if record.client_id != client.client_id {
            // A code leaked across clients reveals nothing about why
            Some(AuthenticationError::CodeInvalid)
        } else if record.consumed {
            Some(AuthenticationError::CodeAlreadyUsed)
        } else if now >= record.expires_at {
            Some(AuthenticationError::CodeExpired)
        } else if redirect_uri != record.redirect_uri {
            Some(AuthenticationError::RedirectMismatch)
        } else {
            None
        };
        if let Some(e) = verdict {
            self.deny_exchange(client, code, e.code());
            return Err(e.into());
        }

        let mut consumed = record.clone();
        consumed.consumed = true;
        let won = self
            .store
            .compare_and_swap(
                &key,
                Some(&record),
                &consumed,
                (record.expires_at - now).max(0) as u64 + CODE_TOMBSTONE_GRACE_SECS,
            )
            .await
            .map_err(map_store_error)?;
        if !won {
            self.deny_exchange(client, code, AuthenticationError::CodeAlreadyUsed.code());
            return Err(AuthenticationError::CodeAlreadyUsed.into());
        }

        let session = self
            .sessions
            .create_session(&record.tenant_id, &record.subject_id, client.minimum_tier)
            .await?;

        self.audit.record(
            AuditKind::CodeExchanged,
            &client.tenant_id,
            Some(&AuditLog::digest(&session.token)),
            AuditOutcome::Success,
            json!({
                "client_id": client.client_id,
                "subject_id": record.subject_id,
                "code": AuditLog::digest(code),
            }),
        );
        Ok(session)
    }

    fn deny_exchange(&self, client: &ClientConfig, code: &str, reason: &str) {
        self.audit.record(
            AuditKind::CodeExchanged,
            &client.tenant_id,
            None,
            AuditOutcome::Denied,
            json!({
                "client_id": client.client_id,
                "code": AuditLog::digest(code),
                "reason": reason,
            }),
        );
    }
}

fn mint_code() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::config::Settings;
    use crate::failover::FailoverCoordinator;
    use crate::roles::{RoleResolver, RoleTier};
    use crate::store::memory::InMemoryStore;
    use crate::store::replicated::RegionStore;
    use crate::store::Store;

    fn broker() -> (CodeBroker, Settings) {
        let settings = Settings::for_test();
        let audit = AuditLog::closed_for_test();
        let coordinator = Arc::new(FailoverCoordinator::new(
            vec!["us-west".into()],
            audit.clone(),
        ));
        let store = Arc::new(ReplicatedStore::new(
            vec![RegionStore {
                name: "us-west".into(),
                store: Store::InMemory(InMemoryStore::new(16).unwrap()),
            }],
            coordinator,
            1000,
            250,
        ));
        let catalog = Arc::new(TenantCatalog::from_settings(&settings).unwrap());
        let roles = Arc::new(RoleResolver::from_settings(&settings));
        let sessions = Arc::new(SessionService::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            roles,
            audit.clone(),
            settings.max_sessions_per_subject,
        ));
        let broker = CodeBroker::new(store, catalog, sessions, audit, settings.code_ttl_secs());
        (broker, settings)
    }

    #[tokio::test]
    async fn issued_code_exchanges_for_a_session_once() {
        let (broker, settings) = broker();
        let client = settings.client("acme-portal").unwrap();

        let code = broker
            .issue_code(client, &client.redirect_uri, None, None)
            .await
            .unwrap();
        let session = broker
            .exchange_code(client, &code, &client.redirect_uri, None)
            .await
            .unwrap();
        assert_eq!(session.tenant_id, "acme");
        assert_eq!(session.subject_id, "svc-acme");
        assert_eq!(session.tier, RoleTier::Emerald);

        let err = broker
            .exchange_code(client, &code, &client.redirect_uri, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Authentication(AuthenticationError::CodeAlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn redirect_uri_must_match_exactly() {
        let (broker, settings) = broker();
        let client = settings.client("acme-portal").unwrap();

        let err = broker
            .issue_code(client, "https://a.example/cb/", None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Authentication(AuthenticationError::RedirectMismatch)
        ));

        let code = broker
            .issue_code(client, &client.redirect_uri, None, None)
            .await
            .unwrap();
        let err = broker
            .exchange_code(client, &code, "http://a.example/cb", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Authentication(AuthenticationError::RedirectMismatch)
        ));
    }

    #[tokio::test]
    async fn unknown_code_is_invalid() {
        let (broker, settings) = broker();
        let client = settings.client("acme-portal").unwrap();
        let err = broker
            .exchange_code(client, "never-issued", &client.redirect_uri, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Authentication(AuthenticationError::CodeInvalid)
        ));
    }

    #[tokio::test]
    async fn tenant_hint_mismatch_is_denied_before_lookup() {
        let (broker, settings) = broker();
        let client = settings.client("acme-portal").unwrap();
        let code = broker
            .issue_code(client, &client.redirect_uri, None, None)
            .await
            .unwrap();

        let err = broker
            .exchange_code(client, &code, &client.redirect_uri, Some("globex"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Authorization(AuthorizationError::CrossTenantDenied)
        ));

        // the code is untouched and still exchangeable
        assert!(broker
            .exchange_code(client, &code, &client.redirect_uri, Some("acme"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn code_issued_to_one_client_is_invalid_for_another() {
        let (broker, settings) = broker();
        let portal = settings.client("acme-portal").unwrap();
        let admin = settings.client("acme-admin").unwrap();

        let code = broker
            .issue_code(portal, &portal.redirect_uri, None, None)
            .await
            .unwrap();
        let err = broker
            .exchange_code(admin, &code, &portal.redirect_uri, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Authentication(AuthenticationError::CodeInvalid)
        ));
    }

    #[tokio::test]
    async fn client_minimum_tier_gates_the_exchange() {
        let (broker, settings) = broker();
        let admin = settings.client("acme-admin").unwrap();

        // svc-acme resolves to Emerald, below the client's Diamond floor
        let code = broker
            .issue_code(admin, &admin.redirect_uri, None, None)
            .await
            .unwrap();
        let err = broker
            .exchange_code(admin, &code, &admin.redirect_uri, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Authorization(AuthorizationError::InsufficientRole)
        ));
    }

    #[tokio::test]
    async fn concurrent_exchanges_admit_exactly_one_winner() {
        let (broker, settings) = broker();
        let client = settings.client("acme-portal").unwrap();
        let code = broker
            .issue_code(client, &client.redirect_uri, None, None)
            .await
            .unwrap();

        let broker = Arc::new(broker);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let broker = Arc::clone(&broker);
            let client = client.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                broker
                    .exchange_code(&client, &code, &client.redirect_uri, None)
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
