use crate::config::Settings;
use crate::errors::AuthorizationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An isolated customer namespace with its own data, keys, and audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub namespace: String,
    /// Name of the tenant's key in the external secret store
    pub key_ref: String,
}

/// The kinds of records the gateway partitions per tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Code,
    Session,
    SubjectIndex,
}

impl KeyKind {
    fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Code => "code",
            KeyKind::Session => "sess",
            KeyKind::SubjectIndex => "subj",
        }
    }
}

/// Catalog of known tenants and the only place store keys are built.
///
/// Every partitioned record (codes, sessions, subject indexes) goes through
/// `scoped_key`, so no code path can address another tenant's namespace.
/// Unknown tenants fail closed.
#[derive(Debug)]
pub struct TenantCatalog {
    tenants: HashMap<String, Tenant>,
}

impl TenantCatalog {
    /// Build the catalog from configuration, rejecting duplicate ids and
    /// overlapping namespaces.
    pub fn from_settings(settings: &Settings) -> Result<Self, String> {
        let mut tenants = HashMap::new();
        let mut namespaces: HashMap<&str, &str> = HashMap::new();

        for tc in &settings.tenants {
            if tc.id.is_empty() || tc.namespace.is_empty() {
                return Err(format!("tenant '{}' has an empty id or namespace", tc.id));
            }
            if let Some(other) = namespaces.insert(tc.namespace.as_str(), tc.id.as_str()) {
                return Err(format!(
                    "tenants '{}' and '{}' share the namespace '{}'",
                    other, tc.id, tc.namespace
                ));
            }
            let previous = tenants.insert(
                tc.id.clone(),
                Tenant {
                    id: tc.id.clone(),
                    namespace: tc.namespace.clone(),
                    key_ref: tc.key_ref.clone(),
                },
            );
            if previous.is_some() {
                return Err(format!("tenant '{}' is declared twice", tc.id));
            }
        }

        Ok(Self { tenants })
    }

    pub fn get(&self, tenant_id: &str) -> Option<&Tenant> {
        self.tenants.get(tenant_id)
    }

    /// Build the store key for a record inside a tenant's namespace.
    /// Fails closed when the tenant is unknown.
    pub fn scoped_key(
        &self,
        tenant_id: &str,
        kind: KeyKind,
        id: &str,
    ) -> Result<String, AuthorizationError> {
        let tenant = self
            .tenants
            .get(tenant_id)
            .ok_or(AuthorizationError::CrossTenantDenied)?;
        Ok(format!("t:{}:{}:{}", tenant.namespace, kind.as_str(), id))
    }

    /// Guard for every resource access: the session's tenant must equal the
    /// resource's tenant exactly. Never narrows scope silently.
    pub fn ensure_same_tenant(
        &self,
        session_tenant: &str,
        resource_tenant: &str,
    ) -> Result<(), AuthorizationError> {
        if self.tenants.contains_key(session_tenant) && session_tenant == resource_tenant {
            Ok(())
        } else {
            Err(AuthorizationError::CrossTenantDenied)
        }
    }
}
