use crate::config::Settings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use utoipa::ToSchema;

/// Closed, ordered set of role tiers, least to most privileged.
///
/// The names follow the tier branding of the upstream platform; the policy a
/// tier carries (lifetime, verification strength, scopes) is configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RoleTier {
    Opal,
    Sapphire,
    Emerald,
    Diamond,
}

impl RoleTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleTier::Opal => "opal",
            RoleTier::Sapphire => "sapphire",
            RoleTier::Emerald => "emerald",
            RoleTier::Diamond => "diamond",
        }
    }

    pub const ALL: [RoleTier; 4] = [
        RoleTier::Opal,
        RoleTier::Sapphire,
        RoleTier::Emerald,
        RoleTier::Diamond,
    ];
}

/// How strongly a subject must have been verified to hold a session at a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStrength {
    Password,
    OneTimeCode,
    MultiFactor,
}

/// Session policy attached to a role tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePolicy {
    /// Maximum session lifetime in seconds
    pub max_lifetime_secs: u64,
    /// Whether verification refreshes the session expiry
    #[serde(default)]
    pub sliding_window: bool,
    /// Verification strength required at login
    pub verification: VerificationStrength,
    /// Scopes granted to sessions at this tier
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Built-in policy table, overridable through configuration.
pub fn default_policy(tier: RoleTier) -> RolePolicy {
    match tier {
        RoleTier::Opal => RolePolicy {
            max_lifetime_secs: 900,
            sliding_window: false,
            verification: VerificationStrength::Password,
            scopes: vec!["profile:read".to_string()],
        },
        RoleTier::Sapphire => RolePolicy {
            max_lifetime_secs: 3600,
            sliding_window: false,
            verification: VerificationStrength::Password,
            scopes: vec!["profile:read".to_string(), "content:read".to_string()],
        },
        RoleTier::Emerald => RolePolicy {
            max_lifetime_secs: 28_800,
            sliding_window: false,
            verification: VerificationStrength::OneTimeCode,
            scopes: vec![
                "profile:read".to_string(),
                "content:read".to_string(),
                "content:write".to_string(),
            ],
        },
        RoleTier::Diamond => RolePolicy {
            max_lifetime_secs: 43_200,
            sliding_window: false,
            verification: VerificationStrength::MultiFactor,
            scopes: vec![
                "profile:read".to_string(),
                "content:read".to_string(),
                "content:write".to_string(),
                "admin".to_string(),
            ],
        },
    }
}

/// Resolves a (tenant, subject) pair to a role tier and its policy.
///
/// Resolution happens on every new session, never cached, so an assignment
/// change binds at the next login.
pub struct RoleResolver {
    default_tier: RoleTier,
    policies: HashMap<RoleTier, RolePolicy>,
    assignments: RwLock<HashMap<(String, String), RoleTier>>,
}

impl RoleResolver {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut policies: HashMap<RoleTier, RolePolicy> = RoleTier::ALL
            .iter()
            .map(|tier| (*tier, default_policy(*tier)))
            .collect();
        for (tier, policy) in &settings.roles.policies {
            policies.insert(*tier, policy.clone());
        }

        let assignments = settings
            .roles
            .assignments
            .iter()
            .map(|a| {
                (
                    (a.tenant_id.clone(), a.subject_id.clone()),
                    a.tier,
                )
            })
            .collect();

        Self {
            default_tier: settings.roles.default_tier,
            policies,
            assignments: RwLock::new(assignments),
        }
    }

    /// Compute the current tier for a subject within a tenant.
    pub fn resolve(&self, tenant_id: &str, subject_id: &str) -> RoleTier {
        self.assignments
            .read()
            .expect("role assignment lock poisoned")
            .get(&(tenant_id.to_string(), subject_id.to_string()))
            .copied()
            .unwrap_or(self.default_tier)
    }

    /// The policy attached to a tier.
    pub fn policy(&self, tier: RoleTier) -> &RolePolicy {
        // All four tiers are populated in from_settings
        self.policies
            .get(&tier)
            .expect("policy table covers every tier")
    }

    /// Replace a subject's tier assignment. Existing sessions keep the tier
    /// they were created with; the change binds at the next session creation.
    pub fn assign(&self, tenant_id: &str, subject_id: &str, tier: RoleTier) {
        self.assignments
            .write()
            .expect("role assignment lock poisoned")
            .insert((tenant_id.to_string(), subject_id.to_string()), tier);
    }
}
