use crate::audit::{AuditKind, AuditLog, AuditOutcome, SYSTEM_STREAM};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use utoipa::ToSchema;
use watchtower::RegionMonitor;

/// Lifecycle of one region.
///
/// `Draining` keeps serving verifications for existing sessions but accepts
/// no new ones; it is only ever entered through an explicit [`FailoverCoordinator::drain`]
/// call, never through probe results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RegionState {
    Active,
    Standby,
    Draining,
    Down,
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegionState::Active => "active",
            RegionState::Standby => "standby",
            RegionState::Draining => "draining",
            RegionState::Down => "down",
        };
        write!(f, "{s}")
    }
}

/// One row of the coordinator's snapshot, as exposed by the health endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RegionStatus {
    pub name: String,
    pub state: RegionState,
}

/// Tracks region states and picks the active region.
///
/// Regions are ordered by configuration; the first configured region starts
/// `Active`, the rest `Standby`. Promotion always picks the first `Standby`
/// in configured order, so failover is deterministic. Every transition is
/// recorded on the system audit stream.
pub struct FailoverCoordinator {
    regions: Vec<String>,
    states: RwLock<HashMap<String, RegionState>>,
    audit: AuditLog,
}

impl FailoverCoordinator {
    pub fn new(regions: Vec<String>, audit: AuditLog) -> Self {
        let mut states = HashMap::new();
        for (i, region) in regions.iter().enumerate() {
            let state = if i == 0 {
                RegionState::Active
            } else {
                RegionState::Standby
            };
            states.insert(region.clone(), state);
        }
        Self {
            regions,
            states: RwLock::new(states),
            audit,
        }
    }

    /// The region currently serving writes, if any.
    pub fn active_region(&self) -> Option<String> {
        let states = self.states.read().expect("region state lock poisoned");
        self.regions
            .iter()
            .find(|r| states.get(*r) == Some(&RegionState::Active))
            .cloned()
    }

    pub fn state_of(&self, region: &str) -> Option<RegionState> {
        self.states
            .read()
            .expect("region state lock poisoned")
            .get(region)
            .copied()
    }

    /// Whether `region` may accept new sessions and codes.
    pub fn accepts_new_sessions(&self, region: &str) -> bool {
        self.state_of(region) == Some(RegionState::Active)
    }

    /// Whether `region` may serve reads (verifications).
    pub fn serves_reads(&self, region: &str) -> bool {
        matches!(
            self.state_of(region),
            Some(RegionState::Active | RegionState::Draining)
        )
    }

    /// All regions and their current states, in configured order.
    pub fn snapshot(&self) -> Vec<RegionStatus> {
        let states = self.states.read().expect("region state lock poisoned");
        self.regions
            .iter()
            .map(|r| RegionStatus {
                name: r.clone(),
                state: states.get(r).copied().unwrap_or(RegionState::Down),
            })
            .collect()
    }

    /// Feed a probe verdict into the state machine.
    ///
    /// An unhealthy verdict sends the region `Down` from any state except
    /// `Down` itself; a healthy verdict brings a `Down` region back as
    /// `Standby`. Losing the active region immediately promotes the first
    /// healthy standby.
    pub fn apply_health(&self, region: &str, healthy: bool) {
        let mut transitions = Vec::new();
        {
            let mut states = self.states.write().expect("region state lock poisoned");
            let Some(&current) = states.get(region) else {
                warn!("Probe verdict for unknown region '{region}' ignored");
                return;
            };

            let next = match (current, healthy) {
                (RegionState::Down, true) => Some(RegionState::Standby),
                (RegionState::Down, false) => None,
                (_, true) => None,
                (_, false) => Some(RegionState::Down),
            };
            if let Some(next) = next {
                states.insert(region.to_string(), next);
                transitions.push((region.to_string(), current, next));
            }
            self.ensure_active(&mut states, &mut transitions);
        }
        self.publish(transitions);
    }

    /// Manually put the active region into `Draining` and promote a standby.
    /// Has no effect on regions that are not `Active`.
    pub fn drain(&self, region: &str) {
        let mut transitions = Vec::new();
        {
            let mut states = self.states.write().expect("region state lock poisoned");
            if states.get(region) != Some(&RegionState::Active) {
                warn!("Drain requested for non-active region '{region}'; ignored");
                return;
            }
            states.insert(region.to_string(), RegionState::Draining);
            transitions.push((region.to_string(), RegionState::Active, RegionState::Draining));
            self.ensure_active(&mut states, &mut transitions);
        }
        self.publish(transitions);
    }

    /// Spawn a task that feeds one region monitor's liveness changes into
    /// the coordinator. The monitor is owned by the task and probes until
    /// the task is dropped with the runtime.
    pub fn attach(self: &Arc<Self>, monitor: RegionMonitor) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut liveness = monitor.subscribe();
            loop {
                let healthy = *liveness.borrow_and_update();
                coordinator.apply_health(monitor.region(), healthy);
                if liveness.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    fn ensure_active(
        &self,
        states: &mut HashMap<String, RegionState>,
        transitions: &mut Vec<(String, RegionState, RegionState)>,
    ) {
        let has_active = self
            .regions
            .iter()
            .any(|r| states.get(r) == Some(&RegionState::Active));
        if has_active {
            return;
        }
        let promoted = self
            .regions
            .iter()
            .find(|r| states.get(*r) == Some(&RegionState::Standby))
            .cloned();
        match promoted {
            Some(region) => {
                states.insert(region.clone(), RegionState::Active);
                transitions.push((region, RegionState::Standby, RegionState::Active));
            }
            None => error!("No standby region available for promotion; no region is active"),
        }
    }

    fn publish(&self, transitions: Vec<(String, RegionState, RegionState)>) {
        for (region, from, to) in transitions {
            info!("Region '{region}' transitioned {from} -> {to}");
            let outcome = if to == RegionState::Down {
                AuditOutcome::Failure
            } else {
                AuditOutcome::Success
            };
            self.audit.record(
                AuditKind::RegionFailover,
                SYSTEM_STREAM,
                None,
                outcome,
                json!({ "region": region, "from": from, "to": to }),
            );
        }
    }
}
