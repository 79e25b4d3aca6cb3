//! Alert tracking and the per-cycle reconciliation routine.
//!
//! Each client remembers the alerts it raised itself. At the start of every
//! cycle it asks its backend which of them are still unacknowledged; every
//! tracked alert missing from that answer was acknowledged (or removed)
//! elsewhere. Critical alerts get their recovery callback run exactly once,
//! then the alert is forgotten.
//!
//! The routine is written once here and driven by each backend through the
//! `CycleQueries` trait.

use std::collections::{BTreeMap, HashSet};

use serde_json::{json, Value};

use crate::alert::Alert;
use crate::error::{EngineControl, RegisterError, Result};


/// A stop request found in the register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRequest {
    pub code: i32,
    pub reason: String,
}


impl StopRequest {
    /// Stop requests travel and are stored as `[code, reason]`.
    pub fn from_payload(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let code = items.first().and_then(Value::as_i64).unwrap_or(0) as i32;
        let reason = items.get(1).and_then(Value::as_str).unwrap_or("").to_string();
        Some(StopRequest { code, reason })
    }

    pub fn to_payload(&self) -> Value {
        json!([self.code, self.reason])
    }
}


/// Backend answer to "which alerts are still unacknowledged".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnackedAlerts {
    /// Unacknowledged ids among the ones asked about.
    pub ids: HashSet<u64>,
    /// All unacknowledged alerts of this identifier.
    pub total: usize,
}


/// Backend queries the cycle routine needs.
pub trait CycleQueries {
    fn stop_request(&mut self) -> Result<Option<StopRequest>>;

    /// `Ok(None)` means the backend gave no usable answer.
    fn unacknowledged(&mut self, tracked: &[u64]) -> Result<Option<UnackedAlerts>>;
}


/// When to ask the backend about unacknowledged alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPolicy {
    /// Skip the round trip and reset the pending count when nothing is tracked.
    SkipWhenEmpty,
    /// Always query, so the pending count also reflects alerts raised by
    /// earlier runs.
    AlwaysQuery,
}


/// Alerts raised by this client and not yet seen acknowledged.
#[derive(Debug, Default)]
pub struct AlertTracker {
    alerts: BTreeMap<u64, Alert>,
    pending: usize,
}


impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, alert: Alert) {
        self.alerts.insert(alert.id, alert);
    }

    pub fn contains(&self, id: u64) -> bool {
        self.alerts.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.alerts.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Unacknowledged alert count from the last reconciliation.
    pub fn pending_count(&self) -> usize {
        self.pending
    }

    /// Drop every tracked alert not in `unacked`, running recovery
    /// callbacks for critical ones. Returns the removed ids.
    pub fn reconcile(&mut self, unacked: &HashSet<u64>) -> Vec<u64> {
        let gone: Vec<u64> = self
            .alerts
            .keys()
            .filter(|id| !unacked.contains(id))
            .copied()
            .collect();

        for id in &gone {
            if let Some(alert) = self.alerts.remove(id) {
                if alert.recover() {
                    tracing::info!("alert {} (code {}) acknowledged, recovery ran", id, alert.code);
                } else {
                    tracing::debug!("alert {} (code {}) acknowledged", id, alert.code);
                }
            }
        }
        gone
    }
}


/// The `begin_cycle` routine shared by all backends.
///
/// 1. On the main process, a pending stop request aborts with
///    `RegisterError::Control`.
/// 2. Tracked alerts the backend no longer lists as unacknowledged are
///    reconciled.
/// 3. The pending count becomes the backend's unacknowledged total.
pub fn begin_cycle<Q>(
    queries: &mut Q,
    tracker: &mut AlertTracker,
    main_process: bool,
    policy: QueryPolicy,
) -> Result<()>
where
    Q: CycleQueries + ?Sized,
{
    if main_process {
        if let Some(stop) = queries.stop_request()? {
            tracing::warn!("stop requested (code {}): {}", stop.code, stop.reason);
            return Err(RegisterError::Control(EngineControl::StopEngine {
                code: stop.code,
                reason: stop.reason,
            }));
        }
    }

    if tracker.is_empty() && policy == QueryPolicy::SkipWhenEmpty {
        tracker.pending = 0;
        return Ok(());
    }

    let tracked = tracker.ids();
    if let Some(unacked) = queries.unacknowledged(&tracked)? {
        tracker.reconcile(&unacked.ids);
        tracker.pending = unacked.total;
    }
    Ok(())
}
