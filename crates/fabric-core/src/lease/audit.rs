//! Append-only audit log over any [`LeaseBackend`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::{Lease, LeaseBackend, LeaseError, LeaseResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseOp {
    Acquire,
    Heartbeat,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseOutcome {
    Ok,
    Conflict,
    NotFound,
    Released,
    NotHeld,
    Error,
}

/// One lease call, in call order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseEvent {
    pub seq: u64,
    pub event: LeaseOp,
    pub agent_id: String,
    pub path: String,
    pub token: Option<String>,
    pub outcome: LeaseOutcome,
    pub backend: String,
    /// Conflicting holder, or the error message for `error` outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Backend wrapper recording every acquire, heartbeat and release.
pub struct AuditedLeases {
    inner: Arc<dyn LeaseBackend>,
    events: Mutex<Vec<LeaseEvent>>,
}

impl AuditedLeases {
    pub fn new(inner: Arc<dyn LeaseBackend>) -> Self {
        Self {
            inner,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    pub async fn register_agent(&self, agent_id: &str) -> LeaseResult<()> {
        self.inner.register_agent(agent_id).await
    }

    pub async fn register_resource(&self, path: &str, shared: bool) -> LeaseResult<()> {
        self.inner.register_resource(path, shared).await
    }

    pub async fn acquire(&self, agent_id: &str, path: &str, ttl_secs: u64) -> LeaseResult<Lease> {
        let result = self.inner.acquire(agent_id, path, ttl_secs).await;
        let (token, outcome, detail) = match &result {
            Ok(lease) => (Some(lease.token.clone()), LeaseOutcome::Ok, None),
            Err(LeaseError::Conflict { holder, .. }) => {
                (None, LeaseOutcome::Conflict, Some(holder.clone()))
            }
            Err(e) => (None, LeaseOutcome::Error, Some(e.to_string())),
        };
        self.record(LeaseOp::Acquire, agent_id, path, token, outcome, detail);
        result
    }

    /// Renew `token`; `agent_id` and `path` only label the audit record.
    pub async fn heartbeat(
        &self,
        agent_id: &str,
        path: &str,
        token: &str,
        ttl_secs: u64,
    ) -> LeaseResult<Lease> {
        let result = self.inner.heartbeat(token, ttl_secs).await;
        let (outcome, detail) = match &result {
            Ok(_) => (LeaseOutcome::Ok, None),
            Err(LeaseError::TokenNotFound { .. }) => (LeaseOutcome::NotFound, None),
            Err(e) => (LeaseOutcome::Error, Some(e.to_string())),
        };
        self.record(
            LeaseOp::Heartbeat,
            agent_id,
            path,
            Some(token.to_string()),
            outcome,
            detail,
        );
        result
    }

    pub async fn release(
        &self,
        agent_id: &str,
        path: &str,
        token: Option<&str>,
    ) -> LeaseResult<bool> {
        let result = self.inner.release(agent_id, path, token).await;
        let (outcome, detail) = match &result {
            Ok(true) => (LeaseOutcome::Released, None),
            Ok(false) => (LeaseOutcome::NotHeld, None),
            Err(e) => (LeaseOutcome::Error, Some(e.to_string())),
        };
        self.record(
            LeaseOp::Release,
            agent_id,
            path,
            token.map(str::to_string),
            outcome,
            detail,
        );
        result
    }

    /// Snapshot of the log so far.
    pub fn events(&self) -> Vec<LeaseEvent> {
        self.log().clone()
    }

    pub fn count(&self, op: LeaseOp, outcome: LeaseOutcome) -> usize {
        self.log()
            .iter()
            .filter(|e| e.event == op && e.outcome == outcome)
            .count()
    }

    /// The log is append-only, so a poisoned lock still guards a
    /// consistent prefix.
    fn log(&self) -> MutexGuard<'_, Vec<LeaseEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(
        &self,
        event: LeaseOp,
        agent_id: &str,
        path: &str,
        token: Option<String>,
        outcome: LeaseOutcome,
        detail: Option<String>,
    ) {
        let mut events = self.log();
        let seq = events.len() as u64 + 1;
        events.push(LeaseEvent {
            seq,
            event,
            agent_id: agent_id.to_string(),
            path: path.to_string(),
            token,
            outcome,
            backend: self.inner.backend_name().to_string(),
            detail,
        });
    }
}
