//! Lease-table state machine shared by every backend.
//!
//! Backends differ only in where the table lives; all decisions are made
//! here so their observable semantics cannot drift apart.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Lease, LeaseError, LeaseResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ResourceEntry {
    pub shared: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct LeaseTable {
    agents: BTreeSet<String>,
    resources: BTreeMap<String, ResourceEntry>,
    leases: BTreeMap<String, Lease>,
    /// Number of leases ever issued; salts token derivation.
    issued: u64,
}

impl LeaseTable {
    pub fn register_agent(&mut self, agent_id: &str) -> bool {
        self.agents.insert(agent_id.to_string())
    }

    pub fn register_resource(&mut self, path: &str, shared: bool) -> bool {
        self.resources
            .insert(path.to_string(), ResourceEntry { shared })
            .is_none()
    }

    pub fn acquire(
        &mut self,
        agent_id: &str,
        path: &str,
        ttl_secs: u64,
        now_ms: u64,
    ) -> LeaseResult<Lease> {
        if !self.agents.contains(agent_id) {
            return Err(LeaseError::UnknownAgent {
                agent_id: agent_id.to_string(),
            });
        }
        let resource = self
            .resources
            .get(path)
            .copied()
            .ok_or_else(|| LeaseError::UnknownResource {
                path: path.to_string(),
            })?;

        if let Some(current) = self.leases.get(path) {
            if current.is_valid_at(now_ms)
                && current.holder_agent_id != agent_id
                && !resource.shared
            {
                return Err(LeaseError::Conflict {
                    path: path.to_string(),
                    holder: current.holder_agent_id.clone(),
                    expires_at_ms: current.expires_at_ms,
                });
            }
        }

        self.issued += 1;
        let lease = Lease {
            token: derive_token(agent_id, path, now_ms, self.issued),
            resource_path: path.to_string(),
            holder_agent_id: agent_id.to_string(),
            expires_at_ms: expiry(now_ms, ttl_secs),
        };
        self.leases.insert(path.to_string(), lease.clone());
        Ok(lease)
    }

    pub fn heartbeat(&mut self, token: &str, ttl_secs: u64, now_ms: u64) -> LeaseResult<Lease> {
        let lease = self
            .leases
            .values_mut()
            .find(|l| l.token == token)
            .ok_or_else(|| LeaseError::TokenNotFound {
                token: token.to_string(),
            })?;
        lease.expires_at_ms = expiry(now_ms, ttl_secs);
        Ok(lease.clone())
    }

    /// Remove the lease on `path` if `agent_id` holds it (and `token`
    /// matches, when given). Anything else is a no-op reporting `false`.
    pub fn release(&mut self, agent_id: &str, path: &str, token: Option<&str>) -> bool {
        let held = match self.leases.get(path) {
            Some(current) => {
                current.holder_agent_id == agent_id
                    && token.map_or(true, |t| current.token == t)
            }
            None => false,
        };
        if held {
            self.leases.remove(path);
        }
        held
    }
}

fn expiry(now_ms: u64, ttl_secs: u64) -> u64 {
    now_ms.saturating_add(ttl_secs.saturating_mul(1000))
}

fn derive_token(agent_id: &str, path: &str, now_ms: u64, issued: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{agent_id}:{path}:{now_ms}:{issued}").as_bytes());
    let hex = hex::encode(hasher.finalize());
    hex[..20].to_string()
}
