//! In-process lease backend.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::table::LeaseTable;
use super::{Lease, LeaseBackend, LeaseError, LeaseResult, SimClock};

/// Deterministic in-memory backend holding the lease table behind a mutex.
#[derive(Debug)]
pub struct MemoryLeaseBackend {
    clock: Arc<SimClock>,
    table: Mutex<LeaseTable>,
}

impl MemoryLeaseBackend {
    pub fn new(clock: Arc<SimClock>) -> Self {
        Self {
            clock,
            table: Mutex::new(LeaseTable::default()),
        }
    }

    fn table(&self) -> LeaseResult<MutexGuard<'_, LeaseTable>> {
        self.table
            .lock()
            .map_err(|_| LeaseError::Storage("lease table lock poisoned".to_string()))
    }
}

#[async_trait]
impl LeaseBackend for MemoryLeaseBackend {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn register_agent(&self, agent_id: &str) -> LeaseResult<()> {
        self.table()?.register_agent(agent_id);
        Ok(())
    }

    async fn register_resource(&self, path: &str, shared: bool) -> LeaseResult<()> {
        self.table()?.register_resource(path, shared);
        Ok(())
    }

    async fn acquire(&self, agent_id: &str, path: &str, ttl_secs: u64) -> LeaseResult<Lease> {
        let now = self.clock.now_ms();
        self.table()?.acquire(agent_id, path, ttl_secs, now)
    }

    async fn heartbeat(&self, token: &str, ttl_secs: u64) -> LeaseResult<Lease> {
        let now = self.clock.now_ms();
        self.table()?.heartbeat(token, ttl_secs, now)
    }

    async fn release(&self, agent_id: &str, path: &str, token: Option<&str>) -> LeaseResult<bool> {
        Ok(self.table()?.release(agent_id, path, token))
    }
}
