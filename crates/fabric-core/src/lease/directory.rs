//! Lock service whose state lives in a shared directory.
//!
//! Layout: `<root>/leases.json`, the serialized lease table. Every call
//! reloads the file, applies the change and writes it back atomically, so
//! processes pointed at the same directory see each other's leases.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::table::LeaseTable;
use super::{Lease, LeaseBackend, LeaseError, LeaseResult, SimClock};

const STATE_FILE: &str = "leases.json";

pub struct DirectoryLeaseBackend {
    root: PathBuf,
    clock: Arc<SimClock>,
    /// Serialises load-modify-store within this process.
    guard: Mutex<()>,
}

impl DirectoryLeaseBackend {
    /// Open (creating if needed) the lease directory at `root`.
    pub fn open(root: impl AsRef<Path>, clock: Arc<SimClock>) -> LeaseResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(storage)?;
        Ok(Self {
            root,
            clock,
            guard: Mutex::new(()),
        })
    }

    /// Open the lease directory at `root` and reset it to an empty table.
    ///
    /// Simulated time restarts at zero with every run, so leases, tokens
    /// and registrations left behind by an earlier run must not survive.
    pub fn open_fresh(root: impl AsRef<Path>, clock: Arc<SimClock>) -> LeaseResult<Self> {
        let backend = Self::open(root, clock)?;
        backend.store(&LeaseTable::default())?;
        Ok(backend)
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    fn load(&self) -> LeaseResult<LeaseTable> {
        match fs::read(self.state_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(storage),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LeaseTable::default()),
            Err(e) => Err(storage(e)),
        }
    }

    fn store(&self, table: &LeaseTable) -> LeaseResult<()> {
        let data = serde_json::to_vec_pretty(table).map_err(storage)?;
        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(storage)?;
        tmp.write_all(&data).map_err(storage)?;
        tmp.persist(self.state_path()).map_err(|e| storage(e.error))?;
        Ok(())
    }

    fn with_table<T>(
        &self,
        f: impl FnOnce(&mut LeaseTable) -> LeaseResult<T>,
    ) -> LeaseResult<T> {
        let _held = self
            .guard
            .lock()
            .map_err(|_| storage("lease directory lock poisoned"))?;
        let mut table = self.load()?;
        let before = table.clone();
        let out = f(&mut table)?;
        if table != before {
            self.store(&table)?;
        }
        Ok(out)
    }
}

fn storage(err: impl std::fmt::Display) -> LeaseError {
    LeaseError::Storage(err.to_string())
}

#[async_trait]
impl LeaseBackend for DirectoryLeaseBackend {
    fn backend_name(&self) -> &'static str {
        "directory"
    }

    async fn register_agent(&self, agent_id: &str) -> LeaseResult<()> {
        self.with_table(|t| {
            t.register_agent(agent_id);
            Ok(())
        })
    }

    async fn register_resource(&self, path: &str, shared: bool) -> LeaseResult<()> {
        self.with_table(|t| {
            t.register_resource(path, shared);
            Ok(())
        })
    }

    async fn acquire(&self, agent_id: &str, path: &str, ttl_secs: u64) -> LeaseResult<Lease> {
        let now = self.clock.now_ms();
        self.with_table(|t| t.acquire(agent_id, path, ttl_secs, now))
    }

    async fn heartbeat(&self, token: &str, ttl_secs: u64) -> LeaseResult<Lease> {
        let now = self.clock.now_ms();
        self.with_table(|t| t.heartbeat(token, ttl_secs, now))
    }

    async fn release(&self, agent_id: &str, path: &str, token: Option<&str>) -> LeaseResult<bool> {
        self.with_table(|t| Ok(t.release(agent_id, path, token)))
    }
}
