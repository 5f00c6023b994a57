//! Short-lived handoff records for login → channel and channel → channel
//! moves.
//!
//! A record is keyed by character id and consumed at most once: `consume`
//! removes under the same lock that finds it. Expired records are invisible
//! to every lookup even before the sweep removes them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::repository::Account;
use crate::utils::global_metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub character_id: i32,
    pub account_id: i32,
    /// Account as it was when the record was created; re-validated on consume.
    pub account: Account,
    pub target_world: u8,
    pub target_channel: u8,
    pub machine_id: String,
    pub client_key: i64,
    pub expires_at: Instant,
}

impl MigrationRecord {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Inputs for [`MigrationManager::create`].
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub character_id: i32,
    pub account: Account,
    pub target_world: u8,
    pub target_channel: u8,
    pub machine_id: String,
    pub client_key: i64,
}

#[derive(Debug)]
pub struct MigrationManager {
    records: Mutex<HashMap<i32, MigrationRecord>>,
    ttl: Duration,
}

impl MigrationManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert a record, replacing any earlier one for the same character.
    pub fn create(&self, request: MigrationRequest) -> MigrationRecord {
        let record = MigrationRecord {
            character_id: request.character_id,
            account_id: request.account.id,
            account: request.account,
            target_world: request.target_world,
            target_channel: request.target_channel,
            machine_id: request.machine_id,
            client_key: request.client_key,
            expires_at: Instant::now() + self.ttl,
        };
        let replaced = self
            .records
            .lock()
            .insert(record.character_id, record.clone());
        global_metrics().migration_created();
        debug!(
            character_id = record.character_id,
            world = record.target_world,
            channel = record.target_channel,
            replaced = replaced.is_some(),
            "Migration record created"
        );
        record
    }

    /// Remove and return a live record. An expired record is removed too but
    /// reported as absent.
    pub fn consume(&self, character_id: i32) -> Option<MigrationRecord> {
        let record = self.records.lock().remove(&character_id)?;
        if record.is_expired(Instant::now()) {
            debug!(character_id, "Migration record expired before use");
            return None;
        }
        global_metrics().migration_consumed();
        Some(record)
    }

    pub fn exists(&self, character_id: i32) -> bool {
        let now = Instant::now();
        self.records
            .lock()
            .get(&character_id)
            .is_some_and(|r| !r.is_expired(now))
    }

    pub fn cancel(&self, character_id: i32) -> bool {
        self.records.lock().remove(&character_id).is_some()
    }

    /// Drop expired records, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        let removed = before - records.len();
        drop(records);
        if removed > 0 {
            global_metrics().migrations_swept(removed);
            debug!(removed, "Swept expired migration records");
        }
        removed
    }

    /// Records physically held, expired or not.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = manager.upgrade() else { break };
                manager.sweep();
            }
            info!("Migration sweeper stopped");
        })
    }
}
