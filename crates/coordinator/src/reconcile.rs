//! Orphan Reconciliation
//!
//! Out-of-band sweep for identities left without a catalog entry by a
//! partially failed create. Runs on its own schedule, never on a request path.

use crate::coordinator::{with_deadline, SensorCoordinator};
use crate::{CoordinatorError, Result, Store};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage::{DeviceCatalog, IdentityStore, LiveCache, Sensor, SensorId, StorageError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What to do with orphan identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Log and count only
    Report,
    /// Delete orphans seen on two consecutive sweeps
    Remove,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Identities examined
    pub scanned: usize,
    /// Identities with no catalog entry
    pub orphans: Vec<Sensor>,
    /// Orphans deleted by this sweep
    pub removed: usize,
    pub finished_at: DateTime<Utc>,
}

/// Identity/catalog reconciliation sweep
pub struct Reconciler {
    identity: Arc<dyn IdentityStore>,
    catalog: Arc<dyn DeviceCatalog>,
    live: Arc<dyn LiveCache>,
    policy: OrphanPolicy,
    page_size: i64,
    call_timeout: Duration,
    /// Orphans found by the previous sweep. A sensor mid-create looks like an
    /// orphan for one sweep, so removal waits for a second sighting.
    suspects: Mutex<HashSet<SensorId>>,
}

impl Reconciler {
    /// Sweep the same stores the coordinator uses
    pub fn new(coordinator: &SensorCoordinator, policy: OrphanPolicy) -> Self {
        Self {
            identity: coordinator.identity().clone(),
            catalog: coordinator.catalog().clone(),
            live: coordinator.live().clone(),
            policy,
            page_size: 500,
            call_timeout: coordinator.call_timeout(),
            suspects: Mutex::new(HashSet::new()),
        }
    }

    /// Override the identity page size
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn policy(&self) -> OrphanPolicy {
        self.policy
    }

    /// Run one sweep
    pub async fn sweep(&self) -> Result<ReconcileReport> {
        let mut scanned = 0;
        let mut orphans = Vec::new();
        let mut offset = 0;

        loop {
            let page = with_deadline(self.call_timeout, self.identity.list(offset, self.page_size))
                .await
                .map_err(CoordinatorError::unavailable(Store::Identity, "list"))?;
            let fetched = page.len() as i64;

            for sensor in page {
                scanned += 1;
                let entry = with_deadline(self.call_timeout, self.catalog.find_by_sensor_id(sensor.id))
                    .await
                    .map_err(CoordinatorError::unavailable(Store::Catalog, "find_by_sensor_id"))?;
                if entry.is_none() {
                    orphans.push(sensor);
                }
            }

            if fetched < self.page_size {
                break;
            }
            offset += fetched;
        }

        let removed = match self.policy {
            OrphanPolicy::Report => {
                self.remember(&orphans);
                0
            }
            OrphanPolicy::Remove => self.remove_confirmed(&orphans).await?,
        };

        for orphan in &orphans {
            warn!("Orphan identity {} ({}) has no catalog entry", orphan.id, orphan.name);
        }
        if !orphans.is_empty() {
            counter!("sensor_reconcile_orphans_total").increment(orphans.len() as u64);
        }

        info!(
            "Reconcile sweep: scanned {}, orphans {}, removed {}",
            scanned,
            orphans.len(),
            removed
        );

        Ok(ReconcileReport {
            scanned,
            orphans,
            removed,
            finished_at: Utc::now(),
        })
    }

    /// Run `sweep` every `every` on the current runtime
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    error!("Reconcile sweep failed: {}", e);
                }
            }
        })
    }

    fn remember(&self, orphans: &[Sensor]) {
        if let Ok(mut suspects) = self.suspects.lock() {
            *suspects = orphans.iter().map(|s| s.id).collect();
        }
    }

    /// Delete orphans also seen by the previous sweep; the rest become suspects.
    /// On a store error every orphan of this sweep stays a suspect.
    async fn remove_confirmed(&self, orphans: &[Sensor]) -> Result<usize> {
        let previous = match self.suspects.lock() {
            Ok(suspects) => suspects.clone(),
            Err(_) => HashSet::new(),
        };

        let mut removed = 0;
        let mut pending = HashSet::new();

        for orphan in orphans {
            if !previous.contains(&orphan.id) {
                pending.insert(orphan.id);
                continue;
            }

            match self.remove_orphan(orphan).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    self.remember(orphans);
                    return Err(e);
                }
            }
        }

        if let Ok(mut suspects) = self.suspects.lock() {
            *suspects = pending;
        }
        Ok(removed)
    }

    /// Delete one orphan's reading and identity. `false` if it was already gone.
    async fn remove_orphan(&self, orphan: &Sensor) -> Result<bool> {
        with_deadline(self.call_timeout, self.live.delete(orphan.id))
            .await
            .map_err(CoordinatorError::unavailable(Store::Live, "delete"))?;

        match with_deadline(self.call_timeout, self.identity.delete(orphan.id)).await {
            Ok(_) => {
                info!("Removed orphan identity {} ({})", orphan.id, orphan.name);
                Ok(true)
            }
            // Deleted concurrently
            Err(StorageError::NotFound) => {
                debug!("Orphan {} already gone", orphan.id);
                Ok(false)
            }
            Err(source) => Err(CoordinatorError::StoreUnavailable {
                store: Store::Identity,
                op: "delete",
                source,
            }),
        }
    }
}
