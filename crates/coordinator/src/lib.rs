//! Sensor Coordinator
//!
//! Composes the identity store, device catalog and live reading cache into
//! sensor-level operations. No transaction spans the stores, so each
//! multi-store operation runs its adapter calls in a fixed order:
//!
//! - create: identity, then catalog. A catalog failure leaves an orphan
//!   identity and surfaces as `PartialWriteFailure`.
//! - delete: live reading, then catalog, then identity. The identity delete
//!   is the only existence check; the first two always run.
//! - find near: catalog, then identity and live reading per hit. Only the
//!   catalog calls can fail the search; a hit whose identity is missing or
//!   unreachable is dropped and counted.

mod coordinator;
mod reconcile;
mod view;

pub use coordinator::{NearbySensors, SensorCoordinator, DEFAULT_CALL_TIMEOUT};
pub use reconcile::{OrphanPolicy, ReconcileReport, Reconciler};
pub use view::CompositeView;

use std::fmt;
use storage::{Sensor, SensorId, StorageError};
use thiserror::Error;

/// Which store an adapter call went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Identity,
    Catalog,
    Live,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Store::Identity => write!(f, "identity"),
            Store::Catalog => write!(f, "catalog"),
            Store::Live => write!(f, "live reading"),
        }
    }
}

/// Coordinator errors
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No identity with this id
    #[error("Sensor {0} not found")]
    NotFound(SensorId),

    /// Sensor exists but has never reported
    #[error("Sensor {0} has no recorded data")]
    NoReadingYet(SensorId),

    /// Stored reading could not be parsed
    #[error("Reading for sensor {sensor_id} is corrupt: {reason}")]
    CorruptReading { sensor_id: SensorId, reason: String },

    /// An adapter call failed or timed out
    #[error("{store} store failed during {op}: {source}")]
    StoreUnavailable {
        store: Store,
        op: &'static str,
        source: StorageError,
    },

    /// Identity was written but the catalog entry was not
    #[error("Sensor {} created without catalog entry: {source}", .sensor.id)]
    PartialWriteFailure { sensor: Sensor, source: StorageError },
}

impl CoordinatorError {
    pub(crate) fn unavailable(store: Store, op: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |source| CoordinatorError::StoreUnavailable { store, op, source }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
