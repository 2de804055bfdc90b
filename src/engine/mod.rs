mod error;
mod mutations;
mod queries;
mod settlement;

pub use error::EngineError;
pub use mutations::{DiveRecordPatch, NewTemplate};
pub use queries::{RosterEntry, TripSummary};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::timeout;
use ulid::Ulid;

use crate::collab::{AuditEvent, Collaborators};
use crate::config::EngineConfig;
use crate::model::*;
use crate::observability;

use settlement::SettlementSlot;

pub type SharedTripState = Arc<RwLock<TripState>>;
pub type SharedParticipation = Arc<RwLock<Participation>>;
pub type SharedDiveRecord = Arc<RwLock<DiveRecord>>;

/// Booking-to-settlement transaction engine.
///
/// Each scheduled trip is one aggregate behind its own lock; the lock is
/// the capacity guard and serializes every capacity-sensitive mutation
/// (booking creation, cancellation, check-in). Participations and
/// personal records carry their own per-record locks and are independent
/// across participants. Locks are never held across collaborator calls.
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) collab: Collaborators,

    pub(super) templates: DashMap<Ulid, TripTemplate>,
    pub(super) trips: DashMap<Ulid, SharedTripState>,
    /// booking id → owning trip.
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    /// dive id → owning trip.
    pub(super) dive_index: DashMap<Ulid, Ulid>,

    pub(super) participations: DashMap<Ulid, SharedParticipation>,
    /// (dive, diver) → participation; enforces one assignment per pair.
    pub(super) participation_index: DashMap<(Ulid, Ulid), Ulid>,
    /// dive → participation ids, in assignment order.
    pub(super) dive_participants: DashMap<Ulid, Vec<Ulid>>,

    pub(super) records: DashMap<Ulid, SharedDiveRecord>,
    /// (dive, diver) → record; enforces one personal record per pair.
    pub(super) record_index: DashMap<(Ulid, Ulid), Ulid>,
    /// Per-diver personal dive numbering.
    pub(super) dive_counts: DashMap<Ulid, u32>,

    /// (trip, diver) → approved exemptions, consumed at evaluation time.
    pub(super) exemptions: DashMap<(Ulid, Ulid), Vec<Exemption>>,

    /// Idempotency table: key → pending claim or posted record.
    pub(super) settlements: DashMap<String, SettlementSlot>,
    /// booking → revenue idempotency key, so trip completion never posts
    /// revenue twice across different batches.
    pub(super) revenue_index: DashMap<Ulid, String>,
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch")
        .as_millis() as Ms
}

impl Engine {
    pub fn new(config: EngineConfig, collab: Collaborators) -> Self {
        Self {
            config,
            collab,
            templates: DashMap::new(),
            trips: DashMap::new(),
            booking_index: DashMap::new(),
            dive_index: DashMap::new(),
            participations: DashMap::new(),
            participation_index: DashMap::new(),
            dive_participants: DashMap::new(),
            records: DashMap::new(),
            record_index: DashMap::new(),
            dive_counts: DashMap::new(),
            exemptions: DashMap::new(),
            settlements: DashMap::new(),
            revenue_index: DashMap::new(),
        }
    }

    pub(super) fn trip(&self, id: &Ulid) -> Option<SharedTripState> {
        self.trips.get(id).map(|e| e.value().clone())
    }

    /// Acquire the trip's exclusive lock with a bounded wait. This is the
    /// capacity guard: all mutations of the trip's seat inventory pass
    /// through here, and it never blocks operations on other trips.
    pub(super) async fn lock_trip(
        &self,
        trip_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<TripState>, EngineError> {
        let rs = self.trip(&trip_id).ok_or(EngineError::NotFound(trip_id))?;
        match timeout(self.config.lock_wait, rs.write_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                tracing::warn!(trip = %trip_id, "trip lock wait timed out");
                Err(EngineError::LockTimeout(trip_id))
            }
        }
    }

    pub(super) async fn read_trip(
        &self,
        trip_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<TripState>, EngineError> {
        let rs = self.trip(&trip_id).ok_or(EngineError::NotFound(trip_id))?;
        Ok(rs.read_owned().await)
    }

    /// Resolve a booking id to its owning trip's write guard.
    pub(super) async fn lock_trip_for_booking(
        &self,
        booking_id: Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<TripState>), EngineError> {
        let trip_id = *self
            .booking_index
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let guard = self.lock_trip(trip_id).await?;
        Ok((trip_id, guard))
    }

    /// Append one audit event. Called strictly after the mutation has
    /// committed and every lock has been released.
    pub(super) async fn emit(
        &self,
        action: &'static str,
        actor: Ulid,
        target_kind: &'static str,
        target: Ulid,
        changes: serde_json::Value,
        metadata: serde_json::Value,
    ) {
        self.collab
            .events
            .append(AuditEvent {
                action,
                actor,
                target_kind,
                target,
                changes,
                at: now_ms(),
                metadata,
            })
            .await;
    }
}
