//! Read-side operations. Queries never mutate aggregate state and take
//! plain read locks; none of them consult the capacity lock path.

use rust_decimal::Decimal;
use ulid::Ulid;

use crate::collab::ProofKind;
use crate::eligibility::{self, StatusGates, TripRequirements};
use crate::model::*;
use crate::overlay;
use crate::pricing;

use super::settlement::SettlementSlot;
use super::{Engine, EngineError};

/// Snapshot of a trip's occupancy and lifecycle position.
#[derive(Debug, Clone, PartialEq)]
pub struct TripSummary {
    pub trip_id: Ulid,
    pub status: TripStatus,
    pub departure: Ms,
    pub return_at: Ms,
    pub capacity: u32,
    pub confirmed: u32,
    pub spots_remaining: u32,
    pub dives: usize,
}

/// One row of a dive's roster.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub participation_id: Ulid,
    pub diver_id: Ulid,
    pub diver_name: String,
    pub role: Role,
    pub status: ParticipationStatus,
}

impl Engine {
    /// Evaluate the full eligibility chain for a diver against a trip,
    /// as of `at`. Pure with respect to engine state: nothing is
    /// written, and the same inputs always yield the same decision.
    ///
    /// The effective certification floor is the strictest of the
    /// template's, the site's, and any per-dive override.
    pub async fn evaluate_eligibility(
        &self,
        diver_id: Ulid,
        trip_id: Ulid,
        at: Ms,
    ) -> Result<Decision, EngineError> {
        let (template_id, site_id, min_logged_dives, dive_floor) = {
            let t = self.read_trip(trip_id).await?;
            let dive_floor = t.dives.iter().filter_map(|d| d.min_cert_rank).max();
            (t.template_id, t.site_id, t.min_logged_dives, dive_floor)
        };
        let template = self
            .templates
            .get(&template_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(template_id))?;
        let site = self
            .collab
            .catalog
            .site(site_id)
            .ok_or(EngineError::NotFound(site_id))?;
        let diver = self
            .collab
            .directory
            .diver(diver_id)
            .ok_or(EngineError::NotFound(diver_id))?;

        let min_cert_rank = [template.min_cert_rank, site.min_cert_rank, dive_floor]
            .into_iter()
            .flatten()
            .max();
        let req = TripRequirements {
            requires_cert: template.requires_cert,
            min_cert_rank,
            min_logged_dives,
            is_training: template.is_training,
            min_age: template.min_age,
        };
        let gates = StatusGates {
            medical_current: self.collab.proofs.is_current(diver_id, ProofKind::Medical, at),
            waiver_current: self.collab.proofs.is_current(diver_id, ProofKind::Waiver, at),
        };
        let exemptions = self
            .exemptions
            .get(&(trip_id, diver_id))
            .map(|e| e.value().clone())
            .unwrap_or_default();

        Ok(eligibility::evaluate(&diver, &req, &gates, &exemptions, at))
    }

    /// Price a would-be booking right now, without reserving anything.
    /// The returned snapshot is what a reservation made at `at` would
    /// freeze.
    pub async fn quote_price(&self, trip_id: Ulid, at: Ms) -> Result<PriceSnapshot, EngineError> {
        let (template_id, site_id, price_override) = {
            let t = self.read_trip(trip_id).await?;
            (t.template_id, t.site_id, t.price_override)
        };
        let template = self
            .templates
            .get(&template_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(template_id))?;
        let site = self
            .collab
            .catalog
            .site(site_id)
            .ok_or(EngineError::NotFound(site_id))?;
        Ok(pricing::compute_price(&template, price_override, &site, at))
    }

    pub async fn spots_remaining(&self, trip_id: Ulid) -> Result<u32, EngineError> {
        let t = self.read_trip(trip_id).await?;
        Ok(t.capacity.saturating_sub(t.confirmed_count()))
    }

    pub async fn trip_summary(&self, trip_id: Ulid) -> Result<TripSummary, EngineError> {
        let t = self.read_trip(trip_id).await?;
        let confirmed = t.confirmed_count();
        Ok(TripSummary {
            trip_id,
            status: t.status,
            departure: t.departure,
            return_at: t.return_at,
            capacity: t.capacity,
            confirmed,
            spots_remaining: t.capacity.saturating_sub(confirmed),
            dives: t.dives.len(),
        })
    }

    pub async fn booking_snapshot(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let trip_id = *self
            .booking_index
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let t = self.read_trip(trip_id).await?;
        t.booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    pub async fn dive_snapshot(&self, dive_id: Ulid) -> Result<DiveInstance, EngineError> {
        let trip_id = *self
            .dive_index
            .get(&dive_id)
            .ok_or(EngineError::NotFound(dive_id))?;
        let t = self.read_trip(trip_id).await?;
        t.dive(dive_id).cloned().ok_or(EngineError::NotFound(dive_id))
    }

    pub async fn participation_snapshot(
        &self,
        participation_id: Ulid,
    ) -> Result<Participation, EngineError> {
        let arc = self
            .participations
            .get(&participation_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(participation_id))?;
        let p = arc.read().await.clone();
        Ok(p)
    }

    /// Roster of a dive, in assignment order. Divers the directory no
    /// longer knows are listed with an empty name rather than dropped.
    pub async fn dive_roster(&self, dive_id: Ulid) -> Result<Vec<RosterEntry>, EngineError> {
        if !self.dive_index.contains_key(&dive_id) {
            return Err(EngineError::NotFound(dive_id));
        }
        let ids = self
            .dive_participants
            .get(&dive_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut roster = Vec::with_capacity(ids.len());
        for pid in ids {
            let Some(arc) = self.participations.get(&pid).map(|e| e.value().clone()) else {
                continue;
            };
            let p = arc.read().await.clone();
            let diver_name = self
                .collab
                .directory
                .diver(p.diver_id)
                .map(|d| d.name)
                .unwrap_or_default();
            roster.push(RosterEntry {
                participation_id: pid,
                diver_id: p.diver_id,
                diver_name,
                role: p.role,
                status: p.status,
            });
        }
        Ok(roster)
    }

    /// Overlay-resolved view of a personal record: record overrides
    /// first, then the dive's logged outcome, then its plan. A stored
    /// zero is a value, never a gap.
    pub async fn resolve_personal_record(
        &self,
        record_id: Ulid,
    ) -> Result<ResolvedDiveRecord, EngineError> {
        let arc = self
            .records
            .get(&record_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(record_id))?;
        let record = arc.read().await.clone();
        let dive = self.dive_snapshot(record.dive_id).await?;
        let outcome = dive.outcome.as_ref();

        let max_depth_m = overlay::resolve(&[
            record.max_depth_m,
            outcome.map(|o| o.max_depth_m),
            Some(dive.planned_depth_m),
        ]);
        let bottom_time_min = overlay::resolve(&[
            record.bottom_time_min,
            outcome.and_then(|o| o.bottom_time_min),
            Some(dive.planned_duration_min),
        ]);
        Ok(ResolvedDiveRecord {
            record_id,
            dive_id: record.dive_id,
            diver_id: record.diver_id,
            dive_number: record.dive_number,
            max_depth_m,
            bottom_time_min,
            air_consumed_bar: overlay::air_consumed_bar(record.air_start_bar, record.air_end_bar),
            nitrox_percent: record.nitrox_percent,
            verified: record.verified_by.is_some(),
        })
    }

    pub async fn dive_record_snapshot(&self, record_id: Ulid) -> Result<DiveRecord, EngineError> {
        let arc = self
            .records
            .get(&record_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(record_id))?;
        let r = arc.read().await.clone();
        Ok(r)
    }

    /// Personal log length for a diver, as counted by record creation.
    pub fn logged_dive_count(&self, diver_id: Ulid) -> u32 {
        self.dive_counts.get(&diver_id).map(|e| *e.value()).unwrap_or(0)
    }

    /// Look up a posted settlement by its idempotency coordinates.
    /// Pending claims are invisible here.
    pub fn settlement(
        &self,
        booking_id: Ulid,
        kind: SettlementKind,
        batch: &str,
    ) -> Option<Settlement> {
        let key = format!("{booking_id}:{}:{batch}", kind.as_str());
        self.settlements.get(&key).and_then(|e| match e.value() {
            SettlementSlot::Posted(s) => Some(s.clone()),
            SettlementSlot::Pending(_) => None,
        })
    }

    /// Total revenue posted across all settlements for a trip.
    pub fn trip_revenue(&self, trip_id: Ulid) -> Decimal {
        self.settlements
            .iter()
            .filter_map(|e| match e.value() {
                SettlementSlot::Posted(s)
                    if s.trip_id == trip_id && s.kind == SettlementKind::Revenue =>
                {
                    Some(s.amount)
                }
                _ => None,
            })
            .sum()
    }
}
