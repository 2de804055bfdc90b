use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::timeout;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::overlay;
use crate::pricing;
use crate::refund;

use super::{Engine, EngineError, now_ms};

/// Input for template creation; status starts at draft.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub base_price: Decimal,
    pub currency: String,
    pub requires_cert: bool,
    pub min_cert_rank: Option<u8>,
    pub is_training: bool,
    pub min_age: Option<u8>,
    pub dive_mode: DiveMode,
    pub time_of_day: TimeOfDay,
    pub dives: Vec<DiveTemplate>,
}

/// Partial update to a personal dive record. Absent fields are left
/// untouched; present fields become overrides.
#[derive(Debug, Clone, Default)]
pub struct DiveRecordPatch {
    pub max_depth_m: Option<u16>,
    pub bottom_time_min: Option<u16>,
    pub air_start_bar: Option<u16>,
    pub air_end_bar: Option<u16>,
    pub tank_size_l: Option<u16>,
    pub nitrox_percent: Option<u8>,
    pub weight_kg: Option<Decimal>,
    pub suit: Option<SuitType>,
    pub notes: Option<String>,
    pub buddy_name: Option<String>,
}

fn validate_timestamp(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

impl Engine {
    // ── Template lifecycle ───────────────────────────────

    pub async fn create_template(
        &self,
        actor: Ulid,
        new: NewTemplate,
    ) -> Result<Ulid, EngineError> {
        if new.name.is_empty() {
            return Err(EngineError::Invalid("template name required"));
        }
        if new.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("template name too long"));
        }
        if new.base_price < Decimal::ZERO {
            return Err(EngineError::Invalid("base price must not be negative"));
        }
        if new.dives.len() > MAX_DIVES_PER_TRIP {
            return Err(EngineError::LimitExceeded("too many dives in template"));
        }
        for pair in new.dives.windows(2) {
            if pair[1].sequence <= pair[0].sequence {
                return Err(EngineError::Invalid("dive sequences must be strictly increasing"));
            }
        }
        for d in &new.dives {
            if d.planned_depth_m == 0 || d.planned_depth_m > MAX_DEPTH_M {
                return Err(EngineError::Invalid("planned depth out of range"));
            }
        }

        let id = Ulid::new();
        self.templates.insert(
            id,
            TripTemplate {
                id,
                name: new.name,
                base_price: new.base_price,
                currency: new.currency,
                requires_cert: new.requires_cert,
                min_cert_rank: new.min_cert_rank,
                is_training: new.is_training,
                min_age: new.min_age,
                dive_mode: new.dive_mode,
                time_of_day: new.time_of_day,
                dives: new.dives,
                status: TemplateStatus::Draft,
            },
        );
        self.emit("template.created", actor, "template", id, json!({}), json!({})).await;
        Ok(id)
    }

    pub async fn publish_template(&self, template_id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        {
            let mut t = self
                .templates
                .get_mut(&template_id)
                .ok_or(EngineError::NotFound(template_id))?;
            if t.status != TemplateStatus::Draft {
                return Err(EngineError::InvalidTransition {
                    from: t.status.as_str(),
                    to: "published",
                });
            }
            t.status = TemplateStatus::Published;
        }
        self.emit(
            "template.published",
            actor,
            "template",
            template_id,
            json!({"status": {"old": "draft", "new": "published"}}),
            json!({}),
        )
        .await;
        Ok(())
    }

    pub async fn retire_template(&self, template_id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        {
            let mut t = self
                .templates
                .get_mut(&template_id)
                .ok_or(EngineError::NotFound(template_id))?;
            if t.status != TemplateStatus::Published {
                return Err(EngineError::InvalidTransition {
                    from: t.status.as_str(),
                    to: "retired",
                });
            }
            t.status = TemplateStatus::Retired;
        }
        self.emit(
            "template.retired",
            actor,
            "template",
            template_id,
            json!({"status": {"old": "published", "new": "retired"}}),
            json!({}),
        )
        .await;
        Ok(())
    }

    // ── Trip lifecycle ───────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_trip(
        &self,
        actor: Ulid,
        template_id: Ulid,
        site_id: Ulid,
        departure: Ms,
        return_at: Ms,
        capacity: u32,
        price_override: Option<Decimal>,
        min_logged_dives: Option<u32>,
    ) -> Result<Ulid, EngineError> {
        let template = self
            .templates
            .get(&template_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(template_id))?;
        if template.status != TemplateStatus::Published {
            return Err(EngineError::TemplateNotPublished(template_id));
        }
        let site = self
            .collab
            .catalog
            .site(site_id)
            .ok_or(EngineError::NotFound(site_id))?;

        validate_timestamp(departure)?;
        validate_timestamp(return_at)?;
        if return_at <= departure {
            return Err(EngineError::Invalid("return must be strictly after departure"));
        }
        if departure / MS_PER_DAY != return_at / MS_PER_DAY {
            return Err(EngineError::Invalid("departure and return must share a calendar day"));
        }
        if capacity == 0 {
            return Err(EngineError::Invalid("capacity must be positive"));
        }
        if capacity > MAX_TRIP_CAPACITY {
            return Err(EngineError::LimitExceeded("capacity too large"));
        }
        if let Some(p) = price_override
            && p < Decimal::ZERO
        {
            return Err(EngineError::Invalid("price must not be negative"));
        }
        for d in &template.dives {
            if d.planned_depth_m > site.max_depth_m {
                return Err(EngineError::Invalid("planned depth exceeds site limit"));
            }
        }

        let trip_id = Ulid::new();
        let dives: Vec<DiveInstance> = template
            .dives
            .iter()
            .map(|d| DiveInstance {
                id: Ulid::new(),
                trip_id,
                sequence: d.sequence,
                planned_start: departure + d.offset_from_departure,
                planned_depth_m: d.planned_depth_m,
                planned_duration_min: d.planned_duration_min,
                min_cert_rank: d.min_cert_rank,
                outcome: None,
                logged_by: None,
                logged_at: None,
            })
            .collect();
        for d in &dives {
            self.dive_index.insert(d.id, trip_id);
        }

        let trip = TripState {
            id: trip_id,
            template_id,
            site_id,
            status: TripStatus::Scheduled,
            departure,
            return_at,
            capacity,
            price_override,
            min_logged_dives,
            bookings: Vec::new(),
            dives,
        };
        self.trips.insert(trip_id, Arc::new(RwLock::new(trip)));

        metrics::gauge!(observability::TRIPS_ACTIVE).increment(1.0);
        tracing::info!(trip = %trip_id, template = %template_id, capacity, "trip scheduled");
        self.emit(
            "trip.scheduled",
            actor,
            "trip",
            trip_id,
            json!({}),
            json!({
                "template_id": template_id.to_string(),
                "site_id": site_id.to_string(),
                "capacity": capacity,
            }),
        )
        .await;
        Ok(trip_id)
    }

    /// Reprice a live trip. Existing bookings keep their snapshot; only
    /// future reservations see the new price.
    pub async fn update_trip_price(
        &self,
        trip_id: Ulid,
        new_price: Decimal,
        actor: Ulid,
    ) -> Result<(), EngineError> {
        if new_price < Decimal::ZERO {
            return Err(EngineError::Invalid("price must not be negative"));
        }
        let mut guard = self.lock_trip(trip_id).await?;
        if guard.status.is_terminal() {
            return Err(EngineError::TripClosed(guard.status.as_str()));
        }
        let old = guard.price_override;
        guard.price_override = Some(new_price);
        drop(guard);
        self.emit(
            "trip.price_updated",
            actor,
            "trip",
            trip_id,
            json!({"price_override": {"old": old, "new": new_price}}),
            json!({}),
        )
        .await;
        Ok(())
    }

    pub async fn add_dive(
        &self,
        trip_id: Ulid,
        actor: Ulid,
        planned_start: Ms,
        planned_depth_m: u16,
        planned_duration_min: u16,
        min_cert_rank: Option<u8>,
    ) -> Result<Ulid, EngineError> {
        validate_timestamp(planned_start)?;
        if planned_depth_m == 0 || planned_depth_m > MAX_DEPTH_M {
            return Err(EngineError::Invalid("planned depth out of range"));
        }
        let mut guard = self.lock_trip(trip_id).await?;
        if !matches!(guard.status, TripStatus::Scheduled | TripStatus::Boarding) {
            return Err(EngineError::TripClosed(guard.status.as_str()));
        }
        if guard.dives.len() >= MAX_DIVES_PER_TRIP {
            return Err(EngineError::LimitExceeded("too many dives on trip"));
        }
        let id = Ulid::new();
        let sequence = guard.next_dive_sequence();
        guard.dives.push(DiveInstance {
            id,
            trip_id,
            sequence,
            planned_start,
            planned_depth_m,
            planned_duration_min,
            min_cert_rank,
            outcome: None,
            logged_by: None,
            logged_at: None,
        });
        self.dive_index.insert(id, trip_id);
        drop(guard);
        self.emit("dive.added", actor, "dive", id, json!({}), json!({"sequence": sequence}))
            .await;
        Ok(id)
    }

    pub async fn open_boarding(&self, trip_id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        let mut guard = self.lock_trip(trip_id).await?;
        if guard.status != TripStatus::Scheduled {
            return Err(EngineError::InvalidTransition {
                from: guard.status.as_str(),
                to: "boarding",
            });
        }
        guard.status = TripStatus::Boarding;
        drop(guard);
        self.emit(
            "trip.boarding",
            actor,
            "trip",
            trip_id,
            json!({"status": {"old": "scheduled", "new": "boarding"}}),
            json!({}),
        )
        .await;
        Ok(())
    }

    pub async fn start_trip(&self, trip_id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        let mut guard = self.lock_trip(trip_id).await?;
        if !matches!(guard.status, TripStatus::Scheduled | TripStatus::Boarding) {
            return Err(EngineError::InvalidTransition {
                from: guard.status.as_str(),
                to: "in_progress",
            });
        }
        let old = guard.status;
        guard.status = TripStatus::InProgress;
        drop(guard);
        self.emit(
            "trip.started",
            actor,
            "trip",
            trip_id,
            json!({"status": {"old": old.as_str(), "new": "in_progress"}}),
            json!({}),
        )
        .await;
        Ok(())
    }

    /// Complete a trip: checked-in bookings complete and get a revenue
    /// settlement in `batch`; confirmed bookings that never checked in
    /// fold to no-show and are not settled.
    pub async fn complete_trip(
        &self,
        trip_id: Ulid,
        actor: Ulid,
        batch: &str,
    ) -> Result<Vec<Settlement>, EngineError> {
        validate_batch(batch)?;
        let mut guard = self.lock_trip(trip_id).await?;
        if guard.status != TripStatus::InProgress {
            return Err(EngineError::InvalidTransition {
                from: guard.status.as_str(),
                to: "completed",
            });
        }
        guard.status = TripStatus::Completed;
        let mut completed = Vec::new();
        let mut no_shows = 0u32;
        for b in guard.bookings.iter_mut() {
            match b.status {
                BookingStatus::CheckedIn => {
                    b.status = BookingStatus::Completed;
                    completed.push(b.id);
                }
                BookingStatus::Confirmed => {
                    b.status = BookingStatus::NoShow;
                    no_shows += 1;
                }
                _ => {}
            }
        }
        drop(guard);

        metrics::gauge!(observability::TRIPS_ACTIVE).decrement(1.0);
        tracing::info!(trip = %trip_id, completed = completed.len(), no_shows, "trip completed");
        self.emit(
            "trip.completed",
            actor,
            "trip",
            trip_id,
            json!({"status": {"old": "in_progress", "new": "completed"}}),
            json!({"completed_bookings": completed.len(), "no_shows": no_shows}),
        )
        .await;

        let mut settlements = Vec::new();
        for booking_id in completed {
            // Revenue may already have been posted in an earlier batch.
            if self.revenue_index.contains_key(&booking_id) {
                continue;
            }
            settlements.push(
                self.post_settlement(booking_id, SettlementKind::Revenue, batch, actor)
                    .await?,
            );
        }
        Ok(settlements)
    }

    /// Operator cancellation: every live booking is cancelled and
    /// refunded at the policy's operator rate.
    pub async fn cancel_trip(
        &self,
        trip_id: Ulid,
        actor: Ulid,
        reason: &str,
    ) -> Result<Vec<Settlement>, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let now = now_ms();
        let mut guard = self.lock_trip(trip_id).await?;
        if !matches!(guard.status, TripStatus::Scheduled | TripStatus::Boarding) {
            return Err(EngineError::InvalidTransition {
                from: guard.status.as_str(),
                to: "cancelled",
            });
        }
        let old = guard.status;
        guard.status = TripStatus::Cancelled;
        let mut to_refund = Vec::new();
        let mut cancelled = 0u32;
        for b in guard.bookings.iter_mut() {
            if !b.status.is_live() {
                continue;
            }
            b.status = BookingStatus::Cancelled;
            b.cancelled_at = Some(now);
            b.cancel_reason = Some("trip cancelled by operator".to_string());
            let decision = refund::operator_decide(
                &self.config.cancellation_policy,
                b.price.total,
                &b.price.currency,
            );
            b.refund_amount = Some(decision.refund_amount);
            cancelled += 1;
            if decision.refund_amount > Decimal::ZERO {
                to_refund.push(b.id);
            }
        }
        drop(guard);

        metrics::gauge!(observability::TRIPS_ACTIVE).decrement(1.0);
        self.emit(
            "trip.cancelled",
            actor,
            "trip",
            trip_id,
            json!({"status": {"old": old.as_str(), "new": "cancelled"}}),
            json!({"reason": reason, "bookings_cancelled": cancelled}),
        )
        .await;

        let mut settlements = Vec::new();
        for booking_id in to_refund {
            settlements.push(
                self.post_settlement(booking_id, SettlementKind::Refund, "operator-cancellation", actor)
                    .await?,
            );
        }
        Ok(settlements)
    }

    // ── Exemptions ───────────────────────────────────────

    pub async fn grant_exemption(
        &self,
        trip_id: Ulid,
        diver_id: Ulid,
        requirement: RequirementKind,
        approved_by: Ulid,
        reason: &str,
    ) -> Result<Ulid, EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::Invalid("exemption reason required"));
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        if !self.trips.contains_key(&trip_id) {
            return Err(EngineError::NotFound(trip_id));
        }
        self.collab
            .directory
            .diver(diver_id)
            .ok_or(EngineError::NotFound(diver_id))?;

        let id = Ulid::new();
        let exemption = Exemption {
            id,
            trip_id,
            diver_id,
            requirement,
            approved_by,
            reason: reason.to_string(),
            approved_at: now_ms(),
        };
        self.exemptions
            .entry((trip_id, diver_id))
            .or_default()
            .push(exemption);
        self.emit(
            "exemption.granted",
            approved_by,
            "exemption",
            id,
            json!({}),
            json!({
                "trip_id": trip_id.to_string(),
                "diver_id": diver_id.to_string(),
                "requirement": requirement.code(),
                "reason": reason,
            }),
        )
        .await;
        Ok(id)
    }

    // ── Booking lifecycle ────────────────────────────────

    /// Create a reservation: eligibility, capacity, and the price
    /// snapshot must all succeed or nothing is written.
    ///
    /// Eligibility and collaborator reads happen before the trip lock is
    /// taken; the duplicate and capacity checks are re-done inside it.
    pub async fn create_reservation(
        &self,
        diver_id: Ulid,
        trip_id: Ulid,
        actor: Ulid,
    ) -> Result<Booking, EngineError> {
        let at = now_ms();
        let decision = self.evaluate_eligibility(diver_id, trip_id, at).await?;
        if !decision.is_eligible() {
            metrics::counter!(observability::ELIGIBILITY_DENIED_TOTAL).increment(1);
            metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => "ineligible")
                .increment(1);
            let failing = decision.failing.ok_or(EngineError::Invalid(
                "ineligible decision without failing requirement",
            ))?;
            return Err(EngineError::Ineligible {
                code: failing.requirement.code(),
                detail: failing.detail,
            });
        }

        let (template_id, site_id) = {
            let t = self.read_trip(trip_id).await?;
            (t.template_id, t.site_id)
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

        let mut guard = self.lock_trip(trip_id).await?;
        if guard.status != TripStatus::Scheduled {
            metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => "closed")
                .increment(1);
            return Err(EngineError::TripClosed(guard.status.as_str()));
        }
        if guard.live_booking_for(diver_id).is_some() {
            metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => "duplicate")
                .increment(1);
            return Err(EngineError::DuplicateReservation { trip: trip_id, diver: diver_id });
        }
        if guard.confirmed_count() >= guard.capacity {
            metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => "capacity")
                .increment(1);
            return Err(EngineError::CapacityExceeded { capacity: guard.capacity });
        }

        let price = pricing::compute_price(&template, guard.price_override, &site, at);
        let booking = Booking {
            id: Ulid::new(),
            diver_id,
            status: BookingStatus::Confirmed,
            price,
            booked_by: actor,
            booked_at: at,
            exemptions_used: decision.exemptions_used.clone(),
            cancelled_at: None,
            cancel_reason: None,
            refund_amount: None,
        };
        guard.bookings.push(booking.clone());
        self.booking_index.insert(booking.id, trip_id);
        drop(guard);

        metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
        tracing::info!(booking = %booking.id, trip = %trip_id, diver = %diver_id, "booking confirmed");
        self.emit(
            "booking.created",
            actor,
            "booking",
            booking.id,
            json!({"status": {"old": null, "new": "confirmed"}}),
            json!({
                "trip_id": trip_id.to_string(),
                "diver_id": diver_id.to_string(),
                "total": booking.price.total,
                "currency": booking.price.currency,
                "exemptions_used": booking.exemptions_used.iter().map(|r| r.code()).collect::<Vec<_>>(),
            }),
        )
        .await;
        Ok(booking)
    }

    pub async fn check_in(&self, booking_id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        let (trip_id, mut guard) = self.lock_trip_for_booking(booking_id).await?;
        if !matches!(guard.status, TripStatus::Scheduled | TripStatus::Boarding) {
            return Err(EngineError::TripClosed(guard.status.as_str()));
        }
        let booking = guard
            .booking_mut(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if !booking.status.allows(BookingStatus::CheckedIn) {
            return Err(EngineError::InvalidTransition {
                from: booking.status.as_str(),
                to: "checked_in",
            });
        }
        let old = booking.status;
        booking.status = BookingStatus::CheckedIn;
        drop(guard);
        self.emit(
            "booking.checked_in",
            actor,
            "booking",
            booking_id,
            json!({"status": {"old": old.as_str(), "new": "checked_in"}}),
            json!({"trip_id": trip_id.to_string()}),
        )
        .await;
        Ok(())
    }

    /// Cancel a reservation. The refund decision is computed from the
    /// injected tier policy; a nonzero refund posts a refund settlement.
    pub async fn cancel_reservation(
        &self,
        booking_id: Ulid,
        actor: Ulid,
        reason: &str,
    ) -> Result<refund::RefundDecision, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let now = now_ms();
        let (trip_id, mut guard) = self.lock_trip_for_booking(booking_id).await?;
        let departure = guard.departure;
        let booking = guard
            .booking_mut(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if !booking.status.allows(BookingStatus::Cancelled) {
            return Err(EngineError::InvalidTransition {
                from: booking.status.as_str(),
                to: "cancelled",
            });
        }
        let old = booking.status;
        booking.status = BookingStatus::Cancelled;
        booking.cancelled_at = Some(now);
        booking.cancel_reason = Some(reason.to_string());
        let decision = refund::decide(
            &self.config.cancellation_policy,
            departure,
            now,
            booking.price.total,
            &booking.price.currency,
        );
        booking.refund_amount = Some(decision.refund_amount);
        drop(guard);

        tracing::info!(
            booking = %booking_id,
            trip = %trip_id,
            refund_percent = decision.refund_percent,
            "booking cancelled"
        );
        self.emit(
            "booking.cancelled",
            actor,
            "booking",
            booking_id,
            json!({"status": {"old": old.as_str(), "new": "cancelled"}}),
            json!({
                "reason": reason,
                "refund_percent": decision.refund_percent,
                "refund_amount": decision.refund_amount,
            }),
        )
        .await;

        if decision.refund_amount > Decimal::ZERO {
            self.post_settlement(booking_id, SettlementKind::Refund, "cancellation", actor)
                .await?;
        }
        Ok(decision)
    }

    pub async fn mark_no_show(&self, booking_id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        let (trip_id, mut guard) = self.lock_trip_for_booking(booking_id).await?;
        let booking = guard
            .booking_mut(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if !booking.status.allows(BookingStatus::NoShow) {
            return Err(EngineError::InvalidTransition {
                from: booking.status.as_str(),
                to: "no_show",
            });
        }
        let old = booking.status;
        booking.status = BookingStatus::NoShow;
        drop(guard);
        self.emit(
            "booking.no_show",
            actor,
            "booking",
            booking_id,
            json!({"status": {"old": old.as_str(), "new": "no_show"}}),
            json!({"trip_id": trip_id.to_string()}),
        )
        .await;
        Ok(())
    }

    // ── Participation ────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn assign_diver(
        &self,
        dive_id: Ulid,
        diver_id: Ulid,
        role: Role,
        buddy_id: Option<Ulid>,
        planned_depth_m: Option<u16>,
        planned_bottom_time_min: Option<u16>,
        actor: Ulid,
    ) -> Result<Ulid, EngineError> {
        let trip_id = *self
            .dive_index
            .get(&dive_id)
            .ok_or(EngineError::NotFound(dive_id))?;
        self.collab
            .directory
            .diver(diver_id)
            .ok_or(EngineError::NotFound(diver_id))?;
        {
            let t = self.read_trip(trip_id).await?;
            if t.status.is_terminal() {
                return Err(EngineError::TripClosed(t.status.as_str()));
            }
        }

        let id = Ulid::new();
        match self.participation_index.entry((dive_id, diver_id)) {
            Entry::Occupied(_) => {
                return Err(EngineError::DuplicateAssignment { dive: dive_id, diver: diver_id });
            }
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }
        let participation = Participation {
            id,
            dive_id,
            trip_id,
            diver_id,
            role,
            buddy_id,
            planned_depth_m,
            planned_bottom_time_min,
            status: ParticipationStatus::Assigned,
            entered_water_at: None,
            surfaced_at: None,
        };
        self.participations.insert(id, Arc::new(RwLock::new(participation)));
        self.dive_participants.entry(dive_id).or_default().push(id);
        self.emit(
            "participation.assigned",
            actor,
            "participation",
            id,
            json!({}),
            json!({
                "dive_id": dive_id.to_string(),
                "diver_id": diver_id.to_string(),
                "role": role.as_str(),
            }),
        )
        .await;
        Ok(id)
    }

    /// Apply one edge of the participation state machine. Transitions
    /// are linearized per participation and independent across
    /// participants of the same dive.
    pub async fn transition_participation(
        &self,
        participation_id: Ulid,
        new_status: ParticipationStatus,
        actor: Ulid,
    ) -> Result<Participation, EngineError> {
        let arc = self
            .participations
            .get(&participation_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(participation_id))?;
        let mut guard = match timeout(self.config.lock_wait, arc.write_owned()).await {
            Ok(g) => g,
            Err(_) => return Err(EngineError::LockTimeout(participation_id)),
        };
        if !guard.status.allows(new_status) {
            return Err(EngineError::InvalidTransition {
                from: guard.status.as_str(),
                to: new_status.as_str(),
            });
        }
        let old = guard.status;
        let now = now_ms();
        guard.status = new_status;
        if new_status == ParticipationStatus::InWater && guard.entered_water_at.is_none() {
            guard.entered_water_at = Some(now);
        }
        if new_status == ParticipationStatus::Surfaced && guard.surfaced_at.is_none() {
            guard.surfaced_at = Some(now);
        }
        let snapshot = guard.clone();
        drop(guard);

        metrics::counter!(observability::PARTICIPATION_TRANSITIONS_TOTAL).increment(1);
        self.emit(
            "participation.status_changed",
            actor,
            "participation",
            participation_id,
            json!({"status": {"old": old.as_str(), "new": new_status.as_str()}}),
            json!({}),
        )
        .await;
        Ok(snapshot)
    }

    // ── Dive outcome and personal records ────────────────

    /// Log the master outcome of a dive and bulk-create one personal
    /// record per participating assignment. Idempotent: re-logging
    /// updates the outcome without duplicating records.
    pub async fn log_dive_outcome(
        &self,
        dive_id: Ulid,
        outcome: DiveOutcome,
        actor: Ulid,
    ) -> Result<Vec<Ulid>, EngineError> {
        validate_timestamp(outcome.actual_start)?;
        validate_timestamp(outcome.actual_end)?;
        if outcome.actual_end <= outcome.actual_start {
            return Err(EngineError::Invalid("dive end must be after start"));
        }
        if outcome.max_depth_m == 0 || outcome.max_depth_m > MAX_DEPTH_M {
            return Err(EngineError::Invalid("max depth out of range"));
        }

        let trip_id = *self
            .dive_index
            .get(&dive_id)
            .ok_or(EngineError::NotFound(dive_id))?;
        let now = now_ms();
        let mut guard = self.lock_trip(trip_id).await?;
        let dive = guard.dive_mut(dive_id).ok_or(EngineError::NotFound(dive_id))?;
        dive.outcome = Some(outcome);
        dive.logged_by = Some(actor);
        dive.logged_at = Some(now);
        drop(guard);

        let participant_ids = self
            .dive_participants
            .get(&dive_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut created = Vec::new();
        for pid in participant_ids {
            let Some(arc) = self.participations.get(&pid).map(|e| e.value().clone()) else {
                continue;
            };
            let participation = arc.read().await.clone();
            if !participation.status.is_participating() {
                continue;
            }
            let record_id = Ulid::new();
            match self.record_index.entry((dive_id, participation.diver_id)) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(v) => {
                    v.insert(record_id);
                }
            }
            let dive_number = {
                let mut count = self.dive_counts.entry(participation.diver_id).or_insert(0);
                *count += 1;
                *count
            };
            let record = DiveRecord {
                id: record_id,
                dive_id,
                diver_id: participation.diver_id,
                participation_id: Some(pid),
                dive_number,
                max_depth_m: None,
                bottom_time_min: None,
                air_start_bar: None,
                air_end_bar: None,
                tank_size_l: None,
                nitrox_percent: None,
                weight_kg: None,
                suit: None,
                notes: None,
                buddy_name: None,
                verified_by: None,
                verified_at: None,
            };
            self.records.insert(record_id, Arc::new(RwLock::new(record)));
            created.push(record_id);
        }

        tracing::info!(dive = %dive_id, records = created.len(), "dive outcome logged");
        self.emit(
            "dive.logged",
            actor,
            "dive",
            dive_id,
            json!({}),
            json!({"records_created": created.len()}),
        )
        .await;
        Ok(created)
    }

    /// Edit a personal dive record. Constraints are checked against the
    /// post-update values; a violation leaves the record untouched. A
    /// patch that changes nothing emits no event.
    pub async fn update_dive_record(
        &self,
        record_id: Ulid,
        patch: DiveRecordPatch,
        actor: Ulid,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = patch.notes
            && n.len() > MAX_NOTE_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        if let Some(ref b) = patch.buddy_name
            && b.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("buddy name too long"));
        }
        let arc = self
            .records
            .get(&record_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(record_id))?;
        let mut guard = match timeout(self.config.lock_wait, arc.write_owned()).await {
            Ok(g) => g,
            Err(_) => return Err(EngineError::LockTimeout(record_id)),
        };

        overlay::check_record_constraints(
            patch.max_depth_m.or(guard.max_depth_m),
            patch.bottom_time_min.or(guard.bottom_time_min),
            patch.air_start_bar.or(guard.air_start_bar),
            patch.air_end_bar.or(guard.air_end_bar),
            patch.nitrox_percent.or(guard.nitrox_percent),
        )
        .map_err(EngineError::OverlayViolation)?;

        let mut changes = serde_json::Map::new();
        macro_rules! apply {
            ($field:ident) => {
                if let Some(v) = patch.$field {
                    if guard.$field.as_ref() != Some(&v) {
                        changes.insert(
                            stringify!($field).to_string(),
                            json!({"old": &guard.$field, "new": &v}),
                        );
                        guard.$field = Some(v);
                    }
                }
            };
        }
        apply!(max_depth_m);
        apply!(bottom_time_min);
        apply!(air_start_bar);
        apply!(air_end_bar);
        apply!(tank_size_l);
        apply!(nitrox_percent);
        apply!(weight_kg);
        apply!(suit);
        apply!(notes);
        apply!(buddy_name);
        let changed = !changes.is_empty();
        drop(guard);

        if changed {
            self.emit(
                "dive_record.updated",
                actor,
                "dive_record",
                record_id,
                serde_json::Value::Object(changes),
                json!({}),
            )
            .await;
        }
        Ok(())
    }

    /// Stamp a record as verified. Re-verification updates the verifier.
    pub async fn verify_dive_record(
        &self,
        record_id: Ulid,
        actor: Ulid,
    ) -> Result<(), EngineError> {
        let arc = self
            .records
            .get(&record_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(record_id))?;
        let mut guard = match timeout(self.config.lock_wait, arc.write_owned()).await {
            Ok(g) => g,
            Err(_) => return Err(EngineError::LockTimeout(record_id)),
        };
        let was_verified = guard.verified_by.is_some();
        guard.verified_by = Some(actor);
        guard.verified_at = Some(now_ms());
        drop(guard);
        self.emit(
            "dive_record.verified",
            actor,
            "dive_record",
            record_id,
            json!({"verified": {"old": was_verified, "new": true}}),
            json!({}),
        )
        .await;
        Ok(())
    }
}

pub(super) fn validate_batch(batch: &str) -> Result<(), EngineError> {
    if batch.trim().is_empty() {
        return Err(EngineError::Invalid("settlement batch required"));
    }
    if batch.len() > MAX_BATCH_LEN {
        return Err(EngineError::LimitExceeded("settlement batch too long"));
    }
    Ok(())
}
