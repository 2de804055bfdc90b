use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type in the crate.
pub type Ms = i64;

pub const MS_PER_HOUR: Ms = 3_600_000;
pub const MS_PER_DAY: Ms = 86_400_000;

/// Durable reference returned by the ledger collaborator for a posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef(pub String);

// ── Templates ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateStatus {
    Draft,
    Published,
    Retired,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::Draft => "draft",
            TemplateStatus::Published => "published",
            TemplateStatus::Retired => "retired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiveMode {
    Boat,
    Shore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOfDay {
    Day,
    Night,
}

/// Per-dive plan inside a trip template. Copied into a `DiveInstance`
/// (frozen) when the template is instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiveTemplate {
    pub sequence: u16,
    pub planned_depth_m: u16,
    pub planned_duration_min: u16,
    /// Offset of the dive start from trip departure.
    pub offset_from_departure: Ms,
    /// Per-dive certification override; raises the product requirement.
    pub min_cert_rank: Option<u8>,
}

/// Product definition. Only `Published` templates may be instantiated
/// into scheduled trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripTemplate {
    pub id: Ulid,
    pub name: String,
    pub base_price: Decimal,
    pub currency: String,
    /// False for discovery/DSD products: the certification layer is skipped.
    pub requires_cert: bool,
    pub min_cert_rank: Option<u8>,
    /// Training products carry a minimum age gate.
    pub is_training: bool,
    pub min_age: Option<u8>,
    pub dive_mode: DiveMode,
    pub time_of_day: TimeOfDay,
    pub dives: Vec<DiveTemplate>,
    pub status: TemplateStatus,
}

// ── Scheduled trip aggregate ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripStatus {
    Scheduled,
    Boarding,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Scheduled => "scheduled",
            TripStatus::Boarding => "boarding",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    /// Live bookings occupy a seat and participate in the uniqueness check.
    pub fn is_live(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::CheckedIn)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    /// Declared edges of the booking state machine. Monotonic: no state
    /// is ever revisited, terminal states have no outgoing edges.
    pub fn allows(&self, to: BookingStatus) -> bool {
        matches!(
            (self, to),
            (BookingStatus::Confirmed, BookingStatus::CheckedIn)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::NoShow)
                | (BookingStatus::CheckedIn, BookingStatus::Completed)
                | (BookingStatus::CheckedIn, BookingStatus::NoShow)
        )
    }
}

/// Role of a person on a dive. Shared by booking check-in and dive
/// participation so the two lifecycle stages cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Diver,
    Guide,
    Instructor,
    Trainee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Diver => "diver",
            Role::Guide => "guide",
            Role::Instructor => "instructor",
            Role::Trainee => "trainee",
        }
    }
}

// ── Participation state machine ──────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipationStatus {
    Assigned,
    Briefed,
    GearingUp,
    InWater,
    Surfaced,
    OnBoat,
    SatOut,
    Aborted,
}

impl ParticipationStatus {
    pub const ALL: [ParticipationStatus; 8] = [
        ParticipationStatus::Assigned,
        ParticipationStatus::Briefed,
        ParticipationStatus::GearingUp,
        ParticipationStatus::InWater,
        ParticipationStatus::Surfaced,
        ParticipationStatus::OnBoat,
        ParticipationStatus::SatOut,
        ParticipationStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationStatus::Assigned => "assigned",
            ParticipationStatus::Briefed => "briefed",
            ParticipationStatus::GearingUp => "gearing_up",
            ParticipationStatus::InWater => "in_water",
            ParticipationStatus::Surfaced => "surfaced",
            ParticipationStatus::OnBoat => "on_boat",
            ParticipationStatus::SatOut => "sat_out",
            ParticipationStatus::Aborted => "aborted",
        }
    }

    /// Declared edge set. `sat_out` is reachable only before the diver
    /// enters the water; `aborted` only from `in_water`. No back-edges.
    pub fn allows(&self, to: ParticipationStatus) -> bool {
        use ParticipationStatus::*;
        matches!(
            (self, to),
            (Assigned, Briefed)
                | (Assigned, SatOut)
                | (Briefed, GearingUp)
                | (Briefed, SatOut)
                | (GearingUp, InWater)
                | (GearingUp, SatOut)
                | (InWater, Surfaced)
                | (InWater, Aborted)
                | (Surfaced, OnBoat)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipationStatus::OnBoat
                | ParticipationStatus::SatOut
                | ParticipationStatus::Aborted
        )
    }

    /// Statuses that count as having actually dived. Drives bulk creation
    /// of personal dive records when the master outcome is logged.
    pub fn is_participating(&self) -> bool {
        matches!(
            self,
            ParticipationStatus::InWater
                | ParticipationStatus::Surfaced
                | ParticipationStatus::OnBoat
        )
    }
}

/// A diver's assignment to, and real-time status within, one dive.
/// Unique per (dive, diver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub id: Ulid,
    pub dive_id: Ulid,
    pub trip_id: Ulid,
    pub diver_id: Ulid,
    pub role: Role,
    pub buddy_id: Option<Ulid>,
    /// Personal planning overrides on top of the dive plan.
    pub planned_depth_m: Option<u16>,
    pub planned_bottom_time_min: Option<u16>,
    pub status: ParticipationStatus,
    /// Stamped on first entry to `in_water`.
    pub entered_water_at: Option<Ms>,
    /// Stamped on first entry to `surfaced`.
    pub surfaced_at: Option<Ms>,
}

// ── Dives ────────────────────────────────────────────────

/// Actual/environmental fields written once the dive has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiveOutcome {
    pub actual_start: Ms,
    pub actual_end: Ms,
    pub max_depth_m: u16,
    pub bottom_time_min: Option<u16>,
    pub visibility_m: Option<u16>,
    pub water_temp_c: Option<Decimal>,
    pub surface_conditions: Option<String>,
    pub current: Option<String>,
}

/// One atomic dive within a scheduled trip. Planned fields are frozen
/// from the template at creation; the outcome arrives after execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiveInstance {
    pub id: Ulid,
    pub trip_id: Ulid,
    /// Unique per trip, strictly increasing.
    pub sequence: u16,
    pub planned_start: Ms,
    pub planned_depth_m: u16,
    pub planned_duration_min: u16,
    pub min_cert_rank: Option<u8>,
    pub outcome: Option<DiveOutcome>,
    pub logged_by: Option<Ulid>,
    pub logged_at: Option<Ms>,
}

// ── Pricing ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentKind {
    Distance,
    ParkFee,
    BoatFee,
    NightSurcharge,
}

impl AdjustmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentKind::Distance => "distance",
            AdjustmentKind::ParkFee => "park_fee",
            AdjustmentKind::BoatFee => "boat_fee",
            AdjustmentKind::NightSurcharge => "night_surcharge",
        }
    }
}

/// Site-scoped price adjustment as configured in the reference catalog.
/// Amounts are signed: discounts are negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteAdjustment {
    pub kind: AdjustmentKind,
    pub amount: Decimal,
    pub active: bool,
    /// Restricts the adjustment to one dive mode (e.g. boat fee).
    pub applies_to_mode: Option<DiveMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedAdjustment {
    pub kind: AdjustmentKind,
    pub amount: Decimal,
}

/// Immutable price breakdown captured into a booking at creation.
/// Never recomputed: later price or adjustment changes do not touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub base: Decimal,
    pub adjustments: Vec<AppliedAdjustment>,
    pub total: Decimal,
    pub currency: String,
    pub template_id: Ulid,
    pub site_id: Ulid,
    pub resolved_at: Ms,
}

// ── Bookings ─────────────────────────────────────────────

/// A diver's claim on a seat, with an immutable price snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub diver_id: Ulid,
    pub status: BookingStatus,
    pub price: PriceSnapshot,
    pub booked_by: Ulid,
    pub booked_at: Ms,
    /// Requirements that were satisfied via an approved exemption.
    pub exemptions_used: Vec<RequirementKind>,
    pub cancelled_at: Option<Ms>,
    pub cancel_reason: Option<String>,
    /// Refund due after cancellation; consumed by refund settlement.
    pub refund_amount: Option<Decimal>,
}

/// Scheduled trip aggregate. All capacity-sensitive mutations are
/// serialized by the trip's lock; see `engine::Engine::lock_trip`.
#[derive(Debug, Clone)]
pub struct TripState {
    pub id: Ulid,
    pub template_id: Ulid,
    pub site_id: Ulid,
    pub status: TripStatus,
    pub departure: Ms,
    pub return_at: Ms,
    pub capacity: u32,
    /// Overrides the template base price when set (overlay layer).
    pub price_override: Option<Decimal>,
    /// Trip-specific additional requirement beyond the template's.
    pub min_logged_dives: Option<u32>,
    pub bookings: Vec<Booking>,
    pub dives: Vec<DiveInstance>,
}

impl TripState {
    /// Seats held by confirmed or checked-in bookings.
    pub fn confirmed_count(&self) -> u32 {
        self.bookings.iter().filter(|b| b.status.is_live()).count() as u32
    }

    pub fn live_booking_for(&self, diver_id: Ulid) -> Option<&Booking> {
        self.bookings
            .iter()
            .find(|b| b.diver_id == diver_id && b.status.is_live())
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn dive(&self, id: Ulid) -> Option<&DiveInstance> {
        self.dives.iter().find(|d| d.id == id)
    }

    pub fn dive_mut(&mut self, id: Ulid) -> Option<&mut DiveInstance> {
        self.dives.iter_mut().find(|d| d.id == id)
    }

    pub fn next_dive_sequence(&self) -> u16 {
        self.dives.iter().map(|d| d.sequence).max().map_or(1, |s| s + 1)
    }
}

// ── Personal dive records ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuitType {
    Wetsuit,
    Drysuit,
    Shorty,
    Skin,
}

/// Per-diver permanent record of one dive. All substantive metrics are
/// overrides: absent means "inherit from the dive instance" and is
/// resolved through the overlay resolver, never coalesced ad hoc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiveRecord {
    pub id: Ulid,
    pub dive_id: Ulid,
    pub diver_id: Ulid,
    pub participation_id: Option<Ulid>,
    /// Position in this diver's personal log, 1-based.
    pub dive_number: u32,
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
    pub verified_by: Option<Ulid>,
    pub verified_at: Option<Ms>,
}

/// Overlay-resolved view of a personal record against its dive instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDiveRecord {
    pub record_id: Ulid,
    pub dive_id: Ulid,
    pub diver_id: Ulid,
    pub dive_number: u32,
    pub max_depth_m: Option<u16>,
    pub bottom_time_min: Option<u16>,
    pub air_consumed_bar: Option<u16>,
    pub nitrox_percent: Option<u8>,
    pub verified: bool,
}

// ── Eligibility ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequirementKind {
    Certification,
    MinLoggedDives,
    Medical,
    Waiver,
    MinAge,
}

impl RequirementKind {
    /// Stable failing-reason code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            RequirementKind::Certification => "CERT_INSUFFICIENT",
            RequirementKind::MinLoggedDives => "MIN_DIVES_NOT_MET",
            RequirementKind::Medical => "MEDICAL_EXPIRED",
            RequirementKind::Waiver => "WAIVER_INVALID",
            RequirementKind::MinAge => "UNDER_MIN_AGE",
        }
    }
}

/// Approved, reservation-scoped waiver of one unmet requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemption {
    pub id: Ulid,
    pub trip_id: Ulid,
    pub diver_id: Ulid,
    pub requirement: RequirementKind,
    pub approved_by: Ulid,
    pub reason: String,
    pub approved_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionOutcome {
    Eligible,
    Ineligible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRequirement {
    pub requirement: RequirementKind,
    pub detail: String,
}

/// Audit-grade eligibility decision. Identical inputs at an identical
/// evaluation time always produce an identical decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    pub failing: Option<FailedRequirement>,
    pub exemptions_used: Vec<RequirementKind>,
    /// Snapshot of every input the rules consulted.
    pub inputs: serde_json::Value,
    pub evaluated_at: Ms,
}

impl Decision {
    pub fn is_eligible(&self) -> bool {
        self.outcome == DecisionOutcome::Eligible
    }
}

// ── Settlements ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementKind {
    Revenue,
    Refund,
}

impl SettlementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementKind::Revenue => "revenue",
            SettlementKind::Refund => "refund",
        }
    }
}

/// Immutable financial posting tied to a booking and a settlement batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub trip_id: Ulid,
    pub kind: SettlementKind,
    pub batch: String,
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: String,
    pub ledger_ref: TxRef,
    pub processed_by: Ulid,
    pub settled_at: Ms,
}

// ── Collaborator-provided read models ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certification {
    pub rank: u8,
    pub expires_at: Option<Ms>,
}

/// Diver identity as served by the identity directory. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiverProfile {
    pub id: Ulid,
    pub name: String,
    pub born_at: Option<Ms>,
    pub certifications: Vec<Certification>,
    pub logged_dives: u32,
}

impl DiverProfile {
    /// Highest certification rank still valid at `at`, or None if the
    /// diver holds no current certification.
    pub fn highest_rank_at(&self, at: Ms) -> Option<u8> {
        self.certifications
            .iter()
            .filter(|c| c.expires_at.is_none_or(|e| e > at))
            .map(|c| c.rank)
            .max()
    }

    pub fn age_years_at(&self, at: Ms) -> Option<u8> {
        self.born_at.map(|b| ((at - b) / (365 * MS_PER_DAY)).max(0) as u8)
    }
}

/// Dive-site reference data, served by the reference catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub id: Ulid,
    pub name: String,
    pub max_depth_m: u16,
    /// Site-level certification floor, independent of the product's.
    pub min_cert_rank: Option<u8>,
    pub adjustments: Vec<SiteAdjustment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_edges_are_monotonic() {
        use BookingStatus::*;
        for from in [Confirmed, CheckedIn, Completed, Cancelled, NoShow] {
            // No state may transition back to itself or to confirmed.
            assert!(!from.allows(from));
            assert!(!from.allows(Confirmed));
        }
        for terminal in [Completed, Cancelled, NoShow] {
            for to in [Confirmed, CheckedIn, Completed, Cancelled, NoShow] {
                assert!(!terminal.allows(to));
            }
        }
    }

    #[test]
    fn participation_terminal_states_absorb() {
        use ParticipationStatus::*;
        for terminal in [OnBoat, SatOut, Aborted] {
            for to in ParticipationStatus::ALL {
                assert!(!terminal.allows(to), "{terminal:?} -> {to:?} must be rejected");
            }
        }
    }

    #[test]
    fn highest_rank_skips_expired_certs() {
        let diver = DiverProfile {
            id: Ulid::new(),
            name: "t".into(),
            born_at: None,
            certifications: vec![
                Certification { rank: 3, expires_at: Some(1_000) },
                Certification { rank: 1, expires_at: None },
            ],
            logged_dives: 0,
        };
        assert_eq!(diver.highest_rank_at(500), Some(3));
        assert_eq!(diver.highest_rank_at(2_000), Some(1));
    }
}
