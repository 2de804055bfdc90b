use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    TemplateNotPublished(Ulid),
    /// Malformed or out-of-policy argument; not retriable.
    Invalid(&'static str),
    /// Trip lifecycle state does not admit the operation.
    TripClosed(&'static str),
    /// Business ineligibility. A valid outcome, surfaced with the failing
    /// rule so the caller can render an actionable message.
    Ineligible { code: &'static str, detail: String },
    CapacityExceeded { capacity: u32 },
    DuplicateReservation { trip: Ulid, diver: Ulid },
    DuplicateAssignment { dive: Ulid, diver: Ulid },
    InvalidTransition { from: &'static str, to: &'static str },
    OverlayViolation(&'static str),
    /// Bounded wait on the trip's capacity lock expired. Recoverable:
    /// the caller may retry.
    LockTimeout(Ulid),
    /// A concurrent settlement attempt on the same idempotency key did
    /// not publish within the bounded wait. Recoverable.
    SettlementContention(String),
    LimitExceeded(&'static str),
    Ledger(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::TemplateNotPublished(id) => {
                write!(f, "template {id} is not published")
            }
            EngineError::Invalid(msg) => write!(f, "invalid: {msg}"),
            EngineError::TripClosed(status) => {
                write!(f, "trip status {status} does not allow this operation")
            }
            EngineError::Ineligible { code, detail } => {
                write!(f, "ineligible ({code}): {detail}")
            }
            EngineError::CapacityExceeded { capacity } => {
                write!(f, "capacity {capacity} exceeded: all seats taken")
            }
            EngineError::DuplicateReservation { trip, diver } => {
                write!(f, "diver {diver} already holds a live booking on trip {trip}")
            }
            EngineError::DuplicateAssignment { dive, diver } => {
                write!(f, "diver {diver} is already assigned to dive {dive}")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::OverlayViolation(msg) => write!(f, "overlay constraint: {msg}"),
            EngineError::LockTimeout(id) => {
                write!(f, "timed out waiting for lock on trip {id}")
            }
            EngineError::SettlementContention(key) => {
                write!(f, "concurrent settlement in flight for key {key}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Ledger(e) => write!(f, "ledger error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
