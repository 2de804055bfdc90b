//! External collaborator seams. The core consumes these narrow interfaces
//! and never reimplements them: identity, reference data, proof currency,
//! the append-only audit sink, and the financial ledger.
//!
//! The in-memory implementations back the test suite and small embeddings.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::{DiverProfile, Ms, SiteInfo, TxRef};

// ── Identity directory ───────────────────────────────────

/// Read-only lookup of diver identity by opaque id.
pub trait IdentityDirectory: Send + Sync {
    fn diver(&self, id: Ulid) -> Option<DiverProfile>;
}

#[derive(Default)]
pub struct MemoryDirectory {
    divers: DashMap<Ulid, DiverProfile>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, diver: DiverProfile) {
        self.divers.insert(diver.id, diver);
    }
}

impl IdentityDirectory for MemoryDirectory {
    fn diver(&self, id: Ulid) -> Option<DiverProfile> {
        self.divers.get(&id).map(|e| e.value().clone())
    }
}

// ── Reference catalog ────────────────────────────────────

/// Read-only dive-site metadata and price adjustments.
pub trait ReferenceCatalog: Send + Sync {
    fn site(&self, id: Ulid) -> Option<SiteInfo>;
}

#[derive(Default)]
pub struct MemoryCatalog {
    sites: DashMap<Ulid, SiteInfo>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, site: SiteInfo) {
        self.sites.insert(site.id, site);
    }
}

impl ReferenceCatalog for MemoryCatalog {
    fn site(&self, id: Ulid) -> Option<SiteInfo> {
        self.sites.get(&id).map(|e| e.value().clone())
    }
}

// ── Proof store ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProofKind {
    Medical,
    Waiver,
}

/// Boolean currency check against the document/proof store. The core
/// never stores or serves document content.
pub trait ProofStore: Send + Sync {
    fn is_current(&self, diver: Ulid, kind: ProofKind, at: Ms) -> bool;
}

#[derive(Default)]
pub struct MemoryProofStore {
    valid_until: DashMap<(Ulid, ProofKind), Ms>,
}

impl MemoryProofStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, diver: Ulid, kind: ProofKind, valid_until: Ms) {
        self.valid_until.insert((diver, kind), valid_until);
    }
}

impl ProofStore for MemoryProofStore {
    fn is_current(&self, diver: Ulid, kind: ProofKind, at: Ms) -> bool {
        self.valid_until
            .get(&(diver, kind))
            .is_some_and(|until| *until > at)
    }
}

// ── Event sink ───────────────────────────────────────────

/// One audit record per committed mutation.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: &'static str,
    pub actor: Ulid,
    pub target_kind: &'static str,
    pub target: Ulid,
    /// Before/after diff of the fields the mutation touched.
    pub changes: serde_json::Value,
    pub at: Ms,
    pub metadata: serde_json::Value,
}

/// Append-only, immutable audit interface. Invoked exactly once per
/// mutation, after the mutation commits, never speculatively before.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: AuditEvent);
}

#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("sink poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("sink poisoned").len()
    }

    pub fn count_action(&self, action: &str) -> usize {
        self.events
            .lock()
            .expect("sink poisoned")
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn append(&self, event: AuditEvent) {
        self.events.lock().expect("sink poisoned").push(event);
    }
}

// ── Ledger ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LedgerPosting {
    pub description: String,
    pub debit_account: String,
    pub credit_account: String,
    pub amount: Decimal,
    pub currency: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug)]
pub struct LedgerError(pub String);

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ledger error: {}", self.0)
    }
}

impl std::error::Error for LedgerError {}

/// Accepts a balanced posting and returns a durable transaction
/// reference. Invoked exactly once per distinct settlement record.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn post(&self, posting: LedgerPosting) -> Result<TxRef, LedgerError>;
}

#[derive(Default)]
pub struct MemoryLedger {
    postings: Mutex<Vec<LedgerPosting>>,
    seq: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posting_count(&self) -> usize {
        self.postings.lock().expect("ledger poisoned").len()
    }

    pub fn postings(&self) -> Vec<LedgerPosting> {
        self.postings.lock().expect("ledger poisoned").clone()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn post(&self, posting: LedgerPosting) -> Result<TxRef, LedgerError> {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        self.postings.lock().expect("ledger poisoned").push(posting);
        Ok(TxRef(format!("tx-{n:08}")))
    }
}

/// A ledger that always refuses; for exercising the rollback path.
pub struct FailingLedger;

#[async_trait]
impl Ledger for FailingLedger {
    async fn post(&self, _posting: LedgerPosting) -> Result<TxRef, LedgerError> {
        Err(LedgerError("posting rejected".into()))
    }
}

// ── Bundle handed to the engine ──────────────────────────

use std::sync::Arc;

#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn IdentityDirectory>,
    pub catalog: Arc<dyn ReferenceCatalog>,
    pub proofs: Arc<dyn ProofStore>,
    pub events: Arc<dyn EventSink>,
    pub ledger: Arc<dyn Ledger>,
}
