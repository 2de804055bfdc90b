//! diveops: booking-to-settlement transaction engine for dive charters.
//!
//! The engine owns the booking lifecycle from eligibility evaluation
//! through capacity-guarded reservation, price snapshotting, trip
//! execution, dive logging, and idempotent financial settlement.
//! Identity, reference data, document proofs, audit, and the ledger are
//! collaborator traits injected at construction; see [`collab`].

pub mod collab;
pub mod config;
pub mod eligibility;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod overlay;
pub mod pricing;
pub mod refund;

pub use engine::{Engine, EngineError};
