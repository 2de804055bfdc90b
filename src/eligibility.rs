//! Eligibility decision engine.
//!
//! Pure, ordered, short-circuiting rule evaluation over an assembled
//! (diver, trip-requirements) pair. Ineligibility is a valid output, not
//! an error; the `Decision` record carries an input snapshot and is part
//! of the audit contract. The engine assembles `TripRequirements` and
//! `StatusGates` from its registries and collaborators before calling in,
//! so evaluation itself touches nothing external and is deterministic for
//! identical inputs at an identical `at`.

use serde_json::json;

use crate::model::{
    Decision, DecisionOutcome, DiverProfile, Exemption, FailedRequirement, Ms, RequirementKind,
};

/// Requirements in force for one scheduled trip, already resolved across
/// template, per-dive overrides, and site reference data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripRequirements {
    /// False for discovery products: the certification layer is skipped.
    pub requires_cert: bool,
    /// Max of template minimum, per-dive overrides, and the site floor.
    pub min_cert_rank: Option<u8>,
    pub min_logged_dives: Option<u32>,
    pub is_training: bool,
    pub min_age: Option<u8>,
}

/// Document-store currency answers, queried before evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusGates {
    pub medical_current: bool,
    pub waiver_current: bool,
}

fn check_certification(
    diver: &DiverProfile,
    req: &TripRequirements,
    at: Ms,
) -> Option<FailedRequirement> {
    if !req.requires_cert {
        return None;
    }
    let required = req.min_cert_rank?;
    match diver.highest_rank_at(at) {
        Some(rank) if rank >= required => None,
        Some(rank) => Some(FailedRequirement {
            requirement: RequirementKind::Certification,
            detail: format!("certification rank {rank} is below required {required}"),
        }),
        None => Some(FailedRequirement {
            requirement: RequirementKind::Certification,
            detail: format!("no current certification; rank {required} required"),
        }),
    }
}

fn check_min_dives(diver: &DiverProfile, req: &TripRequirements) -> Option<FailedRequirement> {
    let min = req.min_logged_dives?;
    if diver.logged_dives >= min {
        None
    } else {
        Some(FailedRequirement {
            requirement: RequirementKind::MinLoggedDives,
            detail: format!("{} logged dives, {min} required", diver.logged_dives),
        })
    }
}

fn check_medical(gates: &StatusGates) -> Option<FailedRequirement> {
    if gates.medical_current {
        None
    } else {
        Some(FailedRequirement {
            requirement: RequirementKind::Medical,
            detail: "medical clearance missing or expired".to_string(),
        })
    }
}

fn check_waiver(gates: &StatusGates) -> Option<FailedRequirement> {
    if gates.waiver_current {
        None
    } else {
        Some(FailedRequirement {
            requirement: RequirementKind::Waiver,
            detail: "liability waiver missing or expired".to_string(),
        })
    }
}

fn check_min_age(diver: &DiverProfile, req: &TripRequirements, at: Ms) -> Option<FailedRequirement> {
    if !req.is_training {
        return None;
    }
    let min = req.min_age?;
    match diver.age_years_at(at) {
        Some(age) if age >= min => None,
        Some(age) => Some(FailedRequirement {
            requirement: RequirementKind::MinAge,
            detail: format!("age {age} below minimum {min} for training"),
        }),
        None => Some(FailedRequirement {
            requirement: RequirementKind::MinAge,
            detail: format!("date of birth unknown; minimum age {min} for training"),
        }),
    }
}

/// Evaluate the ordered rule layers, short-circuiting on the first
/// failure that is not covered by an approved exemption for that exact
/// requirement. An exemption satisfies only its own layer; evaluation
/// continues through the remaining layers.
pub fn evaluate(
    diver: &DiverProfile,
    req: &TripRequirements,
    gates: &StatusGates,
    exemptions: &[Exemption],
    at: Ms,
) -> Decision {
    let inputs = json!({
        "diver_id": diver.id.to_string(),
        "diver_rank": diver.highest_rank_at(at),
        "logged_dives": diver.logged_dives,
        "age_years": diver.age_years_at(at),
        "requires_cert": req.requires_cert,
        "required_rank": req.min_cert_rank,
        "min_logged_dives": req.min_logged_dives,
        "min_age": req.min_age,
        "medical_current": gates.medical_current,
        "waiver_current": gates.waiver_current,
        "exemptions": exemptions.iter().map(|e| e.requirement.code()).collect::<Vec<_>>(),
    });

    let layers: [Option<FailedRequirement>; 5] = [
        check_certification(diver, req, at),
        check_min_dives(diver, req),
        check_medical(gates),
        check_waiver(gates),
        check_min_age(diver, req, at),
    ];

    let mut exemptions_used = Vec::new();
    for failed in layers.into_iter().flatten() {
        if exemptions.iter().any(|e| e.requirement == failed.requirement) {
            exemptions_used.push(failed.requirement);
            continue;
        }
        return Decision {
            outcome: DecisionOutcome::Ineligible,
            failing: Some(failed),
            exemptions_used,
            inputs,
            evaluated_at: at,
        };
    }

    Decision {
        outcome: DecisionOutcome::Eligible,
        failing: None,
        exemptions_used,
        inputs,
        evaluated_at: at,
    }
}
