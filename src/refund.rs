//! Time-tiered cancellation refund policy.
//!
//! Tiers are evaluated in descending `hours_before` order; the first tier
//! whose threshold the cancellation still clears applies. The booking
//! engine only consumes the resulting `RefundDecision`.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::model::{Ms, MS_PER_HOUR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundTier {
    /// Minimum whole hours before departure for this tier to apply.
    pub hours_before: u32,
    pub refund_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationPolicy {
    /// Descending by `hours_before`; the last tier must be 0 hours.
    pub tiers: Vec<RefundTier>,
    pub no_show_penalty_percent: u8,
    /// Refund rate when the operator cancels the trip.
    pub operator_cancel_refund_percent: u8,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                RefundTier { hours_before: 48, refund_percent: 100 },
                RefundTier { hours_before: 24, refund_percent: 50 },
                RefundTier { hours_before: 0, refund_percent: 0 },
            ],
            no_show_penalty_percent: 100,
            operator_cancel_refund_percent: 100,
        }
    }
}

impl CancellationPolicy {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.tiers.is_empty() {
            return Err("policy needs at least one tier");
        }
        for pair in self.tiers.windows(2) {
            if pair[1].hours_before >= pair[0].hours_before {
                return Err("tiers must be strictly descending by hours_before");
            }
        }
        if self.tiers.last().map(|t| t.hours_before) != Some(0) {
            return Err("final tier must cover 0 hours before departure");
        }
        if self
            .tiers
            .iter()
            .map(|t| t.refund_percent)
            .chain([self.no_show_penalty_percent, self.operator_cancel_refund_percent])
            .any(|p| p > 100)
        {
            return Err("percentages must be 0-100");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundDecision {
    pub refund_percent: u8,
    pub original_amount: Decimal,
    pub refund_amount: Decimal,
    pub currency: String,
    /// Whole hours between cancellation and departure (negative if past).
    pub hours_before_departure: i64,
}

fn percent_of(amount: Decimal, percent: u8) -> Decimal {
    (amount * Decimal::from(percent) / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Decide the refund for a diver-initiated cancellation.
pub fn decide(
    policy: &CancellationPolicy,
    departure: Ms,
    cancelled_at: Ms,
    amount: Decimal,
    currency: &str,
) -> RefundDecision {
    let hours_before = (departure - cancelled_at) / MS_PER_HOUR;
    let percent = policy
        .tiers
        .iter()
        .find(|t| hours_before >= t.hours_before as i64)
        .map_or(0, |t| t.refund_percent);
    RefundDecision {
        refund_percent: percent,
        original_amount: amount,
        refund_amount: percent_of(amount, percent),
        currency: currency.to_string(),
        hours_before_departure: hours_before,
    }
}

/// Decide the refund when the operator cancels the whole trip.
pub fn operator_decide(
    policy: &CancellationPolicy,
    amount: Decimal,
    currency: &str,
) -> RefundDecision {
    let percent = policy.operator_cancel_refund_percent;
    RefundDecision {
        refund_percent: percent,
        original_amount: amount,
        refund_amount: percent_of(amount, percent),
        currency: currency.to_string(),
        hours_before_departure: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn policy() -> CancellationPolicy {
        CancellationPolicy::default()
    }

    #[test]
    fn default_policy_is_valid() {
        assert!(policy().validate().is_ok());
    }

    #[test]
    fn unordered_tiers_rejected() {
        let p = CancellationPolicy {
            tiers: vec![
                RefundTier { hours_before: 24, refund_percent: 50 },
                RefundTier { hours_before: 48, refund_percent: 100 },
            ],
            ..policy()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn missing_zero_tier_rejected() {
        let p = CancellationPolicy {
            tiers: vec![RefundTier { hours_before: 24, refund_percent: 50 }],
            ..policy()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn first_matching_tier_applies() {
        let departure = 100 * MS_PER_HOUR;
        // 72h out: full refund.
        let d = decide(&policy(), departure, 28 * MS_PER_HOUR, dec!(120), "USD");
        assert_eq!(d.refund_percent, 100);
        assert_eq!(d.refund_amount, dec!(120.00));
        // 30h out: half.
        let d = decide(&policy(), departure, 70 * MS_PER_HOUR, dec!(120), "USD");
        assert_eq!(d.refund_percent, 50);
        assert_eq!(d.refund_amount, dec!(60.00));
        // 2h out: nothing.
        let d = decide(&policy(), departure, 98 * MS_PER_HOUR, dec!(120), "USD");
        assert_eq!(d.refund_percent, 0);
        assert_eq!(d.refund_amount, dec!(0.00));
    }

    #[test]
    fn tier_boundary_is_inclusive() {
        let departure = 48 * MS_PER_HOUR;
        let d = decide(&policy(), departure, 0, dec!(100), "USD");
        assert_eq!(d.refund_percent, 100);
    }

    #[test]
    fn cancellation_after_departure_refunds_nothing() {
        let d = decide(&policy(), 0, 3 * MS_PER_HOUR, dec!(100), "USD");
        assert_eq!(d.refund_percent, 0);
        assert!(d.hours_before_departure < 0);
    }

    #[test]
    fn refund_rounds_half_to_even() {
        // 50% of 120.01 = 60.005 -> 60.00 (even cent).
        let d = decide(&policy(), 100 * MS_PER_HOUR, 70 * MS_PER_HOUR, dec!(120.01), "USD");
        assert_eq!(d.refund_amount, dec!(60.00));
        // 50% of 120.03 = 60.015 -> 60.02.
        let d = decide(&policy(), 100 * MS_PER_HOUR, 70 * MS_PER_HOUR, dec!(120.03), "USD");
        assert_eq!(d.refund_amount, dec!(60.02));
    }

    #[test]
    fn operator_cancel_uses_operator_rate() {
        let d = operator_decide(&policy(), dec!(80), "USD");
        assert_eq!(d.refund_percent, 100);
        assert_eq!(d.refund_amount, dec!(80.00));
    }
}
