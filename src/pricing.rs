//! Price resolution: trip price (overlay over the template base) plus the
//! site's active signed adjustments. The resulting breakdown is captured
//! into the booking at creation and never recomputed.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::model::{
    AdjustmentKind, AppliedAdjustment, Ms, PriceSnapshot, SiteInfo, TimeOfDay, TripTemplate,
};
use crate::overlay;

/// Compute the full breakdown for one seat on a trip.
///
/// Adjustment applicability:
/// - mode-restricted adjustments apply only when the template's dive mode
///   matches;
/// - night surcharges apply only to night products;
/// - inactive adjustments never apply.
///
/// The total is rounded half-to-even to 2 decimal places exactly once,
/// here, at snapshot time.
pub fn compute_price(
    template: &TripTemplate,
    price_override: Option<Decimal>,
    site: &SiteInfo,
    at: Ms,
) -> PriceSnapshot {
    let base = overlay::resolve(&[price_override, Some(template.base_price)])
        .unwrap_or(template.base_price);

    let mut adjustments = Vec::new();
    for adj in &site.adjustments {
        if !adj.active {
            continue;
        }
        if let Some(mode) = adj.applies_to_mode
            && mode != template.dive_mode
        {
            continue;
        }
        if adj.kind == AdjustmentKind::NightSurcharge && template.time_of_day != TimeOfDay::Night {
            continue;
        }
        adjustments.push(AppliedAdjustment { kind: adj.kind, amount: adj.amount });
    }

    let total: Decimal = base + adjustments.iter().map(|a| a.amount).sum::<Decimal>();
    PriceSnapshot {
        base,
        adjustments,
        total: total.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven),
        currency: template.currency.clone(),
        template_id: template.id,
        site_id: site.id,
        resolved_at: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiveMode, SiteAdjustment, TemplateStatus};
    use rust_decimal_macros::dec;
    use ulid::Ulid;

    fn template(mode: DiveMode, tod: TimeOfDay, base: Decimal) -> TripTemplate {
        TripTemplate {
            id: Ulid::new(),
            name: "Two-Tank Reef".into(),
            base_price: base,
            currency: "USD".into(),
            requires_cert: true,
            min_cert_rank: Some(1),
            is_training: false,
            min_age: None,
            dive_mode: mode,
            time_of_day: tod,
            dives: vec![],
            status: TemplateStatus::Published,
        }
    }

    fn site(adjustments: Vec<SiteAdjustment>) -> SiteInfo {
        SiteInfo {
            id: Ulid::new(),
            name: "North Wall".into(),
            max_depth_m: 30,
            min_cert_rank: None,
            adjustments,
        }
    }

    fn adj(kind: AdjustmentKind, amount: Decimal) -> SiteAdjustment {
        SiteAdjustment { kind, amount, active: true, applies_to_mode: None }
    }

    #[test]
    fn base_plus_signed_adjustments() {
        let s = site(vec![
            adj(AdjustmentKind::ParkFee, dec!(10)),
            adj(AdjustmentKind::Distance, dec!(-5)),
        ]);
        let p = compute_price(&template(DiveMode::Boat, TimeOfDay::Day, dec!(100)), None, &s, 0);
        assert_eq!(p.total, dec!(105.00));
        assert_eq!(p.adjustments.len(), 2);
    }

    #[test]
    fn trip_override_shadows_template_base() {
        let s = site(vec![]);
        let p = compute_price(
            &template(DiveMode::Boat, TimeOfDay::Day, dec!(100)),
            Some(dec!(120)),
            &s,
            0,
        );
        assert_eq!(p.base, dec!(120));
        assert_eq!(p.total, dec!(120.00));
    }

    #[test]
    fn inactive_adjustments_skipped() {
        let mut a = adj(AdjustmentKind::ParkFee, dec!(10));
        a.active = false;
        let p = compute_price(
            &template(DiveMode::Boat, TimeOfDay::Day, dec!(100)),
            None,
            &site(vec![a]),
            0,
        );
        assert_eq!(p.total, dec!(100.00));
    }

    #[test]
    fn boat_fee_only_for_boat_mode() {
        let mut a = adj(AdjustmentKind::BoatFee, dec!(15));
        a.applies_to_mode = Some(DiveMode::Boat);
        let shore = compute_price(
            &template(DiveMode::Shore, TimeOfDay::Day, dec!(100)),
            None,
            &site(vec![a.clone()]),
            0,
        );
        assert_eq!(shore.total, dec!(100.00));
        let boat = compute_price(
            &template(DiveMode::Boat, TimeOfDay::Day, dec!(100)),
            None,
            &site(vec![a]),
            0,
        );
        assert_eq!(boat.total, dec!(115.00));
    }

    #[test]
    fn night_surcharge_only_at_night() {
        let a = adj(AdjustmentKind::NightSurcharge, dec!(20));
        let day = compute_price(
            &template(DiveMode::Boat, TimeOfDay::Day, dec!(100)),
            None,
            &site(vec![a.clone()]),
            0,
        );
        assert_eq!(day.total, dec!(100.00));
        let night = compute_price(
            &template(DiveMode::Boat, TimeOfDay::Night, dec!(100)),
            None,
            &site(vec![a]),
            0,
        );
        assert_eq!(night.total, dec!(120.00));
    }

    #[test]
    fn total_rounds_half_to_even_once() {
        let s = site(vec![adj(AdjustmentKind::ParkFee, dec!(0.005))]);
        let p = compute_price(&template(DiveMode::Boat, TimeOfDay::Day, dec!(100)), None, &s, 0);
        // 100.005 -> 100.00 (even cent).
        assert_eq!(p.total, dec!(100.00));

        let s = site(vec![adj(AdjustmentKind::ParkFee, dec!(0.015))]);
        let p = compute_price(&template(DiveMode::Boat, TimeOfDay::Day, dec!(100)), None, &s, 0);
        // 100.015 -> 100.02.
        assert_eq!(p.total, dec!(100.02));
    }
}
