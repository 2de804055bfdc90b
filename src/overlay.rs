//! Layered-value resolution: personal override → instance → template.
//!
//! Absence is an explicit `None`, distinct from a stored zero. Every
//! effective-value computation in the crate goes through `resolve` so the
//! inheritance rule lives in exactly one place.

use crate::limits::*;

/// First present value walking most-specific → least-specific.
pub fn resolve<T: Copy>(layers: &[Option<T>]) -> Option<T> {
    layers.iter().find_map(|l| *l)
}

/// Borrowing variant for non-Copy layer values.
pub fn resolve_ref<'a, T>(layers: &'a [Option<T>]) -> Option<&'a T> {
    layers.iter().find_map(|l| l.as_ref())
}

/// Gas consumed over the dive, when both gauge readings are present.
pub fn air_consumed_bar(start: Option<u16>, end: Option<u16>) -> Option<u16> {
    match (start, end) {
        (Some(s), Some(e)) if e < s => Some(s - e),
        _ => None,
    }
}

/// Physical-ordering and range constraints on personal record overrides.
/// Checked against the post-update field values; a violation leaves the
/// record untouched.
pub fn check_record_constraints(
    max_depth_m: Option<u16>,
    bottom_time_min: Option<u16>,
    air_start_bar: Option<u16>,
    air_end_bar: Option<u16>,
    nitrox_percent: Option<u8>,
) -> Result<(), &'static str> {
    if let (Some(start), Some(end)) = (air_start_bar, air_end_bar)
        && end >= start
    {
        return Err("end pressure must be below start pressure");
    }
    if let Some(start) = air_start_bar
        && start > MAX_TANK_PRESSURE_BAR
    {
        return Err("start pressure out of range");
    }
    if let Some(pct) = nitrox_percent
        && !(NITROX_MIN_PERCENT..=NITROX_MAX_PERCENT).contains(&pct)
    {
        return Err("nitrox mix out of range");
    }
    if let Some(depth) = max_depth_m
        && (depth == 0 || depth > MAX_DEPTH_M)
    {
        return Err("depth out of range");
    }
    if let Some(time) = bottom_time_min
        && (time == 0 || time > MAX_BOTTOM_TIME_MIN)
    {
        return Err("bottom time out of range");
    }
    Ok(())
}
