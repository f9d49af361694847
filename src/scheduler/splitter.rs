//! Quantity splitting for multi-tab bookings
//!
//! The booking page caps how many tickets a single tab can request, so an
//! oversized slot is spread over several consecutive units with the same
//! label. The last unit carries the remainder.

use crate::models::TimeSlot;

/// Default per-tab ticket cap
pub const DEFAULT_MAX_PER_UNIT: u32 = 50;

/// Split every slot whose quantity exceeds `max_per_unit`.
///
/// Input order is preserved and the per-label total is unchanged. A
/// `max_per_unit` of zero is treated as one.
pub fn split_quantities(slots: &[TimeSlot], max_per_unit: u32) -> Vec<TimeSlot> {
    let max = max_per_unit.max(1);
    let mut result = Vec::with_capacity(slots.len());

    for slot in slots {
        if slot.quantity <= max {
            result.push(slot.clone());
            continue;
        }

        let units = slot.quantity.div_ceil(max);
        let mut remaining = slot.quantity;
        for _ in 0..units {
            let quantity = remaining.min(max);
            result.push(TimeSlot::new(slot.label.clone(), quantity));
            remaining -= quantity;
        }
    }

    result
}

/// Human-readable description of how one slot is split, if it is
///
/// e.g. `Split 120 tickets for '9:00 AM' across 3 tabs (50 + 50 + 20)`
pub fn describe_split(slot: &TimeSlot, max_per_unit: u32) -> Option<String> {
    let max = max_per_unit.max(1);
    if slot.quantity <= max {
        return None;
    }

    let parts = split_quantities(std::slice::from_ref(slot), max);
    let breakdown = parts
        .iter()
        .map(|p| p.quantity.to_string())
        .collect::<Vec<_>>()
        .join(" + ");

    Some(format!(
        "Split {} tickets for '{}' across {} tabs ({})",
        slot.quantity,
        slot.label,
        parts.len(),
        breakdown
    ))
}
