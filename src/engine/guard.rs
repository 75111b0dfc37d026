use crate::model::*;

use super::constraints::ConstraintSet;
use super::slots::{evaluate, Exclusion};

/// Re-check a concrete booking candidate against constraints read inside the
/// day's write section. `today_minute` is `Some` when the date is today;
/// `date_in_past` marks dates strictly before today.
pub(crate) fn check_candidate(
    constraints: &ConstraintSet,
    candidate: &Span,
    today_minute: Option<Min>,
    date_in_past: bool,
) -> Result<(), ConflictReason> {
    if constraints.full_day_closed {
        return Err(ConflictReason::ClosedDate {
            reason: constraints.closed_reason.clone(),
        });
    }
    let Some(window) = constraints.business_window else {
        return Err(ConflictReason::ClosedWeekday);
    };
    if !window.contains(candidate) {
        return Err(ConflictReason::OutsideBusinessHours);
    }
    if date_in_past {
        return Err(ConflictReason::PastTime);
    }
    match evaluate(constraints, candidate, today_minute) {
        None => Ok(()),
        Some(exclusion) => Err(conflict_reason(exclusion)),
    }
}

fn conflict_reason(exclusion: Exclusion<'_>) -> ConflictReason {
    match exclusion {
        Exclusion::PastTime => ConflictReason::PastTime,
        Exclusion::OutsideWorkingHours => ConflictReason::OutsideWorkingHours,
        Exclusion::Break(b) => ConflictReason::Break { name: b.name.clone() },
        Exclusion::Booked(booked) => ConflictReason::AlreadyBooked {
            appointment_id: booked.appointment_id,
        },
        Exclusion::PartialClosure(c) => ConflictReason::PartialClosure {
            reason: c.reason.clone(),
        },
    }
}
