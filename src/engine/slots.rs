use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::day::minute_if_today;
use crate::limits::MAX_SLOT_MINUTES;
use crate::model::*;

use super::constraints::{BookedSpan, ConstraintSet};
use super::EngineError;

// ── Slot generation ───────────────────────────────────────────────

/// The first check that excludes a candidate, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exclusion<'a> {
    PastTime,
    OutsideWorkingHours,
    Break(&'a Break),
    Booked(&'a BookedSpan),
    PartialClosure(&'a PartialClosure),
}

impl Exclusion<'_> {
    pub(crate) fn slot_reason(&self) -> SlotReason {
        match self {
            Exclusion::PastTime => SlotReason::PastTime,
            Exclusion::OutsideWorkingHours => SlotReason::OutsideWorkingHours,
            Exclusion::Break(b) => SlotReason::Break { name: b.name.clone() },
            Exclusion::Booked(_) => SlotReason::AlreadyBooked,
            Exclusion::PartialClosure(c) => SlotReason::ShopClosed { reason: c.reason.clone() },
        }
    }
}

/// Evaluate one candidate against every constraint. `now_minute` is the
/// current local minute when the date is today, `None` otherwise.
pub(crate) fn evaluate<'a>(
    constraints: &'a ConstraintSet,
    candidate: &Span,
    now_minute: Option<Min>,
) -> Option<Exclusion<'a>> {
    if now_minute.is_some_and(|now| candidate.start <= now) {
        return Some(Exclusion::PastTime);
    }
    if let Some(windows) = &constraints.working_windows
        && !windows.iter().any(|w| w.contains(candidate)) {
            return Some(Exclusion::OutsideWorkingHours);
        }
    if let Some(b) = constraints.breaks.iter().find(|b| b.span.overlaps(candidate)) {
        return Some(Exclusion::Break(b));
    }
    if let Some(booked) = constraints.booked.iter().find(|b| b.span.overlaps(candidate)) {
        return Some(Exclusion::Booked(booked));
    }
    if let Some(c) = constraints
        .partial_closures
        .iter()
        .find(|c| c.span.overlaps(candidate))
    {
        return Some(Exclusion::PartialClosure(c));
    }
    None
}

pub(crate) fn validate_minutes(field: &'static str, value: Min) -> Result<(), EngineError> {
    if value <= 0 {
        return Err(EngineError::InvalidDuration { field, value });
    }
    if value > MAX_SLOT_MINUTES {
        return Err(EngineError::LimitExceeded("duration longer than a day"));
    }
    Ok(())
}

/// Walk the business window in `step` increments and classify every
/// `[t, t + duration)` candidate. Output is strictly ascending by start.
///
/// A closed day yields an empty list, not an error.
pub fn generate(
    constraints: &ConstraintSet,
    step: Min,
    duration: Min,
    date: CalendarDate,
    tz: &Tz,
    now: DateTime<Utc>,
) -> Result<Vec<Slot>, EngineError> {
    validate_minutes("slot step", step)?;
    validate_minutes("service duration", duration)?;

    let window = match constraints.business_window {
        Some(window) if !constraints.full_day_closed => window,
        _ => return Ok(Vec::new()),
    };

    let now_minute = minute_if_today(date, tz, now);
    let mut slots = Vec::with_capacity((window.duration() / step).max(0) as usize + 1);
    let mut t = window.start;
    while t + duration <= window.end {
        let candidate = Span::new(t, t + duration);
        let reason = evaluate(constraints, &candidate, now_minute).map(|e| e.slot_reason());
        slots.push(Slot {
            start: candidate.start_time(),
            end: candidate.end_time(),
            available: reason.is_none(),
            reason,
        });
        t += step;
    }
    Ok(slots)
}

// ── Interval algebra ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Remove sorted `to_remove` spans from sorted, disjoint `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Free ranges of a day: working windows clipped to business hours, minus
/// breaks, partial closures and bookings.
pub fn open_ranges(constraints: &ConstraintSet) -> Vec<Span> {
    let window = match constraints.business_window {
        Some(window) if !constraints.full_day_closed => window,
        _ => return Vec::new(),
    };

    let mut base: Vec<Span> = match &constraints.working_windows {
        None => vec![window],
        Some(windows) => windows
            .iter()
            .filter_map(|w| {
                let start = w.start.max(window.start);
                let end = w.end.min(window.end);
                (start < end).then(|| Span::new(start, end))
            })
            .collect(),
    };
    base.sort_by_key(|s| s.start);
    let base = merge_overlapping(&base);

    let mut blocked: Vec<Span> = constraints
        .breaks
        .iter()
        .map(|b| b.span)
        .chain(constraints.partial_closures.iter().map(|c| c.span))
        .chain(constraints.booked.iter().map(|b| b.span))
        .collect();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);

    subtract_intervals(&base, &blocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    use crate::day::parse_timezone;

    const H: Min = 60;

    fn tz() -> Tz {
        parse_timezone("America/Edmonton").unwrap()
    }

    fn date() -> CalendarDate {
        "2024-08-31".parse().unwrap()
    }

    /// A moment on a different local date than `date()`.
    fn far_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 1, 12, 0, 0).unwrap()
    }

    fn constraints() -> ConstraintSet {
        ConstraintSet {
            date: date(),
            day: DayOfWeek::Saturday,
            business_window: Some(Span::new(9 * H, 18 * H)),
            full_day_closed: false,
            closed_reason: None,
            partial_closures: Vec::new(),
            working_windows: None,
            breaks: Vec::new(),
            booked: Vec::new(),
        }
    }

    fn lunch() -> Break {
        Break {
            id: Ulid::new(),
            day: DayOfWeek::Saturday,
            span: Span::new(12 * H, 13 * H),
            staff_id: None,
            name: None,
        }
    }

    fn slot_at(slots: &[Slot], minute: Min) -> &Slot {
        slots.iter().find(|s| s.start.minutes() == minute).unwrap()
    }

    #[test]
    fn break_excludes_overlapping_slots() {
        let mut c = constraints();
        c.breaks.push(lunch());
        let slots = generate(&c, 30, 30, date(), &tz(), far_now()).unwrap();

        assert_eq!(slots.len(), 18);
        let noon = slot_at(&slots, 12 * H);
        assert!(!noon.available);
        assert_eq!(noon.reason, Some(SlotReason::Break { name: None }));
        assert!(!slot_at(&slots, 12 * H + 30).available);
        let one = slot_at(&slots, 13 * H);
        assert!(one.available);
        assert_eq!(one.reason, None);
        assert!(slot_at(&slots, 11 * H + 30).available);
    }

    #[test]
    fn named_break_reason() {
        let mut c = constraints();
        let mut b = lunch();
        b.name = Some("Lunch".into());
        c.breaks.push(b);
        let slots = generate(&c, 30, 60, date(), &tz(), far_now()).unwrap();
        assert_eq!(slot_at(&slots, 11 * H + 30).reason.as_ref().unwrap().to_string(), "Lunch");
    }

    #[test]
    fn slots_are_strictly_ascending_and_fit_window() {
        let c = constraints();
        let slots = generate(&c, 15, 45, date(), &tz(), far_now()).unwrap();
        assert!(slots.windows(2).all(|w| w[0].start < w[1].start));
        assert_eq!(slots.first().unwrap().start.minutes(), 9 * H);
        assert_eq!(slots.last().unwrap().end.minutes(), 18 * H);
        assert!(slots.iter().all(|s| s.end.minutes() - s.start.minutes() == 45));
    }

    #[test]
    fn generation_is_deterministic() {
        let mut c = constraints();
        c.breaks.push(lunch());
        let a = generate(&c, 20, 50, date(), &tz(), far_now()).unwrap();
        let b = generate(&c, 20, 50, date(), &tz(), far_now()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn closed_day_yields_nothing() {
        let mut c = constraints();
        c.full_day_closed = true;
        c.working_windows = Some(vec![Span::new(9 * H, 18 * H)]);
        c.breaks.push(lunch());
        assert!(generate(&c, 30, 30, date(), &tz(), far_now()).unwrap().is_empty());

        let mut c = constraints();
        c.business_window = None;
        assert!(generate(&c, 30, 30, date(), &tz(), far_now()).unwrap().is_empty());
    }

    #[test]
    fn service_longer_than_window_yields_nothing() {
        let mut c = constraints();
        c.business_window = Some(Span::new(9 * H, 10 * H));
        assert!(generate(&c, 30, 90, date(), &tz(), far_now()).unwrap().is_empty());
    }

    #[test]
    fn rejects_non_positive_minutes() {
        let c = constraints();
        assert!(matches!(
            generate(&c, 0, 30, date(), &tz(), far_now()),
            Err(EngineError::InvalidDuration { field: "slot step", value: 0 })
        ));
        assert!(matches!(
            generate(&c, 30, -15, date(), &tz(), far_now()),
            Err(EngineError::InvalidDuration { field: "service duration", .. })
        ));
    }

    #[test]
    fn past_time_only_today() {
        let c = constraints();
        // 10:15 local in Edmonton (UTC-6) on the same date.
        let now = Utc.with_ymd_and_hms(2024, 8, 31, 16, 15, 0).unwrap();
        let slots = generate(&c, 30, 30, date(), &tz(), now).unwrap();
        for slot in &slots {
            if slot.start.minutes() <= 10 * H + 15 {
                assert_eq!(slot.reason, Some(SlotReason::PastTime), "{:?}", slot.start);
            } else {
                assert!(slot.available, "{:?}", slot.start);
            }
        }

        let tomorrow: CalendarDate = "2024-09-01".parse().unwrap();
        let slots = generate(&c, 30, 30, tomorrow, &tz(), now).unwrap();
        assert!(slots.iter().all(|s| s.reason != Some(SlotReason::PastTime)));
    }

    #[test]
    fn slot_starting_exactly_now_is_past() {
        let c = constraints();
        let now = Utc.with_ymd_and_hms(2024, 8, 31, 16, 0, 0).unwrap();
        let slots = generate(&c, 30, 30, date(), &tz(), now).unwrap();
        assert_eq!(slot_at(&slots, 10 * H).reason, Some(SlotReason::PastTime));
        assert!(slot_at(&slots, 10 * H + 30).available);
    }

    #[test]
    fn working_hours_containment() {
        let mut c = constraints();
        c.working_windows = Some(vec![Span::new(10 * H, 14 * H)]);
        let slots = generate(&c, 30, 60, date(), &tz(), far_now()).unwrap();
        assert_eq!(slot_at(&slots, 9 * H + 30).reason, Some(SlotReason::OutsideWorkingHours));
        assert!(slot_at(&slots, 10 * H).available);
        assert!(slot_at(&slots, 13 * H).available);
        assert_eq!(slot_at(&slots, 13 * H + 30).reason, Some(SlotReason::OutsideWorkingHours));
    }

    #[test]
    fn staff_scheduled_nowhere_gets_no_available_slots() {
        let mut c = constraints();
        c.working_windows = Some(Vec::new());
        let slots = generate(&c, 30, 30, date(), &tz(), far_now()).unwrap();
        assert!(!slots.is_empty());
        assert!(slots.iter().all(|s| s.reason == Some(SlotReason::OutsideWorkingHours)));
    }

    #[test]
    fn priority_order_picks_first_reason() {
        let mut c = constraints();
        c.breaks.push(lunch());
        c.booked.push(BookedSpan {
            appointment_id: Ulid::new(),
            span: Span::new(12 * H, 12 * H + 30),
        });
        c.partial_closures.push(PartialClosure {
            span: Span::new(12 * H, 14 * H),
            reason: Some("Inventory".into()),
        });
        let slots = generate(&c, 30, 30, date(), &tz(), far_now()).unwrap();
        assert_eq!(slot_at(&slots, 12 * H).reason, Some(SlotReason::Break { name: None }));
        assert_eq!(
            slot_at(&slots, 13 * H).reason,
            Some(SlotReason::ShopClosed { reason: Some("Inventory".into()) })
        );
        assert!(slot_at(&slots, 14 * H).available);
    }

    #[test]
    fn booked_overlap_and_adjacency() {
        let mut c = constraints();
        c.booked.push(BookedSpan {
            appointment_id: Ulid::new(),
            span: Span::new(10 * H, 11 * H),
        });
        let slots = generate(&c, 30, 30, date(), &tz(), far_now()).unwrap();
        assert!(slot_at(&slots, 9 * H + 30).available); // ends where booking starts
        assert_eq!(slot_at(&slots, 10 * H).reason, Some(SlotReason::AlreadyBooked));
        assert_eq!(slot_at(&slots, 10 * H + 30).reason, Some(SlotReason::AlreadyBooked));
        assert!(slot_at(&slots, 11 * H).available);
    }

    // ── interval algebra ─────────────────────────────────

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300), Span::new(400, 500)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 300), Span::new(400, 500)]
        );
    }

    #[test]
    fn open_ranges_subtracts_everything() {
        let mut c = constraints();
        c.working_windows = Some(vec![Span::new(8 * H, 12 * H + 30), Span::new(14 * H, 20 * H)]);
        c.breaks.push(lunch());
        c.booked.push(BookedSpan {
            appointment_id: Ulid::new(),
            span: Span::new(15 * H, 16 * H),
        });
        assert_eq!(
            open_ranges(&c),
            vec![
                Span::new(9 * H, 12 * H),
                Span::new(14 * H, 15 * H),
                Span::new(16 * H, 18 * H),
            ]
        );

        c.full_day_closed = true;
        assert!(open_ranges(&c).is_empty());
    }
}
