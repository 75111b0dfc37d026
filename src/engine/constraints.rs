use chrono_tz::Tz;
use ulid::Ulid;

use crate::day::day_of_week_in;
use crate::model::*;

use super::EngineError;

/// Read side of the collaborators that own schedule data.
///
/// Implementations return raw rows; [`aggregate`] does all day/date filtering
/// and validation, so a source never needs to know how weekdays are derived.
pub trait ScheduleSource {
    fn business_hours(&self, day: DayOfWeek) -> Option<Span>;
    fn working_hours(&self, staff_id: Ulid, day: DayOfWeek) -> Vec<Span>;
    fn staff_ids(&self) -> Vec<Ulid>;
    /// Admin breaks when `staff_id` is `None`, that staff's personal breaks otherwise.
    fn breaks(&self, day: DayOfWeek, staff_id: Option<Ulid>) -> Vec<Break>;
    fn closures(&self, date: CalendarDate) -> ClosureDay;
    fn appointments(&self, date: CalendarDate, staff_id: Option<Ulid>) -> Vec<Appointment>;
}

/// A consistent view over a business schedule and one day's appointments.
pub struct Snapshot<'a> {
    pub schedule: &'a Schedule,
    pub book: &'a DayBook,
}

impl ScheduleSource for Snapshot<'_> {
    fn business_hours(&self, day: DayOfWeek) -> Option<Span> {
        self.schedule.business_hours[day.index()]
    }

    fn working_hours(&self, staff_id: Ulid, day: DayOfWeek) -> Vec<Span> {
        self.schedule
            .working_hours
            .get(&staff_id)
            .map(|week| week[day.index()].clone())
            .unwrap_or_default()
    }

    fn staff_ids(&self) -> Vec<Ulid> {
        self.schedule.working_hours.keys().copied().collect()
    }

    fn breaks(&self, day: DayOfWeek, staff_id: Option<Ulid>) -> Vec<Break> {
        self.schedule
            .breaks
            .iter()
            .filter(|b| b.day == day && b.staff_id == staff_id)
            .cloned()
            .collect()
    }

    fn closures(&self, date: CalendarDate) -> ClosureDay {
        let mut day = ClosureDay::default();
        for closure in self.schedule.closures.iter().filter(|c| c.date == date) {
            match closure.kind {
                ClosureKind::FullDay => {
                    day.full_day = true;
                    if day.reason.is_none() {
                        day.reason = closure.reason.clone();
                    }
                }
                ClosureKind::Partial(span) => day.partial.push(PartialClosure {
                    span,
                    reason: closure.reason.clone(),
                }),
            }
        }
        day
    }

    fn appointments(&self, date: CalendarDate, staff_id: Option<Ulid>) -> Vec<Appointment> {
        if self.book.date != date {
            return Vec::new();
        }
        self.book
            .appointments
            .iter()
            .filter(|a| staff_id.is_none() || a.staff_id == staff_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedSpan {
    pub appointment_id: Ulid,
    pub span: Span,
}

/// Everything that constrains slots on one date, already filtered to that
/// date and its weekday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSet {
    pub date: CalendarDate,
    pub day: DayOfWeek,
    pub business_window: Option<Span>,
    pub full_day_closed: bool,
    pub closed_reason: Option<String>,
    pub partial_closures: Vec<PartialClosure>,
    /// `None` when no staff constraint applies (shop-level booking).
    pub working_windows: Option<Vec<Span>>,
    pub breaks: Vec<Break>,
    pub booked: Vec<BookedSpan>,
}

impl ConstraintSet {
    /// A staff member was requested but has no working window on this day.
    pub fn staff_not_working(&self) -> bool {
        self.working_windows.as_ref().is_some_and(|w| w.is_empty())
    }

    pub fn is_closed(&self) -> bool {
        self.full_day_closed || self.business_window.is_none()
    }
}

/// Gather the constraints of `date` for the given staff filter.
///
/// Fails fast on stored rows with a malformed interval instead of skipping them.
pub fn aggregate(
    source: &impl ScheduleSource,
    date: CalendarDate,
    tz: &Tz,
    staff: StaffFilter,
) -> Result<ConstraintSet, EngineError> {
    let day = day_of_week_in(date, tz);

    let business_window = source.business_hours(day);
    if let Some(window) = &business_window {
        window.validate()?;
    }

    let closures = source.closures(date);
    for partial in &closures.partial {
        partial.span.validate()?;
    }

    let working_windows = match staff {
        StaffFilter::Shop => None,
        StaffFilter::Staff(id) => Some(validated(source.working_hours(id, day))?),
        StaffFilter::AnyStaff => {
            // Kept per staff member: a candidate must fit inside one person's shift.
            let mut windows = Vec::new();
            for id in source.staff_ids() {
                windows.extend(validated(source.working_hours(id, day))?);
            }
            windows.sort_by_key(|s| (s.start, s.end));
            windows.dedup();
            Some(windows)
        }
    };

    let mut breaks: Vec<Break> = source
        .breaks(day, None)
        .into_iter()
        .filter(|b| b.day == day && b.is_admin())
        .collect();
    if let StaffFilter::Staff(id) = staff {
        breaks.extend(
            source
                .breaks(day, Some(id))
                .into_iter()
                .filter(|b| b.day == day && b.staff_id == Some(id)),
        );
    }
    for b in &breaks {
        b.span.validate()?;
    }
    breaks.sort_by_key(|b| b.span.start);

    let mut booked = Vec::new();
    for appointment in source.appointments(date, staff.staff_id()) {
        if appointment.date != date || !appointment.blocks() {
            continue;
        }
        if let StaffFilter::Staff(id) = staff
            && appointment.staff_id != Some(id) {
                continue;
            }
        appointment.span.validate()?;
        booked.push(BookedSpan {
            appointment_id: appointment.id,
            span: appointment.span,
        });
    }
    booked.sort_by_key(|b| b.span.start);

    Ok(ConstraintSet {
        date,
        day,
        business_window,
        full_day_closed: closures.full_day,
        closed_reason: closures.reason,
        partial_closures: closures.partial,
        working_windows,
        breaks,
        booked,
    })
}

fn validated(spans: Vec<Span>) -> Result<Vec<Span>, EngineError> {
    for span in &spans {
        span.validate()?;
    }
    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day::parse_timezone;

    const H: Min = 60;

    fn date(s: &str) -> CalendarDate {
        s.parse().unwrap()
    }

    fn tz() -> Tz {
        parse_timezone("America/Edmonton").unwrap()
    }

    fn brk(day: DayOfWeek, start: Min, end: Min, staff_id: Option<Ulid>) -> Break {
        Break {
            id: Ulid::new(),
            day,
            span: Span::new(start, end),
            staff_id,
            name: None,
        }
    }

    fn appt(on: CalendarDate, start: Min, end: Min, staff_id: Option<Ulid>, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            date: on,
            span: Span::new(start, end),
            status,
            staff_id,
            label: None,
        }
    }

    fn saturday_schedule() -> Schedule {
        let mut schedule = Schedule::default();
        schedule.business_hours[DayOfWeek::Saturday.index()] = Some(Span::new(9 * H, 18 * H));
        schedule
    }

    #[test]
    fn resolves_business_window_for_weekday() {
        let schedule = saturday_schedule();
        let book = DayBook::new(date("2024-08-31"));
        let snap = Snapshot { schedule: &schedule, book: &book };

        let set = aggregate(&snap, date("2024-08-31"), &tz(), StaffFilter::Shop).unwrap();
        assert_eq!(set.day, DayOfWeek::Saturday);
        assert_eq!(set.business_window, Some(Span::new(9 * H, 18 * H)));
        assert!(set.working_windows.is_none());
        assert!(!set.is_closed());

        let sunday = aggregate(&snap, date("2024-09-01"), &tz(), StaffFilter::Shop).unwrap();
        assert_eq!(sunday.day, DayOfWeek::Sunday);
        assert!(sunday.is_closed());
    }

    #[test]
    fn breaks_are_filtered_by_day_and_staff() {
        let alice = Ulid::new();
        let bob = Ulid::new();
        let mut schedule = saturday_schedule();
        schedule.breaks = vec![
            brk(DayOfWeek::Saturday, 12 * H, 13 * H, None),
            brk(DayOfWeek::Monday, 12 * H, 13 * H, None),
            brk(DayOfWeek::Saturday, 15 * H, 16 * H, Some(alice)),
            brk(DayOfWeek::Saturday, 10 * H, 11 * H, Some(bob)),
            brk(DayOfWeek::Sunday, 10 * H, 11 * H, Some(alice)),
        ];
        let book = DayBook::new(date("2024-08-31"));
        let snap = Snapshot { schedule: &schedule, book: &book };

        let shop = aggregate(&snap, date("2024-08-31"), &tz(), StaffFilter::Shop).unwrap();
        assert_eq!(shop.breaks.len(), 1);
        assert!(shop.breaks[0].is_admin());

        let for_alice = aggregate(&snap, date("2024-08-31"), &tz(), StaffFilter::Staff(alice)).unwrap();
        let spans: Vec<Span> = for_alice.breaks.iter().map(|b| b.span).collect();
        assert_eq!(spans, vec![Span::new(12 * H, 13 * H), Span::new(15 * H, 16 * H)]);

        let any = aggregate(&snap, date("2024-08-31"), &tz(), StaffFilter::AnyStaff).unwrap();
        assert_eq!(any.breaks.len(), 1);
    }

    #[test]
    fn closures_match_exact_date() {
        let mut schedule = saturday_schedule();
        schedule.closures = vec![
            ShopClosure {
                id: Ulid::new(),
                date: date("2024-08-31"),
                kind: ClosureKind::Partial(Span::new(14 * H, 15 * H)),
                reason: Some("Inventory".into()),
            },
            ShopClosure {
                id: Ulid::new(),
                date: date("2024-09-07"),
                kind: ClosureKind::FullDay,
                reason: Some("Holiday".into()),
            },
        ];
        let book = DayBook::new(date("2024-08-31"));
        let snap = Snapshot { schedule: &schedule, book: &book };

        let open = aggregate(&snap, date("2024-08-31"), &tz(), StaffFilter::Shop).unwrap();
        assert!(!open.full_day_closed);
        assert_eq!(open.partial_closures.len(), 1);
        assert_eq!(open.partial_closures[0].reason.as_deref(), Some("Inventory"));

        let closed = aggregate(&snap, date("2024-09-07"), &tz(), StaffFilter::Shop).unwrap();
        assert!(closed.full_day_closed);
        assert_eq!(closed.closed_reason.as_deref(), Some("Holiday"));
        assert!(closed.partial_closures.is_empty());
    }

    #[test]
    fn booked_intervals_skip_released_statuses_and_other_staff() {
        let alice = Ulid::new();
        let bob = Ulid::new();
        let day = date("2024-08-31");
        let schedule = saturday_schedule();
        let mut book = DayBook::new(day);
        book.insert_appointment(appt(day, 10 * H, 11 * H, Some(alice), AppointmentStatus::Scheduled));
        book.insert_appointment(appt(day, 11 * H, 12 * H, Some(alice), AppointmentStatus::Cancelled));
        book.insert_appointment(appt(day, 12 * H, 13 * H, Some(alice), AppointmentStatus::NoShow));
        book.insert_appointment(appt(day, 13 * H, 14 * H, Some(bob), AppointmentStatus::Confirmed));
        let snap = Snapshot { schedule: &schedule, book: &book };

        let for_alice = aggregate(&snap, day, &tz(), StaffFilter::Staff(alice)).unwrap();
        let spans: Vec<Span> = for_alice.booked.iter().map(|b| b.span).collect();
        assert_eq!(spans, vec![Span::new(10 * H, 11 * H)]);

        let shop = aggregate(&snap, day, &tz(), StaffFilter::Shop).unwrap();
        assert_eq!(shop.booked.len(), 2);

        // The snapshot only knows its own date.
        let other = aggregate(&snap, date("2024-09-07"), &tz(), StaffFilter::Shop).unwrap();
        assert!(other.booked.is_empty());
    }

    #[test]
    fn working_windows_per_filter() {
        let alice = Ulid::new();
        let bob = Ulid::new();
        let carol = Ulid::new();
        let mut schedule = saturday_schedule();
        let sat = DayOfWeek::Saturday.index();
        let mut alice_week: [Vec<Span>; 7] = Default::default();
        alice_week[sat] = vec![Span::new(9 * H, 13 * H)];
        let mut bob_week: [Vec<Span>; 7] = Default::default();
        bob_week[sat] = vec![Span::new(12 * H, 18 * H)];
        schedule.working_hours.insert(alice, alice_week);
        schedule.working_hours.insert(bob, bob_week);
        schedule.working_hours.insert(carol, Default::default());
        let book = DayBook::new(date("2024-08-31"));
        let snap = Snapshot { schedule: &schedule, book: &book };

        let a = aggregate(&snap, date("2024-08-31"), &tz(), StaffFilter::Staff(alice)).unwrap();
        assert_eq!(a.working_windows, Some(vec![Span::new(9 * H, 13 * H)]));

        let c = aggregate(&snap, date("2024-08-31"), &tz(), StaffFilter::Staff(carol)).unwrap();
        assert!(c.staff_not_working());

        let any = aggregate(&snap, date("2024-08-31"), &tz(), StaffFilter::AnyStaff).unwrap();
        assert_eq!(
            any.working_windows,
            Some(vec![Span::new(9 * H, 13 * H), Span::new(12 * H, 18 * H)])
        );
    }

    #[test]
    fn malformed_stored_interval_fails_fast() {
        let mut schedule = saturday_schedule();
        schedule.breaks.push(Break {
            id: Ulid::new(),
            day: DayOfWeek::Saturday,
            span: Span { start: 13 * H, end: 12 * H },
            staff_id: None,
            name: None,
        });
        let book = DayBook::new(date("2024-08-31"));
        let snap = Snapshot { schedule: &schedule, book: &book };
        let err = aggregate(&snap, date("2024-08-31"), &tz(), StaffFilter::Shop).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInterval { .. }));
    }
}
