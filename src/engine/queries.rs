use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::day::{day_of_week_in, local_minute_of_day, local_today, parse_timezone};
use crate::model::*;

use super::constraints::{aggregate, ConstraintSet, Snapshot};
use super::slots::{self, generate, validate_minutes};
use super::{Engine, EngineError};

impl Engine {
    /// Read the schedule and the date's book together and aggregate them.
    /// Both read locks are held for the whole aggregation, so the result is a
    /// single point-in-time view.
    pub(super) async fn read_constraints(
        &self,
        date: CalendarDate,
        tz: &Tz,
        staff: StaffFilter,
    ) -> Result<ConstraintSet, EngineError> {
        let schedule = self.schedule.read().await;
        let book_arc = self.days.get(&date).map(|e| e.value().clone());
        let book_guard = match &book_arc {
            Some(book) => Some(book.read().await),
            None => None,
        };
        let empty = DayBook::new(date);
        let snapshot = Snapshot {
            schedule: &*schedule,
            book: book_guard.as_deref().unwrap_or(&empty),
        };
        aggregate(&snapshot, date, tz, staff)
    }

    pub async fn constraints_for(
        &self,
        date: CalendarDate,
        timezone: &str,
        staff: StaffFilter,
    ) -> Result<ConstraintSet, EngineError> {
        let tz = parse_timezone(timezone)?;
        self.read_constraints(date, &tz, staff).await
    }

    /// Every candidate slot of the day with its verdict.
    ///
    /// Closed days and unscheduled staff come back as an empty list with a
    /// notice rather than as errors.
    pub async fn available_slots(
        &self,
        query: &SlotQuery,
        now: DateTime<Utc>,
    ) -> Result<SlotListing, EngineError> {
        validate_minutes("service duration", query.service_minutes)?;
        validate_minutes("slot step", query.step_minutes)?;
        let tz = parse_timezone(&query.timezone)?;
        let started = std::time::Instant::now();

        let constraints = self.read_constraints(query.date, &tz, query.staff).await?;
        let closed_notice = if constraints.full_day_closed {
            Some(DayNotice::ClosedDate {
                reason: constraints.closed_reason.clone(),
            })
        } else if constraints.business_window.is_none() {
            Some(DayNotice::ClosedWeekday)
        } else if constraints.staff_not_working() {
            Some(DayNotice::StaffNotWorking)
        } else {
            None
        };

        let slots = match closed_notice {
            Some(_) => Vec::new(),
            None => generate(
                &constraints,
                query.step_minutes,
                query.service_minutes,
                query.date,
                &tz,
                now,
            )?,
        };
        let notice = closed_notice
            .or_else(|| (!slots.iter().any(|s| s.available)).then_some(DayNotice::FullyBooked));

        metrics::histogram!(crate::observability::SLOT_GENERATION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(
            "{} ({}): {} slots, {} available",
            query.date,
            constraints.day,
            slots.len(),
            slots.iter().filter(|s| s.available).count()
        );

        Ok(SlotListing {
            date: query.date,
            day: constraints.day,
            slots,
            notice,
        })
    }

    /// Free time ranges of a day, independent of any service duration.
    pub async fn open_ranges(
        &self,
        date: CalendarDate,
        timezone: &str,
        staff: StaffFilter,
    ) -> Result<Vec<Span>, EngineError> {
        let constraints = self.constraints_for(date, timezone, staff).await?;
        Ok(slots::open_ranges(&constraints))
    }

    /// Whether a staff member is inside one of their breaks (admin or
    /// personal) right now. Derived on every call, never stored.
    pub async fn staff_on_break(
        &self,
        staff_id: Ulid,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let tz = parse_timezone(timezone)?;
        let today = local_today(&tz, now);
        let day = day_of_week_in(today, &tz);
        let minute = local_minute_of_day(&tz, now);
        let schedule = self.schedule.read().await;
        Ok(schedule.breaks.iter().any(|b| {
            b.day == day
                && (b.staff_id.is_none() || b.staff_id == Some(staff_id))
                && b.span.contains_minute(minute)
        }))
    }

    pub async fn business_hours(&self, day: DayOfWeek) -> Option<Span> {
        self.schedule.read().await.business_hours[day.index()]
    }

    pub async fn working_hours(&self, staff_id: Ulid, day: DayOfWeek) -> Vec<Span> {
        self.schedule
            .read()
            .await
            .working_hours
            .get(&staff_id)
            .map(|week| week[day.index()].clone())
            .unwrap_or_default()
    }

    /// Breaks, optionally limited to one weekday, ordered by day then start.
    pub async fn list_breaks(&self, day: Option<DayOfWeek>) -> Vec<Break> {
        let schedule = self.schedule.read().await;
        let mut breaks: Vec<Break> = schedule
            .breaks
            .iter()
            .filter(|b| day.is_none_or(|d| b.day == d))
            .cloned()
            .collect();
        breaks.sort_by_key(|b| (b.day, b.span.start));
        breaks
    }

    pub async fn list_closures(&self, date: Option<CalendarDate>) -> Vec<ShopClosure> {
        let schedule = self.schedule.read().await;
        let mut closures: Vec<ShopClosure> = schedule
            .closures
            .iter()
            .filter(|c| date.is_none_or(|d| c.date == d))
            .cloned()
            .collect();
        closures.sort_by_key(|c| c.date);
        closures
    }

    /// All appointments of a date, any status, ordered by start.
    pub async fn appointments_on(&self, date: CalendarDate) -> Vec<Appointment> {
        let book = match self.days.get(&date).map(|e| e.value().clone()) {
            Some(book) => book,
            None => return Vec::new(),
        };
        book.read().await.appointments.clone()
    }

    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        let date = self.appointment_date(&id)?;
        let book = self.days.get(&date).map(|e| e.value().clone())?;
        let guard = book.read().await;
        guard.appointments.iter().find(|a| a.id == id).cloned()
    }
}
