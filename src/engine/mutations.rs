use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::day::{local_minute_of_day, local_today, parse_timezone};
use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKINGS_TOTAL;

use super::constraints::{aggregate, Snapshot};
use super::guard::check_candidate;
use super::{Engine, EngineError, WalCommand};

fn check_text(value: &Option<String>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

impl Engine {
    // ── Schedule administration ──────────────────────────────

    pub async fn set_business_hours(&self, day: DayOfWeek, span: Option<Span>) -> Result<(), EngineError> {
        if let Some(span) = &span {
            span.validate()?;
        }
        let mut schedule = self.schedule.write().await;
        let event = Event::BusinessHoursSet { day, span };
        self.persist_schedule(&mut schedule, &event).await?;
        match span {
            Some(span) => info!("business hours for {day} set to {span}"),
            None => info!("business closed on {day}"),
        }
        Ok(())
    }

    /// Replace one staff member's working windows for a weekday. An empty
    /// list means the staff member does not work that day.
    pub async fn set_working_hours(
        &self,
        staff_id: Ulid,
        day: DayOfWeek,
        mut spans: Vec<Span>,
    ) -> Result<(), EngineError> {
        if spans.len() > MAX_WINDOWS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many working windows per day"));
        }
        for span in &spans {
            span.validate()?;
        }
        spans.sort_by_key(|s| (s.start, s.end));

        let mut schedule = self.schedule.write().await;
        if !schedule.working_hours.contains_key(&staff_id) && schedule.working_hours.len() >= MAX_STAFF {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        let event = Event::WorkingHoursSet { staff_id, day, spans };
        self.persist_schedule(&mut schedule, &event).await?;
        info!("working hours of {staff_id} on {day} updated");
        Ok(())
    }

    pub async fn add_break(
        &self,
        id: Ulid,
        day: DayOfWeek,
        span: Span,
        staff_id: Option<Ulid>,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        span.validate()?;
        check_text(&name, MAX_NAME_LEN, "break name too long")?;

        let mut schedule = self.schedule.write().await;
        if schedule.find_break(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        if schedule.breaks.len() >= MAX_BREAKS {
            return Err(EngineError::LimitExceeded("too many breaks"));
        }
        let event = Event::BreakAdded { id, day, span, staff_id, name };
        self.persist_schedule(&mut schedule, &event).await?;
        info!("break {id} added on {day} {span}");
        Ok(())
    }

    pub async fn remove_break(&self, id: Ulid) -> Result<(), EngineError> {
        let mut schedule = self.schedule.write().await;
        if schedule.find_break(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BreakRemoved { id };
        self.persist_schedule(&mut schedule, &event).await?;
        info!("break {id} removed");
        Ok(())
    }

    /// Close the shop on `date`: the whole day when `span` is `None`, otherwise
    /// only that interval.
    pub async fn add_closure(
        &self,
        id: Ulid,
        date: CalendarDate,
        span: Option<Span>,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(span) = &span {
            span.validate()?;
        }
        check_text(&reason, MAX_NAME_LEN, "closure reason too long")?;

        let mut schedule = self.schedule.write().await;
        if schedule.find_closure(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        if schedule.closures.len() >= MAX_CLOSURES {
            return Err(EngineError::LimitExceeded("too many closures"));
        }
        let event = Event::ClosureAdded { id, date, span, reason };
        self.persist_schedule(&mut schedule, &event).await?;
        info!("closure {id} added on {date}");
        Ok(())
    }

    pub async fn remove_closure(&self, id: Ulid) -> Result<CalendarDate, EngineError> {
        let mut schedule = self.schedule.write().await;
        let date = schedule
            .find_closure(id)
            .map(|c| c.date)
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::ClosureRemoved { id, date };
        self.persist_schedule(&mut schedule, &event).await?;
        info!("closure {id} on {date} removed");
        Ok(date)
    }

    // ── Booking ──────────────────────────────────────────────

    /// Book `request.span` if it is still free.
    ///
    /// The schedule read lock and the date's write lock are held from the
    /// re-check through the WAL commit, so two requests for the same slot
    /// cannot both succeed. Waiting for those locks is bounded by the booking
    /// timeout; the commit itself is never abandoned half-way.
    pub async fn book_slot(
        &self,
        request: BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, EngineError> {
        let tz = parse_timezone(&request.timezone)?;
        request.span.validate()?;
        check_text(&request.label, MAX_LABEL_LEN, "label too long")?;
        let staff = StaffFilter::from(request.staff_id);
        let date = request.date;

        let deadline = tokio::time::Instant::now() + self.booking_timeout;
        let timed_out = |_| {
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "timeout").increment(1);
            warn!("booking on {date} timed out waiting for locks");
            EngineError::Storage("booking timed out".into())
        };
        let schedule = tokio::time::timeout_at(deadline, self.schedule.read())
            .await
            .map_err(timed_out)?;
        let book_arc = self.day_book(date);
        let mut book = tokio::time::timeout_at(deadline, book_arc.write())
            .await
            .map_err(timed_out)?;

        let snapshot = Snapshot {
            schedule: &*schedule,
            book: &*book,
        };
        let constraints = match aggregate(&snapshot, date, &tz, staff) {
            Ok(constraints) => constraints,
            Err(e) => {
                drop(book);
                self.release_if_empty(date, &book_arc);
                return Err(e);
            }
        };

        let today = local_today(&tz, now);
        let today_minute = (today == date).then(|| local_minute_of_day(&tz, now));
        if let Err(reason) = check_candidate(&constraints, &request.span, today_minute, date < today) {
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "conflict").increment(1);
            debug!("booking {} on {date} refused: {reason}", request.span);
            drop(book);
            self.release_if_empty(date, &book_arc);
            return Ok(BookingOutcome::Conflict(reason));
        }
        if book.appointments.len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments on this date"));
        }

        let appointment = Appointment {
            id: Ulid::new(),
            date,
            span: request.span,
            status: AppointmentStatus::Scheduled,
            staff_id: request.staff_id,
            label: request.label,
        };
        let event = Event::AppointmentBooked {
            id: appointment.id,
            date,
            span: appointment.span,
            staff_id: appointment.staff_id,
            label: appointment.label.clone(),
        };
        if let Err(e) = self.persist_day(&mut book, &event).await {
            drop(book);
            self.release_if_empty(date, &book_arc);
            return Err(e);
        }
        drop(book);
        drop(schedule);

        metrics::counter!(BOOKINGS_TOTAL, "outcome" => "booked").increment(1);
        info!("appointment {} booked on {date} {}", appointment.id, appointment.span);
        Ok(BookingOutcome::Booked(appointment))
    }

    /// Move an appointment forward in its lifecycle. Final statuses
    /// (completed, cancelled, no-show) never change again, so a released
    /// interval can only be reused through `book_slot`.
    pub async fn update_appointment_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let date = self.appointment_date(&id).ok_or(EngineError::NotFound(id))?;
        let _schedule = self.schedule.read().await;
        let book_arc = self.day_book(date);
        let mut book = book_arc.write().await;
        let current = book
            .appointments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        if current.status == status {
            return Ok(current);
        }
        if current.status.is_final() {
            return Err(EngineError::InvalidRequest(format!(
                "appointment {id} is already {}",
                current.status
            )));
        }
        if status == AppointmentStatus::Scheduled {
            return Err(EngineError::InvalidRequest(format!(
                "appointment {id} cannot return to scheduled"
            )));
        }

        let event = Event::AppointmentStatusChanged { id, date, status };
        self.persist_day(&mut book, &event).await?;
        info!("appointment {id} on {date}: {} -> {status}", current.status);
        Ok(Appointment { status, ..current })
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Every writer holds the schedule lock until its append is flushed, so
        // the write lock guarantees nothing lands between snapshot and swap.
        let schedule = self.schedule.write().await;
        let mut events = Vec::new();

        for day in DayOfWeek::ALL {
            if let Some(span) = schedule.business_hours[day.index()] {
                events.push(Event::BusinessHoursSet { day, span: Some(span) });
            }
        }
        for (staff_id, week) in &schedule.working_hours {
            for day in DayOfWeek::ALL {
                let spans = &week[day.index()];
                if !spans.is_empty() {
                    events.push(Event::WorkingHoursSet {
                        staff_id: *staff_id,
                        day,
                        spans: spans.clone(),
                    });
                }
            }
        }
        for b in &schedule.breaks {
            events.push(Event::BreakAdded {
                id: b.id,
                day: b.day,
                span: b.span,
                staff_id: b.staff_id,
                name: b.name.clone(),
            });
        }
        for c in &schedule.closures {
            events.push(Event::ClosureAdded {
                id: c.id,
                date: c.date,
                span: match c.kind {
                    ClosureKind::FullDay => None,
                    ClosureKind::Partial(span) => Some(span),
                },
                reason: c.reason.clone(),
            });
        }

        let mut books: Vec<_> = self
            .days
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        books.sort_by_key(|(date, _)| *date);
        for (_, book) in books {
            let guard = book.read().await;
            for a in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    id: a.id,
                    date: a.date,
                    span: a.span,
                    staff_id: a.staff_id,
                    label: a.label.clone(),
                });
                if a.status != AppointmentStatus::Scheduled {
                    events.push(Event::AppointmentStatusChanged {
                        id: a.id,
                        date: a.date,
                        status: a.status,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
