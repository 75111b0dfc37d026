mod constraints;
mod error;
mod guard;
mod mutations;
mod queries;
mod slots;

pub use constraints::{aggregate, BookedSpan, ConstraintSet, ScheduleSource, Snapshot};
pub use error::EngineError;
pub use slots::{generate, merge_overlapping, open_ranges, subtract_intervals};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::limits::DEFAULT_BOOKING_TIMEOUT;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type EngineResult<T> = Result<T, EngineError>;

pub type SharedDayBook = Arc<RwLock<DayBook>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Single flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch.
    let result = match (append_err, wal.flush_sync().err()) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    };
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::warn!("WAL flush failed for batch of {}: {e}", batch.len());
    }

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One business: its weekly schedule, closures, and per-date appointment books.
pub struct Engine {
    pub schedule: RwLock<Schedule>,
    pub days: DashMap<CalendarDate, SharedDayBook>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: appointment id → calendar date of its day book.
    pub(super) appointment_dates: DashMap<Ulid, CalendarDate>,
    pub(super) booking_timeout: Duration,
}

/// Apply a schedule event. Caller holds the schedule write lock.
fn apply_to_schedule(schedule: &mut Schedule, event: &Event) {
    match event {
        Event::BusinessHoursSet { day, span } => {
            schedule.business_hours[day.index()] = *span;
        }
        Event::WorkingHoursSet { staff_id, day, spans } => {
            let week = schedule.working_hours.entry(*staff_id).or_default();
            week[day.index()] = spans.clone();
            if week.iter().all(Vec::is_empty) {
                schedule.working_hours.remove(staff_id);
            }
        }
        Event::BreakAdded {
            id,
            day,
            span,
            staff_id,
            name,
        } => schedule.breaks.push(Break {
            id: *id,
            day: *day,
            span: *span,
            staff_id: *staff_id,
            name: name.clone(),
        }),
        Event::BreakRemoved { id } => schedule.breaks.retain(|b| b.id != *id),
        Event::ClosureAdded {
            id,
            date,
            span,
            reason,
        } => schedule.closures.push(ShopClosure {
            id: *id,
            date: *date,
            kind: span.map_or(ClosureKind::FullDay, ClosureKind::Partial),
            reason: reason.clone(),
        }),
        Event::ClosureRemoved { id, .. } => schedule.closures.retain(|c| c.id != *id),
        Event::AppointmentBooked { .. } | Event::AppointmentStatusChanged { .. } => {}
    }
}

/// Apply an appointment event. Caller holds the day's write lock.
fn apply_to_day(book: &mut DayBook, event: &Event, index: &DashMap<Ulid, CalendarDate>) {
    match event {
        Event::AppointmentBooked {
            id,
            date,
            span,
            staff_id,
            label,
        } => {
            book.insert_appointment(Appointment {
                id: *id,
                date: *date,
                span: *span,
                status: AppointmentStatus::Scheduled,
                staff_id: *staff_id,
                label: label.clone(),
            });
            index.insert(*id, *date);
        }
        Event::AppointmentStatusChanged { id, status, .. } => {
            if let Some(appointment) = book.get_mut(*id) {
                appointment.status = *status;
            }
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut schedule = Schedule::default();
        let mut books: HashMap<CalendarDate, DayBook> = HashMap::new();
        let appointment_dates = DashMap::new();

        for event in &events {
            match event.date() {
                Some(date) if event.is_appointment() => {
                    let book = books.entry(date).or_insert_with(|| DayBook::new(date));
                    apply_to_day(book, event, &appointment_dates);
                }
                _ => apply_to_schedule(&mut schedule, event),
            }
        }
        let days: DashMap<CalendarDate, SharedDayBook> = books
            .into_iter()
            .map(|(date, book)| (date, Arc::new(RwLock::new(book))))
            .collect();

        tracing::debug!(
            "replayed {} events from {} ({} day books)",
            events.len(),
            wal_path.display(),
            days.len()
        );

        Ok(Self {
            schedule: RwLock::new(schedule),
            days,
            wal_tx,
            notify,
            appointment_dates,
            booking_timeout: DEFAULT_BOOKING_TIMEOUT,
        })
    }

    /// Upper bound on waiting for the booking section (locks included).
    pub fn with_booking_timeout(mut self, timeout: Duration) -> Self {
        self.booking_timeout = timeout;
        self
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Get or create the appointment book of a date.
    pub fn day_book(&self, date: CalendarDate) -> SharedDayBook {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayBook::new(date))))
            .clone()
    }

    /// Forget a date's book again when a refused booking created it. Only
    /// removed while still empty and not shared beyond the map and `book`;
    /// the shard lock held by `remove_if` keeps new clones out meanwhile.
    pub(super) fn release_if_empty(&self, date: CalendarDate, book: &SharedDayBook) {
        self.days.remove_if(&date, |_, current| {
            Arc::ptr_eq(current, book)
                && Arc::strong_count(current) == 2
                && current.try_read().is_ok_and(|b| b.appointments.is_empty())
        });
    }

    pub fn appointment_date(&self, id: &Ulid) -> Option<CalendarDate> {
        self.appointment_dates.get(id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify for weekly schedule and closure changes.
    pub(super) async fn persist_schedule(
        &self,
        schedule: &mut Schedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_schedule(schedule, event);
        match event.date() {
            Some(date) => self.notify.send(date, event),
            None => self.notify.send_all(event),
        }
        Ok(())
    }

    /// WAL-append + apply + notify for appointment changes.
    pub(super) async fn persist_day(&self, book: &mut DayBook, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(book, event, &self.appointment_dates);
        self.notify.send(book.date, event);
        Ok(())
    }
}
