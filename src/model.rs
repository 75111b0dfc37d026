use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};
use ulid::Ulid;

use crate::engine::EngineError;

/// Minutes since local midnight. The only time-of-day type.
pub type Min = i32;

pub const MINUTES_PER_DAY: Min = 24 * 60;

// ── Time primitives ──────────────────────────────────────────────

/// Half-open interval `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Min,
    pub end: Min,
}

impl Span {
    pub fn new(start: Min, end: Min) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for spans coming from stored rows or callers.
    pub fn try_new(start: Min, end: Min) -> Result<Self, EngineError> {
        if start < 0 || end > MINUTES_PER_DAY || start >= end {
            return Err(EngineError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse a pair of `HH:MM[:SS]` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, EngineError> {
        let start: TimeOfDay = start.parse()?;
        let end: TimeOfDay = end.parse()?;
        Self::try_new(start.minutes(), end.minutes())
    }

    /// Fails on a span that could not have come out of `try_new`.
    pub fn validate(&self) -> Result<(), EngineError> {
        Self::try_new(self.start, self.end).map(|_| ())
    }

    pub fn duration(&self) -> Min {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_minute(&self, t: Min) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn start_time(&self) -> TimeOfDay {
        TimeOfDay(self.start)
    }

    pub fn end_time(&self) -> TimeOfDay {
        TimeOfDay(self.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_time(), self.end_time())
    }
}

/// Wall-clock time of day, `00:00:00` through `24:00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(Min);

impl TimeOfDay {
    pub fn from_minutes(minutes: Min) -> Result<Self, EngineError> {
        if !(0..=MINUTES_PER_DAY).contains(&minutes) {
            return Err(EngineError::InvalidTime(minutes.to_string()));
        }
        Ok(Self(minutes))
    }

    pub fn hm(hour: Min, minute: Min) -> Result<Self, EngineError> {
        if !(0..60).contains(&minute) {
            return Err(EngineError::InvalidTime(format!("{hour}:{minute}")));
        }
        Self::from_minutes(hour * 60 + minute)
    }

    pub fn minutes(self) -> Min {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidTime(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(invalid());
        }
        let mut fields = [0 as Min; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }
        let [hour, minute, second] = fields;
        if minute >= 60 || second >= 60 || hour > 24 || (hour == 24 && (minute, second) != (0, 0)) {
            return Err(invalid());
        }
        // Seconds are accepted but never affect comparisons.
        Ok(Self(hour * 60 + minute))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:00", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Canonical weekday. Persisted as-is; the numeric form (Sunday = 0) exists only
/// for interop through `index` / `from_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub(crate) fn from_chrono(weekday: chrono::Weekday) -> Self {
        Self::ALL[weekday.num_days_from_sunday() as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "sunday",
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayOfWeek {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == wanted)
            .ok_or_else(|| EngineError::InvalidRequest(format!("unknown day of week: {s}")))
    }
}

/// A year-month-day with no time-of-day and no timezone attached.
///
/// Deliberately has no weekday accessor: the weekday of a business date is
/// only ever derived by `day::resolve_day_of_week`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, EngineError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| EngineError::InvalidDate(format!("{year:04}-{month:02}-{day:02}")))
    }

    pub fn naive(self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl FromStr for CalendarDate {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != 10 {
            return Err(EngineError::InvalidDate(s.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Self)
            .map_err(|_| EngineError::InvalidDate(s.to_string()))
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

// ── Schedule rows ────────────────────────────────────────────────

/// A recurring weekly break. `staff_id = None` is a shop-wide (admin) break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Break {
    pub id: Ulid,
    pub day: DayOfWeek,
    pub span: Span,
    pub staff_id: Option<Ulid>,
    pub name: Option<String>,
}

impl Break {
    pub fn is_admin(&self) -> bool {
        self.staff_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureKind {
    FullDay,
    Partial(Span),
}

/// A one-off, date-specific closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopClosure {
    pub id: Ulid,
    pub date: CalendarDate,
    pub kind: ClosureKind,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialClosure {
    pub span: Span,
    pub reason: Option<String>,
}

/// Closure state of one calendar date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureDay {
    pub full_day: bool,
    pub reason: Option<String>,
    pub partial: Vec<PartialClosure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Cancelled and no-show appointments release their interval.
    pub fn blocks_availability(self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }

    /// No transition leaves a final status.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" | "canceled" => Ok(AppointmentStatus::Cancelled),
            "no-show" | "noshow" => Ok(AppointmentStatus::NoShow),
            _ => Err(EngineError::InvalidRequest(format!("unknown appointment status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub date: CalendarDate,
    pub span: Span,
    pub status: AppointmentStatus,
    pub staff_id: Option<Ulid>,
    pub label: Option<String>,
}

impl Appointment {
    pub fn blocks(&self) -> bool {
        self.status.blocks_availability()
    }
}

/// Which staff constraint applies to a slot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaffFilter {
    /// Shop-level booking: business hours alone bound the day.
    Shop,
    /// One concrete staff member.
    Staff(Ulid),
    /// Bookable by whichever staff member is working.
    AnyStaff,
}

impl StaffFilter {
    pub fn staff_id(self) -> Option<Ulid> {
        match self {
            StaffFilter::Staff(id) => Some(id),
            StaffFilter::Shop | StaffFilter::AnyStaff => None,
        }
    }
}

impl From<Option<Ulid>> for StaffFilter {
    fn from(staff_id: Option<Ulid>) -> Self {
        staff_id.map_or(StaffFilter::Shop, StaffFilter::Staff)
    }
}

// ── Business state ───────────────────────────────────────────────

/// Recurring and date-specific configuration of one business.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Indexed by `DayOfWeek::index`.
    pub business_hours: [Option<Span>; 7],
    pub working_hours: BTreeMap<Ulid, [Vec<Span>; 7]>,
    pub breaks: Vec<Break>,
    pub closures: Vec<ShopClosure>,
}

impl Schedule {
    pub fn find_break(&self, id: Ulid) -> Option<&Break> {
        self.breaks.iter().find(|b| b.id == id)
    }

    pub fn find_closure(&self, id: Ulid) -> Option<&ShopClosure> {
        self.closures.iter().find(|c| c.id == id)
    }
}

/// All appointments of one calendar date, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct DayBook {
    pub date: CalendarDate,
    pub appointments: Vec<Appointment>,
}

impl DayBook {
    pub fn new(date: CalendarDate) -> Self {
        Self {
            date,
            appointments: Vec::new(),
        }
    }

    /// Insert appointment maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.span.start <= appointment.span.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessHoursSet {
        day: DayOfWeek,
        span: Option<Span>,
    },
    WorkingHoursSet {
        staff_id: Ulid,
        day: DayOfWeek,
        spans: Vec<Span>,
    },
    BreakAdded {
        id: Ulid,
        day: DayOfWeek,
        span: Span,
        staff_id: Option<Ulid>,
        name: Option<String>,
    },
    BreakRemoved {
        id: Ulid,
    },
    ClosureAdded {
        id: Ulid,
        date: CalendarDate,
        span: Option<Span>,
        reason: Option<String>,
    },
    ClosureRemoved {
        id: Ulid,
        date: CalendarDate,
    },
    AppointmentBooked {
        id: Ulid,
        date: CalendarDate,
        span: Span,
        staff_id: Option<Ulid>,
        label: Option<String>,
    },
    AppointmentStatusChanged {
        id: Ulid,
        date: CalendarDate,
        status: AppointmentStatus,
    },
}

impl Event {
    /// The calendar date an event is tied to, if any. Weekly schedule
    /// changes affect every date.
    pub fn date(&self) -> Option<CalendarDate> {
        match self {
            Event::ClosureAdded { date, .. }
            | Event::ClosureRemoved { date, .. }
            | Event::AppointmentBooked { date, .. }
            | Event::AppointmentStatusChanged { date, .. } => Some(*date),
            Event::BusinessHoursSet { .. }
            | Event::WorkingHoursSet { .. }
            | Event::BreakAdded { .. }
            | Event::BreakRemoved { .. } => None,
        }
    }

    pub fn is_appointment(&self) -> bool {
        matches!(
            self,
            Event::AppointmentBooked { .. } | Event::AppointmentStatusChanged { .. }
        )
    }
}

// ── Requests and results ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SlotQuery {
    pub date: CalendarDate,
    pub timezone: String,
    pub service_minutes: Min,
    pub step_minutes: Min,
    pub staff: StaffFilter,
}

impl SlotQuery {
    /// Shop-wide query on the default step.
    pub fn new(date: CalendarDate, timezone: impl Into<String>, service_minutes: Min) -> Self {
        Self {
            date,
            timezone: timezone.into(),
            service_minutes,
            step_minutes: crate::limits::DEFAULT_STEP_MINUTES,
            staff: StaffFilter::Shop,
        }
    }

    pub fn with_step(mut self, step_minutes: Min) -> Self {
        self.step_minutes = step_minutes;
        self
    }

    pub fn with_staff(mut self, staff: StaffFilter) -> Self {
        self.staff = staff;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub date: CalendarDate,
    pub timezone: String,
    pub span: Span,
    pub staff_id: Option<Ulid>,
    pub label: Option<String>,
}

/// Why a generated slot is not bookable. Only the first matching check is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotReason {
    PastTime,
    OutsideWorkingHours,
    Break { name: Option<String> },
    AlreadyBooked,
    ShopClosed { reason: Option<String> },
}

impl fmt::Display for SlotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotReason::PastTime => f.write_str("Past time"),
            SlotReason::OutsideWorkingHours => f.write_str("Outside staff working hours"),
            SlotReason::Break { name: Some(name) } => f.write_str(name),
            SlotReason::Break { name: None } => f.write_str("Break time"),
            SlotReason::AlreadyBooked => f.write_str("Already booked"),
            SlotReason::ShopClosed { reason: Some(reason) } => write!(f, "Shop closed: {reason}"),
            SlotReason::ShopClosed { reason: None } => f.write_str("Shop closed"),
        }
    }
}

impl Serialize for SlotReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A computed candidate interval. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub available: bool,
    pub reason: Option<SlotReason>,
}

/// A whole-day outcome that is expected, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayNotice {
    ClosedWeekday,
    ClosedDate { reason: Option<String> },
    StaffNotWorking,
    FullyBooked,
}

impl fmt::Display for DayNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayNotice::ClosedWeekday => f.write_str("The shop is closed on this day"),
            DayNotice::ClosedDate { reason: Some(reason) } => {
                write!(f, "The shop is closed on this date: {reason}")
            }
            DayNotice::ClosedDate { reason: None } => f.write_str("The shop is closed on this date"),
            DayNotice::StaffNotWorking => f.write_str("This staff member is not working on this day"),
            DayNotice::FullyBooked => f.write_str("No available slots on this day"),
        }
    }
}

impl Serialize for DayNotice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotListing {
    pub date: CalendarDate,
    pub day: DayOfWeek,
    pub slots: Vec<Slot>,
    pub notice: Option<DayNotice>,
}

impl SlotListing {
    pub fn available(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.available)
    }
}

/// Why a booking was refused at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    ClosedWeekday,
    ClosedDate { reason: Option<String> },
    OutsideBusinessHours,
    OutsideWorkingHours,
    PastTime,
    Break { name: Option<String> },
    AlreadyBooked { appointment_id: Ulid },
    PartialClosure { reason: Option<String> },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("slot no longer available: ")?;
        match self {
            ConflictReason::ClosedWeekday => f.write_str("shop closed on this day"),
            ConflictReason::ClosedDate { reason } => {
                write!(f, "shop closed on this date ({})", reason.as_deref().unwrap_or("closed"))
            }
            ConflictReason::OutsideBusinessHours => f.write_str("outside business hours"),
            ConflictReason::OutsideWorkingHours => f.write_str("outside staff working hours"),
            ConflictReason::PastTime => f.write_str("past time"),
            ConflictReason::Break { name } => write!(f, "break ({})", name.as_deref().unwrap_or("break time")),
            ConflictReason::AlreadyBooked { appointment_id } => {
                write!(f, "already booked by {appointment_id}")
            }
            ConflictReason::PartialClosure { reason } => {
                write!(f, "shop closed ({})", reason.as_deref().unwrap_or("closed"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Booked(Appointment),
    Conflict(ConflictReason),
}

impl BookingOutcome {
    pub fn is_booked(&self) -> bool {
        matches!(self, BookingOutcome::Booked(_))
    }
}
