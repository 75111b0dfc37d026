use ulid::Ulid;

use crate::model::Min;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidDate(String),
    InvalidTimezone(String),
    InvalidTime(String),
    InvalidInterval { start: Min, end: Min },
    InvalidDuration { field: &'static str, value: Min },
    InvalidRequest(String),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDate(s) => write!(f, "invalid date: {s:?} (expected YYYY-MM-DD)"),
            EngineError::InvalidTimezone(s) => write!(f, "unknown timezone: {s:?}"),
            EngineError::InvalidTime(s) => write!(f, "invalid time of day: {s:?}"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval: start {start} must be before end {end} within one day")
            }
            EngineError::InvalidDuration { field, value } => {
                write!(f, "{field} must be positive, got {value}")
            }
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
