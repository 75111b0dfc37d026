//! Timezone-safe booking slots for appointment-based businesses.
//!
//! Each business is an [`engine::Engine`]: a weekly schedule plus per-date
//! appointment books, rebuilt from its write-ahead log on open.

pub mod business;
pub mod compactor;
pub mod config;
pub mod day;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;

pub use business::BusinessManager;
pub use config::Config;
pub use engine::{Engine, EngineError, EngineResult};
