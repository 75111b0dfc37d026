use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::compactor;
use crate::config::Config;
use crate::engine::Engine;
use crate::limits::MAX_BUSINESS_NAME_LEN;
use crate::model::{CalendarDate, Min, SlotQuery};
use crate::notify::NotifyHub;

/// Per-business engines. Each business gets its own Engine, WAL file and
/// compactor task, opened on first use.
pub struct BusinessManager {
    engines: DashMap<String, Arc<Engine>>,
    config: Config,
}

impl BusinessManager {
    pub fn new(config: Config) -> Self {
        Self {
            engines: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shop-wide slot query using the configured default step.
    pub fn slot_query(&self, date: CalendarDate, timezone: &str, service_minutes: Min) -> SlotQuery {
        SlotQuery::new(date, timezone, service_minutes).with_step(self.config.default_step_minutes)
    }

    /// Get or lazily open the engine of a business.
    pub fn get_or_create(&self, business: &str) -> std::io::Result<Arc<Engine>> {
        if business.len() > MAX_BUSINESS_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "business name too long",
            ));
        }
        // Names become file names; the sanitized form is the key
        let safe_name: String = business
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty business name",
            ));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= self.config.max_businesses {
            return Err(std::io::Error::other("too many businesses"));
        }

        std::fs::create_dir_all(&self.config.data_dir)?;
        let wal_path = self.config.data_dir.join(format!("{safe_name}.wal"));
        let engine = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let notify = Arc::new(NotifyHub::new());
                let engine = Arc::new(
                    Engine::new(wal_path, notify)?.with_booking_timeout(self.config.booking_timeout),
                );
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.config.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });
        metrics::gauge!(crate::observability::BUSINESSES_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("opened business {business}");
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
