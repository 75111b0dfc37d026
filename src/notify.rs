use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{CalendarDate, Event};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub: one channel per calendar date, so a client showing a day's
/// slots can refresh when that day changes.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<CalendarDate, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes affecting `date`. Creates the channel if needed.
    pub fn subscribe(&self, date: CalendarDate) -> broadcast::Receiver<Event> {
        self.channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a notification for one date. No-op if nobody is listening.
    pub fn send(&self, date: CalendarDate, event: &Event) {
        if let Some(sender) = self.channels.get(&date) {
            let _ = sender.send(event.clone());
        }
    }

    /// Weekly schedule changes touch every date with listeners.
    pub fn send_all(&self, event: &Event) {
        for sender in self.channels.iter() {
            let _ = sender.value().send(event.clone());
        }
    }

    /// Drop channels nobody listens to anymore.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before - self.channels.len()
    }
}
