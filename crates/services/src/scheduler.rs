//! Periodic alarms keyed by monitor id.
//!
//! Alarm ids are monitor ids, one alarm per id. Scheduling an id that already
//! has an alarm replaces it, so an id never fires twice per period.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

pub trait AlarmScheduler: Send + Sync {
    /// Installs (or replaces) the alarm for `id`, firing every `period_minutes`.
    fn schedule(&self, id: &str, period_minutes: u32);
    /// Removes the alarm for `id`; returns whether one existed.
    fn cancel(&self, id: &str) -> bool;
    fn is_scheduled(&self, id: &str) -> bool;
    fn scheduled_ids(&self) -> Vec<String>;
}

/// Alarms as tokio interval tasks. Firings are delivered as ids on a channel.
pub struct TokioAlarmScheduler {
    alarms: Mutex<HashMap<String, JoinHandle<()>>>,
    fired: mpsc::UnboundedSender<String>,
    minute: Duration,
}

impl TokioAlarmScheduler {
    /// Returns the scheduler and the receiver its firings arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        Self::with_minute(Duration::from_secs(60))
    }

    /// Like [`new`](Self::new) with a custom length for one "minute".
    pub fn with_minute(minute: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            alarms: Mutex::new(HashMap::new()),
            fired,
            minute,
        };
        (scheduler, rx)
    }
}

impl AlarmScheduler for TokioAlarmScheduler {
    fn schedule(&self, id: &str, period_minutes: u32) {
        let period = self.minute * period_minutes.max(1);
        let fired = self.fired.clone();
        let alarm_id = id.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if fired.send(alarm_id.clone()).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.alarms.lock().insert(id.to_string(), task) {
            previous.abort();
        }
        debug!(alarm = id, period_minutes, "Alarm scheduled");
    }

    fn cancel(&self, id: &str) -> bool {
        match self.alarms.lock().remove(id) {
            Some(task) => {
                task.abort();
                debug!(alarm = id, "Alarm cleared");
                true
            }
            None => false,
        }
    }

    fn is_scheduled(&self, id: &str) -> bool {
        self.alarms.lock().contains_key(id)
    }

    fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.alarms.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for TokioAlarmScheduler {
    fn drop(&mut self) {
        for (_, task) in self.alarms.lock().drain() {
            task.abort();
        }
    }
}
