//! Background services: persistence, settings, the offscreen fetch worker,
//! alarm scheduling, change notifications, and the page monitor engine.

pub mod monitor;
pub mod notifier;
pub mod offscreen;
pub mod scheduler;
pub mod settings_store;
pub mod store;

pub use monitor::MonitorEngine;
pub use notifier::{ChangeNotifier, NotificationDispatcher};
pub use offscreen::{ElementFetcher, OffscreenWorker};
pub use scheduler::{AlarmScheduler, TokioAlarmScheduler};
pub use settings_store::SettingsStore;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
