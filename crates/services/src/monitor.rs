//! Page monitor engine.
//!
//! Each monitor cycles `Scheduled -> Checking -> {Unchanged|Changed|Failed} ->
//! Scheduled`, driven by alarms whose ids are the monitor ids. A live monitor
//! has exactly one stored record, one index entry and one alarm.
//!
//! Storage layout:
//! - `pageMonitor_<id>`: the [`Monitor`] record
//! - `allPageMonitors`: JSON array of live ids

use chrono::Utc;
use parking_lot::Mutex;
use shared::monitor::{
    CheckType, Monitor, MonitorCheckResult, MonitorConfig, NotificationType,
    DEFAULT_FREQUENCY_MINUTES,
};
use shared::CoreError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::notifier::ChangeNotifier;
use crate::offscreen::ElementFetcher;
use crate::scheduler::AlarmScheduler;
use crate::store::{load, save, KeyValueStore};

pub const MONITOR_KEY_PREFIX: &str = "pageMonitor_";
pub const MONITOR_INDEX_KEY: &str = "allPageMonitors";

pub fn monitor_key(id: &str) -> String {
    format!("{}{}", MONITOR_KEY_PREFIX, id)
}

/// Removes the id from the in-flight set when the check ends, however it ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

pub struct MonitorEngine {
    store: Arc<dyn KeyValueStore>,
    scheduler: Arc<dyn AlarmScheduler>,
    fetcher: Arc<dyn ElementFetcher>,
    notifier: Arc<dyn ChangeNotifier>,
    in_flight: Mutex<HashSet<String>>,
    /// Serializes index edits and record writes against deletes
    records: tokio::sync::Mutex<()>,
}

impl MonitorEngine {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn AlarmScheduler>,
        fetcher: Arc<dyn ElementFetcher>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            store,
            scheduler,
            fetcher,
            notifier,
            in_flight: Mutex::new(HashSet::new()),
            records: tokio::sync::Mutex::new(()),
        }
    }

    async fn index(&self) -> Result<Vec<String>, CoreError> {
        Ok(load(self.store.as_ref(), MONITOR_INDEX_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save_index(&self, ids: &[String]) -> Result<(), CoreError> {
        save(self.store.as_ref(), MONITOR_INDEX_KEY, ids).await
    }

    /// Creates or replaces a monitor and (re)installs its alarm.
    pub async fn upsert(&self, config: MonitorConfig) -> Result<Monitor, CoreError> {
        let monitor = build_monitor(config)?;

        {
            let _records = self.records.lock().await;
            save(self.store.as_ref(), &monitor_key(&monitor.id), &monitor).await?;

            let mut ids = self.index().await?;
            if !ids.contains(&monitor.id) {
                ids.push(monitor.id.clone());
                self.save_index(&ids).await?;
            }
        }

        self.scheduler.schedule(&monitor.id, monitor.frequency_minutes);
        info!(
            monitor = %monitor.id,
            url = %monitor.url,
            every_minutes = monitor.frequency_minutes,
            "Monitor saved and alarm set"
        );
        Ok(monitor)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Monitor>, CoreError> {
        load(self.store.as_ref(), &monitor_key(id)).await
    }

    /// All indexed monitors; ids whose record is gone are skipped.
    pub async fn list(&self) -> Result<Vec<Monitor>, CoreError> {
        let mut monitors = Vec::new();
        for id in self.index().await? {
            if let Some(monitor) = self.get(&id).await? {
                monitors.push(monitor);
            }
        }
        Ok(monitors)
    }

    /// Runs one check for `id`.
    ///
    /// Returns `Ok(None)` when the monitor no longer exists (its alarm is
    /// cleared) or a check for the same id is already running. A fetch
    /// failure stamps `lastCheckedAt`, keeps the baseline and is returned as
    /// the error; the alarm stays in place.
    pub async fn check(&self, id: &str) -> Result<Option<MonitorCheckResult>, CoreError> {
        if !self.in_flight.lock().insert(id.to_string()) {
            debug!(monitor = id, "Check already running, skipping overlapping firing");
            return Ok(None);
        }
        let _guard = InFlight {
            set: &self.in_flight,
            id: id.to_string(),
        };

        let Some(monitor) = self.get(id).await? else {
            warn!(monitor = id, "Monitor not found for checking, clearing stray alarm");
            self.scheduler.cancel(id);
            return Ok(None);
        };

        debug!(monitor = %monitor.id, url = %monitor.url, "Checking monitor");
        let fetched = self
            .fetcher
            .fetch_element(&monitor.url, &monitor.selector, monitor.check_type)
            .await;
        let checked_at = Utc::now();

        let current = match fetched {
            Ok(current) => current,
            Err(e) => {
                warn!(monitor = %monitor.id, "Failed to fetch content for monitor: {}", e);
                self.persist_if_live(id, |record| record.last_checked_at = Some(checked_at))
                    .await?;
                return Err(e);
            }
        };

        let previous = monitor.last_known_value.clone();
        // A first observation counts as a change
        let changed = previous != current;

        let persisted = self
            .persist_if_live(id, |record| {
                record.last_checked_at = Some(checked_at);
                if changed {
                    record.last_known_value = current.clone();
                }
            })
            .await?;

        let Some(persisted) = persisted else {
            info!(monitor = id, "Monitor deleted during check, result dropped");
            return Ok(None);
        };

        if changed {
            info!(monitor = id, "Change detected");
            self.notifier
                .notify(&persisted, previous.as_deref(), current.as_deref())
                .await;
        } else {
            debug!(monitor = id, "No change detected");
        }

        Ok(Some(MonitorCheckResult {
            monitor_id: id.to_string(),
            changed,
            previous_value: previous,
            current_value: current,
            timestamp: checked_at,
        }))
    }

    /// Applies `update` to the stored record unless the monitor was deleted
    /// meanwhile. Returns the written record.
    async fn persist_if_live<F>(&self, id: &str, update: F) -> Result<Option<Monitor>, CoreError>
    where
        F: FnOnce(&mut Monitor),
    {
        let _records = self.records.lock().await;
        let Some(mut record) = self.get(id).await? else {
            return Ok(None);
        };
        update(&mut record);
        save(self.store.as_ref(), &monitor_key(id), &record).await?;
        Ok(Some(record))
    }

    /// Removes the record, then the index entry, then the alarm.
    ///
    /// The alarm goes last: a leftover alarm heals itself on its next firing,
    /// a leftover record without an alarm would not.
    pub async fn delete(&self, id: &str) -> Result<bool, CoreError> {
        if id.trim().is_empty() {
            return Err(CoreError::validation("Monitor ID is required."));
        }

        let existed = {
            let _records = self.records.lock().await;
            let key = monitor_key(id);
            let existed = self.store.get(&key).await?.is_some();
            self.store.remove(&key).await?;

            let mut ids = self.index().await?;
            let before = ids.len();
            ids.retain(|known| known != id);
            if ids.len() != before {
                self.save_index(&ids).await?;
            }
            existed
        };

        self.scheduler.cancel(id);
        info!(monitor = id, existed, "Monitor deleted");
        Ok(existed)
    }

    /// Re-installs one alarm per indexed monitor and drops index entries
    /// whose record is missing. Returns the number of alarms installed.
    pub async fn restore_schedules(&self) -> Result<usize, CoreError> {
        let _records = self.records.lock().await;
        let ids = self.index().await?;
        let mut live = Vec::with_capacity(ids.len());

        for id in ids.iter() {
            match self.get(id).await? {
                Some(monitor) => {
                    self.scheduler.schedule(&monitor.id, monitor.frequency_minutes);
                    live.push(id.clone());
                }
                None => {
                    warn!(monitor = %id, "Pruning index entry without a record");
                    self.scheduler.cancel(id);
                }
            }
        }

        if live.len() != ids.len() {
            self.save_index(&live).await?;
        }
        info!(count = live.len(), "Monitor alarms restored");
        Ok(live.len())
    }
}

/// Validates `config` and fills in defaults.
fn build_monitor(config: MonitorConfig) -> Result<Monitor, CoreError> {
    if config.id.trim().is_empty() || config.url.trim().is_empty() || config.selector.trim().is_empty() {
        return Err(CoreError::validation(
            "Monitor ID, URL, and CSS selector are required.",
        ));
    }

    validate_http_url(&config.url, "monitor URL")?;

    let frequency_minutes = config.frequency_minutes.unwrap_or(DEFAULT_FREQUENCY_MINUTES);
    if frequency_minutes == 0 {
        return Err(CoreError::validation(
            "Check frequency must be at least 1 minute.",
        ));
    }

    let webhook_url = config.webhook_url.filter(|u| !u.trim().is_empty());
    if let Some(webhook) = &webhook_url {
        validate_http_url(webhook, "webhook URL")?;
    }

    Ok(Monitor {
        id: config.id,
        url: config.url,
        selector: config.selector,
        check_type: config.check_type.unwrap_or(CheckType::Text),
        frequency_minutes,
        name: config.name,
        created_at: config.created_at.unwrap_or_else(Utc::now),
        last_checked_at: None,
        last_known_value: config.last_known_value.or(config.initial_value),
        notification_type: config.notification_type.unwrap_or(NotificationType::Basic),
        webhook_url,
    })
}

fn validate_http_url(raw: &str, what: &str) -> Result<(), CoreError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| CoreError::validation(format!("Invalid {} '{}': {}", what, raw, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CoreError::validation(format!(
            "Invalid {} '{}': unsupported scheme '{}'",
            what, raw, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeScheduler {
        alarms: Mutex<HashMap<String, u32>>,
        installs: AtomicUsize,
    }

    impl AlarmScheduler for FakeScheduler {
        fn schedule(&self, id: &str, period_minutes: u32) {
            self.installs.fetch_add(1, Ordering::SeqCst);
            self.alarms.lock().insert(id.to_string(), period_minutes);
        }

        fn cancel(&self, id: &str) -> bool {
            self.alarms.lock().remove(id).is_some()
        }

        fn is_scheduled(&self, id: &str) -> bool {
            self.alarms.lock().contains_key(id)
        }

        fn scheduled_ids(&self) -> Vec<String> {
            self.alarms.lock().keys().cloned().collect()
        }
    }

    /// Returns scripted results in order; optionally parks inside the fetch.
    #[derive(Default)]
    struct ScriptedFetcher {
        results: Mutex<VecDeque<Result<Option<String>, CoreError>>>,
        calls: AtomicUsize,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl ScriptedFetcher {
        fn returning(values: &[&str]) -> Self {
            Self {
                results: Mutex::new(values.iter().map(|v| Ok(Some(v.to_string()))).collect()),
                ..Default::default()
            }
        }

        /// Signals `entered` on fetch, then waits for `release`.
        fn gated(value: &str, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
            Self {
                results: Mutex::new(VecDeque::from([Ok(Some(value.to_string()))])),
                gate: Some((entered, release)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ElementFetcher for ScriptedFetcher {
        async fn fetch_element(
            &self,
            _url: &str,
            _selector: &str,
            _check_type: CheckType,
        ) -> Result<Option<String>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            let next = self.results.lock().pop_front();
            next.unwrap_or(Ok(None))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<(String, Option<String>, Option<String>)>>,
    }

    #[async_trait]
    impl ChangeNotifier for RecordingNotifier {
        async fn notify(&self, monitor: &Monitor, old_value: Option<&str>, new_value: Option<&str>) {
            self.events.lock().push((
                monitor.id.clone(),
                old_value.map(str::to_string),
                new_value.map(str::to_string),
            ));
        }
    }

    struct Harness {
        engine: Arc<MonitorEngine>,
        store: Arc<MemoryStore>,
        scheduler: Arc<FakeScheduler>,
        fetcher: Arc<ScriptedFetcher>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(fetcher: ScriptedFetcher) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(FakeScheduler::default());
        let fetcher = Arc::new(fetcher);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Arc::new(MonitorEngine::new(
            store.clone(),
            scheduler.clone(),
            fetcher.clone(),
            notifier.clone(),
        ));
        Harness {
            engine,
            store,
            scheduler,
            fetcher,
            notifier,
        }
    }

    fn m1() -> MonitorConfig {
        MonitorConfig::new("m1", "http://x", "#p")
    }

    #[tokio::test]
    async fn test_upsert_applies_defaults_and_schedules() {
        let h = harness(ScriptedFetcher::default());
        let monitor = h.engine.upsert(m1()).await.unwrap();

        assert_eq!(monitor.check_type, CheckType::Text);
        assert_eq!(monitor.frequency_minutes, 60);
        assert_eq!(monitor.notification_type, NotificationType::Basic);
        assert_eq!(monitor.last_known_value, None);
        assert_eq!(h.scheduler.alarms.lock().get("m1"), Some(&60));
        assert!(h.store.contains_key("pageMonitor_m1"));

        // reinstalling replaces, never duplicates
        let mut again = m1();
        again.frequency_minutes = Some(5);
        h.engine.upsert(again).await.unwrap();
        assert_eq!(h.scheduler.scheduled_ids(), vec!["m1".to_string()]);
        assert_eq!(h.scheduler.alarms.lock().get("m1"), Some(&5));

        let index: Vec<String> = load(&*h.store, MONITOR_INDEX_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(index, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_upsert_validation() {
        let h = harness(ScriptedFetcher::default());

        let missing = MonitorConfig::new("m1", "", "#p");
        assert_eq!(h.engine.upsert(missing).await.unwrap_err().kind(), "validation");

        let bad_scheme = MonitorConfig::new("m1", "ftp://x", "#p");
        assert_eq!(h.engine.upsert(bad_scheme).await.unwrap_err().kind(), "validation");

        let mut zero = m1();
        zero.frequency_minutes = Some(0);
        assert_eq!(h.engine.upsert(zero).await.unwrap_err().kind(), "validation");

        assert!(h.store.is_empty());
        assert!(h.scheduler.scheduled_ids().is_empty());
    }

    #[tokio::test]
    async fn test_initial_value_seeds_baseline() {
        let h = harness(ScriptedFetcher::returning(&["$10"]));
        let mut config = m1();
        config.initial_value = Some("$10".into());
        h.engine.upsert(config).await.unwrap();

        let result = h.engine.check("m1").await.unwrap().unwrap();
        assert!(!result.changed);
        assert!(h.notifier.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_baseline_then_unchanged_then_changed() {
        let h = harness(ScriptedFetcher::returning(&["$10", "$10", "$9"]));
        h.engine.upsert(m1()).await.unwrap();

        let first = h.engine.check("m1").await.unwrap().unwrap();
        assert!(first.changed);
        let stored = h.engine.get("m1").await.unwrap().unwrap();
        assert_eq!(stored.last_known_value.as_deref(), Some("$10"));
        assert!(stored.last_checked_at.is_some());
        assert_eq!(h.notifier.events.lock().len(), 1);

        let second = h.engine.check("m1").await.unwrap().unwrap();
        assert!(!second.changed);
        assert_eq!(h.notifier.events.lock().len(), 1);

        let third = h.engine.check("m1").await.unwrap().unwrap();
        assert!(third.changed);
        let events = h.notifier.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ("m1".to_string(), Some("$10".to_string()), Some("$9".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_baseline_and_alarm() {
        let fetcher = ScriptedFetcher::returning(&["$10"]);
        fetcher
            .results
            .lock()
            .push_back(Err(CoreError::Fetch("Failed to fetch http://x: 503".into())));
        let h = harness(fetcher);
        h.engine.upsert(m1()).await.unwrap();

        h.engine.check("m1").await.unwrap();
        let err = h.engine.check("m1").await.unwrap_err();
        assert_eq!(err.kind(), "fetch");

        let stored = h.engine.get("m1").await.unwrap().unwrap();
        assert_eq!(stored.last_known_value.as_deref(), Some("$10"));
        assert!(h.scheduler.is_scheduled("m1"));
        assert_eq!(h.notifier.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_element_is_a_change() {
        let fetcher = ScriptedFetcher::returning(&["In stock"]);
        fetcher.results.lock().push_back(Ok(None));
        let h = harness(fetcher);
        h.engine.upsert(m1()).await.unwrap();

        h.engine.check("m1").await.unwrap();
        let result = h.engine.check("m1").await.unwrap().unwrap();
        assert!(result.changed);
        assert_eq!(result.current_value, None);
        assert_eq!(h.engine.get("m1").await.unwrap().unwrap().last_known_value, None);
    }

    #[tokio::test]
    async fn test_check_of_missing_monitor_clears_alarm() {
        let h = harness(ScriptedFetcher::default());
        h.scheduler.schedule("ghost", 60);

        assert_eq!(h.engine.check("ghost").await.unwrap(), None);
        assert!(!h.scheduler.is_scheduled("ghost"));
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_late_check_after_delete() {
        let h = harness(ScriptedFetcher::returning(&["$10"]));
        h.engine.upsert(m1()).await.unwrap();

        assert!(h.engine.delete("m1").await.unwrap());
        assert_eq!(h.engine.check("m1").await.unwrap(), None);

        assert!(!h.store.contains_key("pageMonitor_m1"));
        let index: Vec<String> = load(&*h.store, MONITOR_INDEX_KEY)
            .await
            .unwrap()
            .unwrap_or_default();
        assert!(index.is_empty());
        assert!(!h.scheduler.is_scheduled("m1"));
    }

    #[tokio::test]
    async fn test_delete_during_check_does_not_resurrect() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let h = harness(ScriptedFetcher::gated("$10", entered.clone(), release.clone()));
        h.engine.upsert(m1()).await.unwrap();

        let engine = h.engine.clone();
        let check = tokio::spawn(async move { engine.check("m1").await });

        entered.notified().await;
        h.engine.delete("m1").await.unwrap();
        release.notify_one();

        let outcome = check.await.unwrap().unwrap();
        assert_eq!(outcome, None);
        assert!(!h.store.contains_key("pageMonitor_m1"));
        assert!(h.engine.list().await.unwrap().is_empty());
        assert!(h.notifier.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_checks_for_same_id_run_once() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let h = harness(ScriptedFetcher::gated("$10", entered.clone(), release.clone()));
        h.engine.upsert(m1()).await.unwrap();

        let engine = h.engine.clone();
        let first = tokio::spawn(async move { engine.check("m1").await });
        entered.notified().await;

        assert_eq!(h.engine.check("m1").await.unwrap(), None);
        release.notify_one();

        assert!(first.await.unwrap().unwrap().unwrap().changed);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_prunes_stale_ids() {
        let h = harness(ScriptedFetcher::default());
        h.engine.upsert(m1()).await.unwrap();
        h.engine
            .upsert(MonitorConfig::new("m2", "https://y.test", ".price"))
            .await
            .unwrap();
        h.store.remove("pageMonitor_m2").await.unwrap();

        let scheduler = Arc::new(FakeScheduler::default());
        let restored = MonitorEngine::new(
            h.store.clone(),
            scheduler.clone(),
            h.fetcher.clone(),
            h.notifier.clone(),
        );
        assert_eq!(restored.restore_schedules().await.unwrap(), 1);
        assert_eq!(scheduler.scheduled_ids(), vec!["m1".to_string()]);

        let ids: Vec<String> = restored.list().await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1".to_string()]);
        let index: Vec<String> = load(&*h.store, MONITOR_INDEX_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(index, vec!["m1".to_string()]);
    }
}
