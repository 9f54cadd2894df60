//! Offscreen fetch worker.
//!
//! A lazily-started background task that fetches pages and pulls one element
//! out by CSS selector. The worker lives in an explicit state holder:
//! `Uninitialized -> Creating -> Ready`, falling back to `Uninitialized` when
//! creation fails or the worker goes away. Concurrent callers of
//! [`OffscreenWorker::ensure_ready`] share a single creation attempt.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::Client;
use scraper::{Html, Selector};
use shared::monitor::CheckType;
use shared::CoreError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const JOB_QUEUE_DEPTH: usize = 32;

/// Something that can return the current content of `selector` on `url`.
#[async_trait]
pub trait ElementFetcher: Send + Sync {
    /// `Ok(None)` when nothing matches the selector; network and parse
    /// failures are errors.
    async fn fetch_element(
        &self,
        url: &str,
        selector: &str,
        check_type: CheckType,
    ) -> Result<Option<String>, CoreError>;
}

struct FetchJob {
    url: String,
    selector: String,
    check_type: CheckType,
    reply: oneshot::Sender<Result<Option<String>, CoreError>>,
}

/// Connection to a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    jobs: mpsc::Sender<FetchJob>,
}

impl std::fmt::Debug for FetchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchJob")
            .field("url", &self.url)
            .field("selector", &self.selector)
            .finish()
    }
}

impl WorkerHandle {
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }

    async fn fetch(
        &self,
        url: &str,
        selector: &str,
        check_type: CheckType,
    ) -> Result<Option<String>, CoreError> {
        let (reply, rx) = oneshot::channel();
        let job = FetchJob {
            url: url.to_string(),
            selector: selector.to_string(),
            check_type,
            reply,
        };
        self.jobs
            .send(job)
            .await
            .map_err(|_| CoreError::Worker("worker stopped accepting jobs".into()))?;
        rx.await
            .map_err(|_| CoreError::Worker("worker dropped the request".into()))?
    }
}

/// Creates worker instances. Swappable so tests can count creations.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self) -> Result<WorkerHandle, CoreError>;
}

/// Spawns a tokio task that serves fetch jobs over HTTP.
#[derive(Debug, Clone)]
pub struct HttpWorkerSpawner {
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for HttpWorkerSpawner {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; YourAICopilot/1.0)".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl WorkerSpawner for HttpWorkerSpawner {
    async fn spawn(&self) -> Result<WorkerHandle, CoreError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| CoreError::Worker(format!("failed to build HTTP client: {}", e)))?;

        let (jobs, rx) = mpsc::channel(JOB_QUEUE_DEPTH);
        tokio::spawn(serve_jobs(client, rx));
        info!("Offscreen fetch worker started");
        Ok(WorkerHandle { jobs })
    }
}

async fn serve_jobs(client: Client, mut rx: mpsc::Receiver<FetchJob>) {
    while let Some(job) = rx.recv().await {
        let client = client.clone();
        // One slow page must not hold up the others
        tokio::spawn(async move {
            let result = fetch_and_extract(&client, &job.url, &job.selector, job.check_type).await;
            if let Err(e) = &result {
                warn!(url = %job.url, selector = %job.selector, "Offscreen fetch failed: {}", e);
            }
            let _ = job.reply.send(result);
        });
    }
    debug!("Offscreen fetch worker stopped");
}

async fn fetch_and_extract(
    client: &Client,
    url: &str,
    selector: &str,
    check_type: CheckType,
) -> Result<Option<String>, CoreError> {
    debug!(url, selector, "Fetching page element");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| CoreError::Fetch(format!("Failed to fetch {}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CoreError::Fetch(format!("Failed to fetch {}: {}", url, status)));
    }

    let html = response
        .text()
        .await
        .map_err(|e| CoreError::Fetch(format!("Failed to read {}: {}", url, e)))?;

    let value = extract_element(&html, selector, check_type)?;
    if value.is_none() {
        warn!(url, selector, "Element not found");
    }
    Ok(value)
}

/// First element matching `selector`: trimmed text, or inner markup for `Html`.
pub fn extract_element(
    html: &str,
    selector: &str,
    check_type: CheckType,
) -> Result<Option<String>, CoreError> {
    let parsed = Selector::parse(selector)
        .map_err(|e| CoreError::Fetch(format!("Invalid selector '{}': {}", selector, e)))?;
    let document = Html::parse_document(html);

    Ok(document.select(&parsed).next().map(|element| match check_type {
        CheckType::Text => element.text().collect::<String>().trim().to_string(),
        CheckType::Html => element.inner_html(),
    }))
}

type Creation = Shared<BoxFuture<'static, Result<WorkerHandle, CoreError>>>;

enum WorkerState {
    Uninitialized,
    Creating { attempt: u64, creation: Creation },
    Ready(WorkerHandle),
}

/// Process-wide owner of the fetch worker.
pub struct OffscreenWorker {
    spawner: Arc<dyn WorkerSpawner>,
    state: Mutex<WorkerState>,
    attempts: AtomicU64,
}

impl OffscreenWorker {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            spawner,
            state: Mutex::new(WorkerState::Uninitialized),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn with_http() -> Self {
        Self::new(Arc::new(HttpWorkerSpawner::default()))
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.lock(), WorkerState::Ready(handle) if !handle.is_closed())
    }

    /// Returns the running worker, creating it if needed.
    ///
    /// At most one creation is in flight; callers arriving meanwhile await
    /// the same attempt. A failed attempt clears the in-flight marker.
    pub async fn ensure_ready(&self) -> Result<WorkerHandle, CoreError> {
        let (attempt, creation) = {
            let mut state = self.state.lock();
            match &*state {
                WorkerState::Ready(handle) if !handle.is_closed() => return Ok(handle.clone()),
                WorkerState::Creating { attempt, creation } => (*attempt, creation.clone()),
                WorkerState::Ready(_) | WorkerState::Uninitialized => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let spawner = self.spawner.clone();
                    let creation = async move { spawner.spawn().await }.boxed().shared();
                    *state = WorkerState::Creating {
                        attempt,
                        creation: creation.clone(),
                    };
                    debug!(attempt, "Creating offscreen fetch worker");
                    (attempt, creation)
                }
            }
        };

        let result = creation.await;

        let mut state = self.state.lock();
        let still_current =
            matches!(&*state, WorkerState::Creating { attempt: current, .. } if *current == attempt);
        if still_current {
            *state = match &result {
                Ok(handle) => WorkerState::Ready(handle.clone()),
                Err(e) => {
                    warn!(attempt, "Failed to create offscreen fetch worker: {}", e);
                    WorkerState::Uninitialized
                }
            };
        }

        result.map_err(|e| match e {
            CoreError::Worker(_) => e,
            other => CoreError::Worker(other.to_string()),
        })
    }

    fn reset_if_closed(&self) {
        let mut state = self.state.lock();
        if matches!(&*state, WorkerState::Ready(handle) if handle.is_closed()) {
            *state = WorkerState::Uninitialized;
        }
    }
}

#[async_trait]
impl ElementFetcher for OffscreenWorker {
    async fn fetch_element(
        &self,
        url: &str,
        selector: &str,
        check_type: CheckType,
    ) -> Result<Option<String>, CoreError> {
        if url.trim().is_empty() || selector.trim().is_empty() {
            return Err(CoreError::validation(
                "URL and selector are required for fetchPageElement.",
            ));
        }

        let handle = self.ensure_ready().await?;
        let result = handle.fetch(url, selector, check_type).await;
        if matches!(result, Err(CoreError::Worker(_))) {
            self.reset_if_closed();
        }
        result
    }
}
