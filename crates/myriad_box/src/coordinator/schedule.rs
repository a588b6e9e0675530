use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::provider::FetchContext;
use crate::provider::FetchError;
use crate::provider::FieldValues;
use crate::provider::Payload;
use crate::provider::Provider;
use super::Shared;

/// Everything one provider's refresh loop needs.
#[derive(Clone)]
pub(super) struct Job {
    pub provider: Arc<dyn Provider>,
    pub fields: Arc<FieldValues>,
    pub interval: Duration,
    pub timeout: Duration,
    /// Results are recorded only while this matches the provider's live epoch.
    pub epoch: u64,
}

/// Handle to one provider's refresh task.
pub(super) struct Schedule {
    cancel: watch::Sender<bool>,
    refresh: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Schedule {
    /// Start a refresh loop for `job`.
    ///
    /// If `predecessor` is given, the new loop waits for it to finish before
    /// doing anything, so two fetches for the same provider never overlap.
    pub fn spawn(
        shared: Arc<Shared>,
        job: Job,
        predecessor: Option<JoinHandle<()>>,
        fetch_now: bool,
    ) -> Self {
        let (cancel, cancel_rx) = watch::channel(false);
        let refresh = Arc::new(Notify::new());
        let handle = tokio::spawn(run(
            shared,
            job,
            cancel_rx,
            refresh.clone(),
            predecessor,
            fetch_now,
        ));

        Self {
            cancel,
            refresh,
            handle,
        }
    }

    /// Ask for an out-of-band fetch. Coalesces with one already pending.
    pub fn trigger(&self) {
        self.refresh.notify_one();
    }

    /// Stop ticking and hand back the task so the caller can await it.
    ///
    /// A fetch already in flight runs to completion.
    pub fn cancel(self) -> JoinHandle<()> {
        self.cancel.send_replace(true);
        self.handle
    }
}

async fn run(
    shared: Arc<Shared>,
    job: Job,
    mut cancel_rx: watch::Receiver<bool>,
    refresh: Arc<Notify>,
    predecessor: Option<JoinHandle<()>>,
    fetch_now: bool,
) {
    let id = job.provider.id();

    if let Some(previous) = predecessor {
        if let Err(e) = previous.await {
            warn!("[{}] Previous schedule ended abnormally: {}", id, e);
        }
    }

    if *cancel_rx.borrow() {
        return;
    }

    if fetch_now {
        refresh_once(&shared, &job).await;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + job.interval, job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The fetch below is never raced against cancellation, so a cancelled
        // schedule always lets its last fetch settle.
        tokio::select! {
            biased;
            _ = cancel_rx.changed() => break,
            _ = ticker.tick() => {
                debug!("[{}] Scheduled refresh", id);
            }
            _ = refresh.notified() => {
                debug!("[{}] Requested refresh", id);
                ticker.reset();
            }
        }

        refresh_once(&shared, &job).await;
    }

    debug!("[{}] Schedule stopped", id);
}

/// Fetch once and record the outcome.
pub(super) async fn refresh_once(shared: &Shared, job: &Job) {
    let result = fetch_with_retry(shared, job).await;
    shared.record(job.provider.id(), job.epoch, result);
}

async fn fetch_with_retry(shared: &Shared, job: &Job) -> Result<Payload, FetchError> {
    match fetch_guarded(shared, job).await {
        Err(FetchError::Auth(reason)) => {
            info!(
                "[{}] Credentials rejected ({}), refreshing and retrying once",
                job.provider.id(),
                reason
            );
            job.provider.invalidate_credentials().await;
            fetch_guarded(shared, job).await
        }
        result => result,
    }
}

/// Run the provider's fetch in its own task, bounded by the job timeout.
///
/// A panic inside the provider ends that task only and comes back as an
/// error outcome.
async fn fetch_guarded(shared: &Shared, job: &Job) -> Result<Payload, FetchError> {
    let provider = job.provider.clone();
    let fields = job.fields.clone();
    let ctx = FetchContext {
        client: shared.client.clone(),
        timeout: job.timeout,
    };

    let task = tokio::spawn(async move { provider.fetch(&ctx, &fields).await });
    let abort = task.abort_handle();

    match tokio::time::timeout(job.timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) if e.is_panic() => Err(FetchError::Internal("fetch panicked".to_string())),
        Ok(Err(e)) => Err(FetchError::Internal(e.to_string())),
        Err(_) => {
            abort.abort();
            Err(FetchError::Timeout)
        }
    }
}
