//! Refresh coordinator
//!
//! Owns the set of enabled providers for one configured instance, runs one
//! independent refresh loop per provider, and keeps the latest outcome of
//! each in a [`Snapshot`] that readers load without blocking.

mod error;
mod schedule;
mod snapshot;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

pub use error::CoordinatorError;
pub use snapshot::Failure;
pub use snapshot::Outcome;
pub use snapshot::Snapshot;
pub use snapshot::Success;

use schedule::Job;
use schedule::Schedule;
use schedule::refresh_once;

use crate::config::HttpConfig;
use crate::config::ProviderConfig;
use crate::provider::FetchError;
use crate::provider::FieldError;
use crate::provider::FieldValues;
use crate::provider::Payload;
use crate::provider::Provider;
use crate::provider::Registry;

/// Capacity of the change-notification channel. Slow subscribers that fall
/// further behind than this see `Lagged` and should re-read the snapshot.
const UPDATE_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    Loaded,
    Running,
    Reconfiguring,
    Stopped,
}

/// A change notification sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub provider_id: String,
    pub kind: UpdateKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum UpdateKind {
    /// The provider was enabled; it has no outcome until its first fetch settles.
    Scheduled,
    Refreshed,
    Failed,
    Removed,
}

/// A runtime change to one provider.
///
/// `None` keeps the current value, or the provider's default when it is
/// being enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderChange {
    pub enabled: bool,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub fields: Option<FieldValues>,
}

impl ProviderChange {
    pub fn enable() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn disable() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_fields(mut self, fields: FieldValues) -> Self {
        self.fields = Some(fields);
        self
    }
}

impl From<&ProviderConfig> for ProviderChange {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            enabled: config.enabled,
            interval: config.interval,
            timeout: config.timeout,
            fields: Some(config.fields.clone()),
        }
    }
}

/// State shared between the coordinator and its refresh tasks.
struct Shared {
    registry: Arc<Registry>,
    client: reqwest::Client,
    snapshot: ArcSwap<Snapshot>,
    /// Provider id -> epoch whose results may be written. Disabling removes
    /// the entry; changing fields bumps it.
    epochs: Mutex<HashMap<String, u64>>,
    updates: broadcast::Sender<Update>,
}

struct Active {
    job: Job,
    schedule: Schedule,
}

struct Inner {
    phase: Phase,
    active: BTreeMap<String, Active>,
    /// Tasks of disabled providers that may still be finishing a fetch.
    retired: HashMap<String, JoinHandle<()>>,
    next_epoch: u64,
}

impl Inner {
    fn next_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }
}

pub struct Coordinator {
    shared: Arc<Shared>,
    default_timeout: Duration,
    inner: Mutex<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Shared {
    fn record(&self, id: &str, epoch: u64, result: Result<Payload, FetchError>) {
        let kind = {
            let epochs = lock(&self.epochs);
            if epochs.get(id) != Some(&epoch) {
                debug!("[{}] Discarding result from retired schedule", id);
                return;
            }

            let mut snapshot = Snapshot::clone(&self.snapshot.load());
            let kind = match result {
                Ok(payload) => {
                    debug!("[{}] Refreshed", id);
                    snapshot.record_success(id, payload, Utc::now());
                    UpdateKind::Refreshed
                }
                Err(e) => {
                    warn!("[{}] Fetch failed: {}", id, e);
                    snapshot.record_failure(id, &e, Utc::now());
                    UpdateKind::Failed
                }
            };
            self.snapshot.store(Arc::new(snapshot));
            kind
        };

        self.notify(id, kind);
    }

    fn forget(&self, id: &str) {
        let mut epochs = lock(&self.epochs);
        epochs.remove(id);

        let mut snapshot = Snapshot::clone(&self.snapshot.load());
        if snapshot.remove(id).is_some() {
            self.snapshot.store(Arc::new(snapshot));
        }
    }

    fn notify(&self, id: &str, kind: UpdateKind) {
        // Having no subscribers is fine.
        let _ = self.updates.send(Update {
            provider_id: id.to_string(),
            kind,
        });
    }
}

impl Coordinator {
    /// Create a coordinator with its own HTTP client built from `http`.
    pub fn new(registry: Arc<Registry>, http: &HttpConfig) -> Result<Self, CoordinatorError> {
        let client = reqwest::Client::builder()
            .user_agent(http.user_agent.as_str())
            .build()?;
        Ok(Self::with_client(registry, client, http.timeout))
    }

    pub fn with_client(
        registry: Arc<Registry>,
        client: reqwest::Client,
        default_timeout: Duration,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        Self {
            shared: Arc::new(Shared {
                registry,
                client,
                snapshot: ArcSwap::new(Arc::default()),
                epochs: Mutex::new(HashMap::new()),
                updates,
            }),
            default_timeout,
            inner: Mutex::new(Inner {
                phase: Phase::Uninitialized,
                active: BTreeMap::new(),
                retired: HashMap::new(),
                next_epoch: 0,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn phase(&self) -> Phase {
        lock(&self.inner).phase
    }

    /// Latest outcome per provider. Never blocks.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.shared.updates.subscribe()
    }

    pub fn enabled_ids(&self) -> Vec<String> {
        lock(&self.inner).active.keys().cloned().collect()
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        lock(&self.inner).active.contains_key(id)
    }

    /// Effective refresh interval of an enabled provider.
    pub fn interval(&self, id: &str) -> Option<Duration> {
        lock(&self.inner).active.get(id).map(|a| a.job.interval)
    }

    /// Load provider configuration, fetch every enabled provider once, and
    /// start their schedules.
    ///
    /// First fetches run concurrently and independently; one failing does not
    /// hold up the others. A provider whose fields do not satisfy its schema
    /// is logged and left unscheduled.
    pub async fn initialize(
        &self,
        providers: &BTreeMap<String, ProviderConfig>,
    ) -> Result<(), CoordinatorError> {
        let jobs = {
            let mut inner = lock(&self.inner);
            if inner.phase != Phase::Uninitialized {
                return Err(CoordinatorError::InvalidPhase(inner.phase));
            }

            let mut jobs = Vec::new();
            for (id, config) in providers {
                let Some(provider) = self.shared.registry.get(id) else {
                    warn!("Ignoring configuration for unknown provider '{}'", id);
                    continue;
                };

                if !config.enabled {
                    info!("[{}] Disabled, skipping", id);
                    continue;
                }

                match self.build_job(&provider, None, &ProviderChange::from(config)) {
                    Ok(mut job) => {
                        job.epoch = inner.next_epoch();
                        jobs.push(job);
                    }
                    Err(e) => error!("[{}] Not scheduled: {}", id, e),
                }
            }

            let mut epochs = lock(&self.shared.epochs);
            for job in &jobs {
                epochs.insert(job.provider.id().to_string(), job.epoch);
            }

            inner.phase = Phase::Loaded;
            jobs
        };

        info!("Running first fetch for {} provider(s)", jobs.len());

        let mut first = JoinSet::new();
        for job in jobs.iter().cloned() {
            let shared = self.shared.clone();
            first.spawn(async move { refresh_once(&shared, &job).await });
        }
        while let Some(result) = first.join_next().await {
            if let Err(e) = result {
                warn!("First fetch task failed: {}", e);
            }
        }

        let mut inner = lock(&self.inner);
        if inner.phase != Phase::Loaded {
            // Shut down while the first fetches were running.
            return Ok(());
        }

        for job in jobs {
            let id = job.provider.id();
            info!("[{}] Scheduled every {:?}", id, job.interval);
            let schedule = Schedule::spawn(self.shared.clone(), job.clone(), None, false);
            inner.active.insert(id.to_string(), Active { job, schedule });
            self.shared.notify(id, UpdateKind::Scheduled);
        }

        inner.phase = Phase::Running;
        Ok(())
    }

    /// Apply a runtime change to one provider.
    ///
    /// - Enabling schedules the provider and fetches it straight away.
    /// - Disabling cancels its schedule and removes its snapshot entry.
    /// - Changing interval, timeout or fields replaces the schedule. A field
    ///   change also fetches straight away; an interval change does not.
    pub fn reconfigure(&self, id: &str, change: ProviderChange) -> Result<(), CoordinatorError> {
        let provider = self
            .shared
            .registry
            .get(id)
            .ok_or_else(|| CoordinatorError::UnknownProvider(id.to_string()))?;

        let mut inner = lock(&self.inner);
        if inner.phase != Phase::Running {
            return Err(CoordinatorError::InvalidPhase(inner.phase));
        }

        inner.phase = Phase::Reconfiguring;
        let result = if change.enabled {
            self.enable(&mut inner, &provider, &change)
        } else {
            self.disable(&mut inner, provider.id());
            Ok(())
        };
        inner.phase = Phase::Running;

        result
    }

    /// Bring the running set in line with a freshly loaded configuration.
    ///
    /// Returns the providers whose change was rejected; the rest are applied.
    pub fn apply(
        &self,
        providers: &BTreeMap<String, ProviderConfig>,
    ) -> Vec<(String, CoordinatorError)> {
        for id in providers.keys() {
            if !self.shared.registry.contains(id) {
                warn!("Ignoring configuration for unknown provider '{}'", id);
            }
        }

        let mut failures = Vec::new();
        for provider in self.shared.registry.iter() {
            let id = provider.id();
            let change = match providers.get(id) {
                Some(config) if config.enabled => ProviderChange {
                    enabled: true,
                    interval: Some(config.interval.unwrap_or_else(|| provider.default_interval())),
                    timeout: Some(config.timeout.unwrap_or(self.default_timeout)),
                    fields: Some(config.fields.clone()),
                },
                _ => ProviderChange::disable(),
            };

            if let Err(e) = self.reconfigure(id, change) {
                warn!("[{}] Configuration not applied: {}", id, e);
                failures.push((id.to_string(), e));
            }
        }

        failures
    }

    /// Fetch an enabled provider now, outside its schedule.
    ///
    /// Runs on the provider's own task, after any fetch already in flight.
    pub fn refresh(&self, id: &str) -> Result<(), CoordinatorError> {
        if !self.shared.registry.contains(id) {
            return Err(CoordinatorError::UnknownProvider(id.to_string()));
        }

        let inner = lock(&self.inner);
        match inner.active.get(id) {
            Some(active) => {
                active.schedule.trigger();
                Ok(())
            }
            None => Err(CoordinatorError::NotEnabled(id.to_string())),
        }
    }

    /// Cancel every schedule and wait for the tasks to finish.
    ///
    /// Fetches already in flight complete first. Calling this again is a no-op.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut inner = lock(&self.inner);
            if inner.phase == Phase::Stopped {
                return;
            }
            inner.phase = Phase::Stopped;

            let mut handles: Vec<_> = std::mem::take(&mut inner.active)
                .into_iter()
                .map(|(id, active)| (id, active.schedule.cancel()))
                .collect();
            handles.extend(inner.retired.drain());
            handles
        };

        info!("Stopping {} schedule(s)", handles.len());
        for (id, handle) in handles {
            match handle.await {
                Ok(()) => debug!("[{}] Stopped", id),
                Err(e) if e.is_cancelled() => debug!("[{}] Task cancelled", id),
                Err(e) => warn!("[{}] Task error: {}", id, e),
            }
        }
    }

    fn build_job(
        &self,
        provider: &Arc<dyn Provider>,
        current: Option<&Job>,
        change: &ProviderChange,
    ) -> Result<Job, CoordinatorError> {
        let id = provider.id();
        let schema = provider.config_schema();

        let fields = match (&change.fields, current) {
            (Some(raw), _) => raw.resolve(schema),
            (None, Some(job)) => Ok(FieldValues::clone(&job.fields)),
            (None, None) => FieldValues::new().resolve(schema),
        }
        .map_err(|errors| CoordinatorError::config(id, describe(&errors)))?;

        let interval = change
            .interval
            .or(current.map(|j| j.interval))
            .unwrap_or_else(|| provider.default_interval());
        if interval.is_zero() {
            return Err(CoordinatorError::config(id, "interval must be greater than zero"));
        }

        let timeout = change
            .timeout
            .or(current.map(|j| j.timeout))
            .unwrap_or(self.default_timeout);
        if timeout.is_zero() {
            return Err(CoordinatorError::config(id, "timeout must be greater than zero"));
        }

        Ok(Job {
            provider: provider.clone(),
            fields: Arc::new(fields),
            interval,
            timeout,
            epoch: current.map(|j| j.epoch).unwrap_or_default(),
        })
    }

    fn enable(
        &self,
        inner: &mut Inner,
        provider: &Arc<dyn Provider>,
        change: &ProviderChange,
    ) -> Result<(), CoordinatorError> {
        let id = provider.id();
        let current = inner.active.get(id).map(|a| &a.job);
        let mut job = self.build_job(provider, current, change)?;

        let Some(active) = inner.active.remove(id) else {
            job.epoch = inner.next_epoch();
            lock(&self.shared.epochs).insert(id.to_string(), job.epoch);

            info!("[{}] Enabled, refreshing every {:?}", id, job.interval);
            let predecessor = inner.retired.remove(id);
            let schedule = Schedule::spawn(self.shared.clone(), job.clone(), predecessor, true);
            inner.active.insert(id.to_string(), Active { job, schedule });
            self.shared.notify(id, UpdateKind::Scheduled);
            return Ok(());
        };

        let fields_changed = job.fields != active.job.fields;
        if !fields_changed
            && job.interval == active.job.interval
            && job.timeout == active.job.timeout
        {
            inner.active.insert(id.to_string(), active);
            return Ok(());
        }

        if fields_changed {
            job.epoch = inner.next_epoch();
            lock(&self.shared.epochs).insert(id.to_string(), job.epoch);
        }

        info!(
            "[{}] Rescheduled every {:?}{}",
            id,
            job.interval,
            if fields_changed { " with new settings" } else { "" }
        );
        let predecessor = active.schedule.cancel();
        let schedule = Schedule::spawn(
            self.shared.clone(),
            job.clone(),
            Some(predecessor),
            fields_changed,
        );
        inner.active.insert(id.to_string(), Active { job, schedule });

        Ok(())
    }

    fn disable(&self, inner: &mut Inner, id: &str) {
        let Some(active) = inner.active.remove(id) else {
            debug!("[{}] Already disabled", id);
            return;
        };

        inner.retired.insert(id.to_string(), active.schedule.cancel());
        self.shared.forget(id);

        info!("[{}] Disabled", id);
        self.shared.notify(id, UpdateKind::Removed);
    }
}
