//! Scriptable in-memory providers for end-to-end tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use myriad_box::config::ProviderConfig;
use myriad_box::coordinator::Coordinator;
use myriad_box::provider::FetchContext;
use myriad_box::provider::FetchError;
use myriad_box::provider::FieldDescriptor;
use myriad_box::provider::FieldValues;
use myriad_box::provider::Payload;
use myriad_box::provider::Provider;
use myriad_box::provider::Registry;
use myriad_box::provider::Rendered;
use myriad_box::provider::SensorDescriptor;
use myriad_box::provider::UNKNOWN;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const SCHEMA: &[FieldDescriptor] = &[FieldDescriptor::text("label", "Label").with_default("x")];

const SENSORS: &[SensorDescriptor] = &[SensorDescriptor {
    key: "value",
    name: "Value",
    icon: "mdi:numeric",
    unit: None,
}];

/// What the next fetch does. Once the script runs out, fetches succeed with
/// the call number.
pub enum Step {
    Ok(u32),
    Fail(FetchError),
    Panic,
}

pub struct Fake {
    id: &'static str,
    interval: Duration,
    delay: Duration,
    script: Mutex<VecDeque<Step>>,
    pub calls: AtomicUsize,
    pub invalidations: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Fake {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            interval: Duration::from_secs(60),
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.lock().unwrap().extend(steps);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for Fake {
    fn id(&self) -> &'static str {
        self.id
    }

    fn display_name(&self) -> &'static str {
        self.id
    }

    fn config_schema(&self) -> &'static [FieldDescriptor] {
        SCHEMA
    }

    fn sensors(&self) -> &'static [SensorDescriptor] {
        SENSORS
    }

    fn default_interval(&self) -> Duration {
        self.interval
    }

    async fn fetch(&self, _: &FetchContext, _: &FieldValues) -> Result<Payload, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = self.script.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            None => Ok(Payload::new(call as u32)),
            Some(Step::Ok(value)) => Ok(Payload::new(value)),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Panic) => panic!("scripted panic in {}", self.id),
        }
    }

    async fn invalidate_credentials(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn render(&self, payload: &Payload) -> Rendered {
        match payload.downcast_ref::<u32>() {
            Some(value) => Rendered::default().value("value", value.to_string()),
            None => self.placeholder(UNKNOWN),
        }
    }
}

pub fn coordinator(fakes: &[Arc<Fake>]) -> Arc<Coordinator> {
    let mut registry = Registry::new();
    for fake in fakes {
        registry.register(fake.clone());
    }
    Arc::new(Coordinator::with_client(
        Arc::new(registry),
        reqwest::Client::new(),
        DEFAULT_TIMEOUT,
    ))
}

pub fn enabled() -> ProviderConfig {
    ProviderConfig {
        enabled: true,
        interval: None,
        timeout: None,
        fields: FieldValues::new(),
    }
}

pub fn providers(configs: &[(&str, ProviderConfig)]) -> BTreeMap<String, ProviderConfig> {
    configs
        .iter()
        .map(|(id, config)| (id.to_string(), config.clone()))
        .collect()
}

/// The payload of a provider's last success, if any.
pub fn last_value(coordinator: &Coordinator, id: &str) -> Option<u32> {
    let snapshot = coordinator.snapshot();
    let success = snapshot.get(id)?.last_success.as_ref()?;
    success.payload.downcast_ref::<u32>().copied()
}

/// Let spawned tasks run until they are all idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Poll `check` on the real clock until it holds or a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    check()
}
