//! Presentation adapter
//!
//! Turns coordinator outcomes into flat, display-ready sensor values. Every
//! sensor a provider declares always has a value: the rendered text once a
//! fetch has succeeded, otherwise a placeholder.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::coordinator::Coordinator;
use crate::coordinator::Outcome;
use crate::provider::LOADING;
use crate::provider::Provider;
use crate::provider::UNKNOWN;

/// One sensor as shown to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorView {
    pub provider_id: &'static str,
    pub key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    pub value: String,
    /// False until the provider has produced at least one good value.
    pub available: bool,
    /// True when the value is from an older fetch and the latest one failed.
    pub stale: bool,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Render every sensor of `provider` from its current outcome.
///
/// - No outcome yet: each sensor reads [`LOADING`].
/// - Only failures so far: each sensor reads [`UNKNOWN`].
/// - A success exists: the provider's rendering, marked stale if a later
///   fetch failed.
pub fn render_provider(provider: &dyn Provider, outcome: Option<&Outcome>) -> Vec<SensorView> {
    let success = outcome.and_then(|o| o.last_success.as_ref());
    let failure = outcome.and_then(|o| o.last_error.as_ref());

    let rendered = match (outcome, success) {
        (_, Some(success)) => provider.render(&success.payload),
        (Some(_), None) => provider.placeholder(UNKNOWN),
        (None, None) => provider.placeholder(LOADING),
    };

    let mut attributes = rendered.attributes;
    attributes.insert("provider".to_string(), provider.display_name().into());
    if let Some(success) = success {
        attributes.insert(
            "update_time".to_string(),
            success.fetched_at.to_rfc3339().into(),
        );
    }
    if let Some(failure) = failure {
        attributes.insert("error".to_string(), failure.message.clone().into());
        attributes.insert("error_kind".to_string(), failure.kind.to_string().into());
        attributes.insert(
            "failed_at".to_string(),
            failure.failed_at.to_rfc3339().into(),
        );
    }

    provider
        .sensors()
        .iter()
        .map(|sensor| SensorView {
            provider_id: provider.id(),
            key: sensor.key,
            name: sensor.name,
            icon: sensor.icon,
            unit: sensor.unit,
            value: rendered
                .values
                .get(sensor.key)
                .cloned()
                .unwrap_or_else(|| UNKNOWN.to_string()),
            available: success.is_some(),
            stale: outcome.is_some_and(Outcome::is_stale),
            attributes: attributes.clone(),
        })
        .collect()
}

/// Live sensor views for every provider that is enabled or has an outcome.
///
/// Kept current from the coordinator's update channel; reads never block.
pub struct Board {
    coordinator: Arc<Coordinator>,
    views: ArcSwap<BTreeMap<String, Vec<SensorView>>>,
}

impl Board {
    pub fn new(coordinator: Arc<Coordinator>) -> Arc<Self> {
        let board = Arc::new(Self {
            coordinator,
            views: ArcSwap::new(Arc::default()),
        });
        board.rebuild();
        board
    }

    pub fn views(&self) -> Arc<BTreeMap<String, Vec<SensorView>>> {
        self.views.load_full()
    }

    pub fn provider(&self, id: &str) -> Option<Vec<SensorView>> {
        self.views.load().get(id).cloned()
    }

    /// Recompute every provider's views from scratch.
    pub fn rebuild(&self) {
        // Read the snapshot inside the closure: a retry after a concurrent
        // store must render from the newer snapshot.
        self.views.rcu(|_| {
            let snapshot = self.coordinator.snapshot();
            let mut ids = self.coordinator.enabled_ids();
            ids.extend(snapshot.iter().map(|(id, _)| id.to_string()));

            ids.into_iter()
                .filter_map(|id| {
                    let provider = self.coordinator.registry().get(&id)?;
                    let views = render_provider(provider.as_ref(), snapshot.get(&id));
                    Some((id, views))
                })
                .collect::<BTreeMap<_, _>>()
        });
    }

    /// Recompute the views of one provider, dropping them if it is gone.
    pub fn refresh(&self, id: &str) {
        let provider = self.coordinator.registry().get(id);

        self.views.rcu(|current| {
            let snapshot = self.coordinator.snapshot();
            let present = snapshot.contains(id) || self.coordinator.is_enabled(id);

            let mut views = BTreeMap::clone(current);
            match &provider {
                Some(provider) if present => {
                    views.insert(id.to_string(), render_provider(provider.as_ref(), snapshot.get(id)));
                }
                _ => {
                    views.remove(id);
                }
            }
            views
        });
    }

    /// Follow coordinator updates until the coordinator goes away.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        // Subscribe before the rebuild so nothing falls in between.
        let mut updates = self.coordinator.subscribe();
        self.rebuild();

        let board = self.clone();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        debug!("[{}] Board update: {}", update.provider_id, update.kind);
                        board.refresh(&update.provider_id);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Board missed {} update(s), rebuilding", skipped);
                        board.rebuild();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::coordinator::Failure;
    use crate::coordinator::Success;
    use crate::provider::ErrorKind;
    use crate::provider::FetchContext;
    use crate::provider::FetchError;
    use crate::provider::FieldDescriptor;
    use crate::provider::FieldValues;
    use crate::provider::Payload;
    use crate::provider::Rendered;
    use crate::provider::SensorDescriptor;
    use super::*;

    struct Clock;

    const SENSORS: &[SensorDescriptor] = &[
        SensorDescriptor {
            key: "hour",
            name: "Hour",
            icon: "mdi:clock",
            unit: Some("h"),
        },
        SensorDescriptor {
            key: "minute",
            name: "Minute",
            icon: "mdi:clock",
            unit: None,
        },
    ];

    #[async_trait]
    impl Provider for Clock {
        fn id(&self) -> &'static str {
            "clock"
        }

        fn display_name(&self) -> &'static str {
            "Clock"
        }

        fn config_schema(&self) -> &'static [FieldDescriptor] {
            &[]
        }

        fn sensors(&self) -> &'static [SensorDescriptor] {
            SENSORS
        }

        fn default_interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn fetch(&self, _: &FetchContext, _: &FieldValues) -> Result<Payload, FetchError> {
            Ok(Payload::new(12u32))
        }

        // Only ever renders the hour.
        fn render(&self, payload: &Payload) -> Rendered {
            match payload.downcast_ref::<u32>() {
                Some(hour) => Rendered::default().value("hour", hour.to_string()),
                None => self.placeholder(UNKNOWN),
            }
        }
    }

    fn success() -> Success {
        Success {
            payload: Payload::new(7u32),
            fetched_at: Utc::now(),
        }
    }

    fn failure() -> Failure {
        Failure {
            kind: ErrorKind::Network,
            message: "request timed out".to_string(),
            failed_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_outcome_is_loading() {
        let views = render_provider(&Clock, None);

        assert_eq!(views.len(), 2);
        for view in &views {
            assert_eq!(view.value, LOADING);
            assert!(!view.available);
            assert!(!view.stale);
        }
        assert_eq!(views[0].attributes["provider"], "Clock");
    }

    #[test]
    fn test_failure_without_success_is_unknown() {
        let outcome = Outcome {
            last_success: None,
            last_error: Some(failure()),
        };
        let views = render_provider(&Clock, Some(&outcome));

        assert_eq!(views[0].value, UNKNOWN);
        assert!(!views[0].available);
        assert_eq!(views[0].attributes["error_kind"], "network");
        assert_eq!(views[0].attributes["error"], "request timed out");
    }

    #[test]
    fn test_stale_value_keeps_rendering() {
        let outcome = Outcome {
            last_success: Some(success()),
            last_error: Some(failure()),
        };
        let views = render_provider(&Clock, Some(&outcome));

        assert_eq!(views[0].value, "7");
        assert!(views[0].available);
        assert!(views[0].stale);
        assert!(views[0].attributes.contains_key("update_time"));
        assert!(views[0].attributes.contains_key("error"));
    }

    #[test]
    fn test_unrendered_key_is_unknown() {
        let outcome = Outcome {
            last_success: Some(success()),
            last_error: None,
        };
        let views = render_provider(&Clock, Some(&outcome));

        assert_eq!(views[1].key, "minute");
        assert_eq!(views[1].value, UNKNOWN);
        assert!(views[1].available);
        assert!(!views[1].stale);
    }
}
