use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::Provider;

/// Lookup table from provider id to implementation.
///
/// Built once at startup and shared read-only afterwards. Iteration order is
/// by id, so anything listing providers is stable across runs.
#[derive(Default, Clone)]
pub struct Registry {
    providers: BTreeMap<&'static str, Arc<dyn Provider>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its id.
    ///
    /// A second registration for the same id replaces the first and returns
    /// it. That is almost always a naming collision, so it is logged.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Option<Arc<dyn Provider>> {
        let id = provider.id();
        let previous = self.providers.insert(id, provider);
        if previous.is_some() {
            warn!("Provider '{}' registered twice, replacing earlier implementation", id);
        }
        previous
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn all_ids(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::provider::FetchContext;
    use crate::provider::FetchError;
    use crate::provider::FieldDescriptor;
    use crate::provider::FieldValues;
    use crate::provider::Payload;
    use crate::provider::Rendered;
    use crate::provider::SensorDescriptor;
    use super::*;

    struct Named {
        id: &'static str,
        name: &'static str,
    }

    #[async_trait]
    impl Provider for Named {
        fn id(&self) -> &'static str {
            self.id
        }

        fn display_name(&self) -> &'static str {
            self.name
        }

        fn config_schema(&self) -> &'static [FieldDescriptor] {
            &[]
        }

        fn sensors(&self) -> &'static [SensorDescriptor] {
            &[]
        }

        fn default_interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn fetch(&self, _: &FetchContext, _: &FieldValues) -> Result<Payload, FetchError> {
            Ok(Payload::new(()))
        }

        fn render(&self, _: &Payload) -> Rendered {
            Rendered::default()
        }
    }

    fn named(id: &'static str, name: &'static str) -> Arc<dyn Provider> {
        Arc::new(Named { id, name })
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = Registry::new();
        assert!(registry.register(named("quote", "First")).is_none());

        let replaced = registry.register(named("quote", "Second"));
        assert_eq!(replaced.map(|p| p.display_name()), Some("First"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("quote").unwrap().display_name(), "Second");
    }

    #[test]
    fn test_ids_are_sorted() {
        let mut registry = Registry::new();
        registry.register(named("weather", "Weather"));
        registry.register(named("hitokoto", "Hitokoto"));
        registry.register(named("poetry", "Poetry"));

        assert_eq!(registry.all_ids(), vec!["hitokoto", "poetry", "weather"]);
    }

    #[test]
    fn test_get_missing() {
        let registry = Registry::new();
        assert!(registry.get("nope").is_none());
        assert!(registry.is_empty());
    }
}
