//! Concrete upstream providers.

#[cfg(feature = "provider_hitokoto")]
mod hitokoto;
#[cfg(feature = "provider_istoreos")]
mod istoreos;
#[cfg(feature = "provider_poetry")]
mod poetry;
#[cfg(feature = "provider_weather")]
mod weather;

use std::sync::Arc;

#[cfg(feature = "provider_hitokoto")]
pub use hitokoto::Hitokoto;
#[cfg(feature = "provider_istoreos")]
pub use istoreos::IStoreOs;
#[cfg(feature = "provider_poetry")]
pub use poetry::Poetry;
#[cfg(feature = "provider_weather")]
pub use weather::Weather;

use serde::de::DeserializeOwned;

use crate::provider::FetchError;
use crate::provider::Registry;
use crate::provider::UNKNOWN;

/// Registry holding every provider compiled into this build.
pub fn default_registry() -> Registry {
    #[allow(unused_mut)]
    let mut registry = Registry::new();

    #[cfg(feature = "provider_hitokoto")]
    registry.register(Arc::new(Hitokoto));
    #[cfg(feature = "provider_istoreos")]
    registry.register(Arc::new(IStoreOs));
    #[cfg(feature = "provider_poetry")]
    registry.register(Arc::new(Poetry::new()));
    #[cfg(feature = "provider_weather")]
    registry.register(Arc::new(Weather::new()));

    registry
}

/// Send a request and decode a JSON body, mapping failures onto [`FetchError`].
async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, FetchError> {
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status));
    }

    Ok(response.json().await?)
}

fn or_unknown(value: Option<&str>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_order() {
        let registry = default_registry();
        assert_eq!(
            registry.all_ids(),
            vec!["hitokoto", "istoreos", "poetry", "weather"]
        );
    }

    #[test]
    fn test_every_provider_renders_placeholders_for_foreign_payloads() {
        let registry = default_registry();
        let foreign = crate::provider::Payload::new(42u8);

        for provider in registry.iter() {
            let rendered = provider.render(&foreign);
            for sensor in provider.sensors() {
                assert_eq!(
                    rendered.values.get(sensor.key).map(String::as_str),
                    Some(UNKNOWN),
                    "{} did not render {}",
                    provider.id(),
                    sensor.key
                );
            }
        }
    }

    #[test]
    fn test_every_schema_resolves_with_required_fields_only() {
        let registry = default_registry();
        for provider in registry.iter() {
            let mut values = crate::provider::FieldValues::new();
            for field in provider.config_schema().iter().filter(|f| f.required) {
                values.insert(field.key, "x");
            }
            assert!(
                values.resolve(provider.config_schema()).is_ok(),
                "{} defaults do not satisfy its own schema",
                provider.id()
            );
        }
    }
}
