//! The provider capability and the registry of available providers.

mod error;
mod fields;
mod payload;
mod registry;

use std::time::Duration;

use async_trait::async_trait;

pub use error::ErrorKind;
pub use error::FetchError;
pub use fields::FieldDescriptor;
pub use fields::FieldError;
pub use fields::FieldKind;
pub use fields::FieldValue;
pub use fields::FieldValues;
pub use payload::Payload;
pub use payload::Rendered;
pub use registry::Registry;

/// Placeholder shown before a provider's first fetch settles.
pub const LOADING: &str = "loading";

/// Placeholder shown when a value is missing or could not be fetched.
pub const UNKNOWN: &str = "unknown";

/// Resources a fetch may use. Shared read-only across providers.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub client: reqwest::Client,
    /// Upper bound for each individual request.
    pub timeout: Duration,
}

/// One display value a provider produces.
#[derive(Debug, Clone, Copy)]
pub struct SensorDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub unit: Option<&'static str>,
}

/// An upstream data source.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, used as the key of all per-provider state.
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn icon(&self) -> &'static str {
        "mdi:information"
    }

    fn config_schema(&self) -> &'static [FieldDescriptor];

    /// The display keys `render` always returns, in display order.
    fn sensors(&self) -> &'static [SensorDescriptor];

    fn default_interval(&self) -> Duration;

    /// Fetch and parse fresh data. `fields` have already been validated
    /// against `config_schema`, with defaults applied.
    async fn fetch(&self, ctx: &FetchContext, fields: &FieldValues) -> Result<Payload, FetchError>;

    /// Drop any cached credential so the next fetch acquires a fresh one.
    async fn invalidate_credentials(&self) {}

    /// Turn a payload produced by `fetch` into display data.
    ///
    /// Must not fail: every key in `sensors` is present in the result, with
    /// [`UNKNOWN`] standing in for anything the payload lacks.
    fn render(&self, payload: &Payload) -> Rendered;

    fn placeholder(&self, text: &str) -> Rendered {
        Rendered::placeholder(self.sensors().iter().map(|s| s.key), text)
    }
}
