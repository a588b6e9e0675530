use std::collections::BTreeMap;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

use crate::provider::FieldValues;
use crate::provider::Provider;
use crate::provider::Registry;
use super::diagnostics::ConfigError;
use super::diagnostics::Diagnostic;
use super::diagnostics::Warning;
use super::partial::PartialConfig;
use super::partial::PartialProviderConfig;

/// Shortest refresh interval a config file may ask for.
pub const MIN_INTERVAL_MINUTES: u64 = 1;

const DEFAULT_LISTEN: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8565;
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub http: HttpConfig,
    /// Settings per provider id, for providers the registry knows.
    pub providers: BTreeMap<String, ProviderConfig>,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"myriad_box::coordinator" = "debug"`
    pub overrides: HashMap<String, LogLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub listen: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Settings for the HTTP client shared by all providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Default per-fetch timeout; providers may override it.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HTTP_TIMEOUT,
            user_agent: concat!("myriad_box/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Defaults to true when the provider's table is present.
    pub enabled: bool,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub fields: FieldValues,
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Provider tables are validated against the schemas in `registry`.
    /// Returns the config together with any warnings; if there is at least one
    /// error, every diagnostic is returned in the error instead.
    pub fn from_files(
        paths: &[PathBuf],
        registry: &Registry,
    ) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let configs = PartialConfig::load_with_imports(paths)?;

        let (partial, diagnostics) = PartialConfig::merge(configs);

        Self::from_partial(partial, diagnostics, registry)
    }

    /// Convert a merged PartialConfig to a Config, validating all fields
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
        registry: &Registry,
    ) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let logging = partial
            .logging
            .map(|logging| LoggingConfig {
                level: logging.level.map(|s| *s.get_ref()).unwrap_or_default(),
                overrides: logging
                    .overrides
                    .map(|hm| hm.into_iter().map(|(k, v)| (k, *v.get_ref())).collect())
                    .unwrap_or_default(),
            })
            .unwrap_or_default();

        let mut api = ApiConfig::default();
        if let Some(partial_api) = partial.api {
            if let Some(listen) = partial_api.listen {
                let listen = listen.into_inner();
                if listen.parse::<IpAddr>().is_err() {
                    diagnostics.push(Diagnostic::validation(
                        "api.listen",
                        format!("'{}' is not an IP address", listen),
                    ));
                }
                api.listen = listen;
            }
            if let Some(port) = partial_api.port {
                api.port = port.into_inner();
            }
        }

        let mut http = HttpConfig::default();
        if let Some(partial_http) = partial.http {
            if let Some(timeout) = partial_http.timeout_secs {
                match timeout.into_inner() {
                    0 => diagnostics.push(Diagnostic::validation(
                        "http.timeout_secs",
                        "must be greater than zero",
                    )),
                    secs => http.timeout = Duration::from_secs(secs),
                }
            }
            if let Some(user_agent) = partial_http.user_agent {
                http.user_agent = user_agent.into_inner();
            }
        }

        let mut providers = BTreeMap::new();
        for (id, partial_provider) in partial.providers.unwrap_or_default() {
            let Some(provider) = registry.get(&id) else {
                diagnostics.push(Diagnostic::Warning(Warning::UnknownProvider { provider: id }));
                continue;
            };

            match Self::validate_provider(&id, partial_provider, provider.as_ref()) {
                Ok(config) => {
                    providers.insert(id, config);
                }
                Err(errors) => diagnostics.extend(errors),
            }
        }

        if diagnostics.iter().any(Diagnostic::is_error) {
            return Err(ConfigError::Invalid(diagnostics));
        }

        Ok((
            Config {
                logging,
                api,
                http,
                providers,
            },
            diagnostics,
        ))
    }

    /// Validate one provider table against the provider's schema
    ///
    /// Field values are only checked for enabled providers, so a disabled
    /// provider may be left half-configured.
    fn validate_provider(
        id: &str,
        partial: PartialProviderConfig,
        provider: &dyn Provider,
    ) -> Result<ProviderConfig, Vec<Diagnostic>> {
        let mut errors = Vec::new();

        let enabled = partial.enabled.map(|s| s.into_inner()).unwrap_or(true);

        let interval = match partial.interval_minutes.map(|s| s.into_inner()) {
            Some(minutes) if minutes < MIN_INTERVAL_MINUTES => {
                errors.push(Diagnostic::validation(
                    format!("providers.{}.interval_minutes", id),
                    format!("must be at least {} minute(s)", MIN_INTERVAL_MINUTES),
                ));
                None
            }
            Some(minutes) => Some(Duration::from_secs(minutes * 60)),
            None => None,
        };

        let timeout = match partial.timeout_secs.map(|s| s.into_inner()) {
            Some(0) => {
                errors.push(Diagnostic::validation(
                    format!("providers.{}.timeout_secs", id),
                    "must be greater than zero",
                ));
                None
            }
            other => other.map(Duration::from_secs),
        };

        let raw: FieldValues = partial.fields.into_iter().collect();
        let fields = if enabled {
            match raw.resolve(provider.config_schema()) {
                Ok(fields) => fields,
                Err(field_errors) => {
                    errors.extend(field_errors.into_iter().map(|e| {
                        Diagnostic::validation(format!("providers.{}.{}", id, e.key), e.to_string())
                    }));
                    raw
                }
            }
        } else {
            raw
        };

        if errors.is_empty() {
            Ok(ProviderConfig {
                enabled,
                interval,
                timeout,
                fields,
            })
        } else {
            Err(errors)
        }
    }
}
