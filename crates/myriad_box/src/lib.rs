pub mod api;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod provider;
pub mod providers;
pub mod sensor;

pub use config::Config;
pub use config::Diagnostic;
pub use config::LogLevel;
pub use config::format_diagnostics;
pub use coordinator::Coordinator;
pub use coordinator::Phase;
pub use coordinator::ProviderChange;
pub use provider::Provider;
pub use provider::Registry;
pub use sensor::Board;
pub use sensor::SensorView;
