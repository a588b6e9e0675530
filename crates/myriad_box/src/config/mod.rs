mod config;
mod diagnostics;
mod partial;

pub use config::*;
pub use diagnostics::ConfigError;
pub use diagnostics::Diagnostic;
pub use diagnostics::LoadError;
pub use diagnostics::Warning;
pub use diagnostics::format_diagnostics;
