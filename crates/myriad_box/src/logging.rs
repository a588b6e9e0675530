use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Build the target filter described by the `[logging]` section.
pub fn targets(config: &LoggingConfig) -> Targets {
    config.overrides.iter().fold(
        Targets::new().with_default(LevelFilter::from(config.level)),
        |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
    )
}

/// Install the global fmt subscriber.
pub fn init(config: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(targets(config))
        .init();
}

#[cfg(test)]
mod tests {
    use crate::config::LogLevel;
    use super::*;
    use tracing::Level;

    #[test]
    fn test_overrides_apply_per_target() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            ..Default::default()
        };
        config
            .overrides
            .insert("myriad_box::coordinator".to_string(), LogLevel::Debug);

        let targets = targets(&config);
        assert!(targets.would_enable("myriad_box::coordinator", &Level::DEBUG));
        assert!(!targets.would_enable("myriad_box::api", &Level::INFO));
        assert!(targets.would_enable("myriad_box::api", &Level::WARN));
    }
}
