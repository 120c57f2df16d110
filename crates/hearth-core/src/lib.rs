pub mod config;
pub mod error;

pub use config::{
    CalendarConfig, ClassificationConfig, Config, FeedConfig, FeedFormat, FeedRole,
    RefreshConfig, TravelLocationConfig, TravelerConfig, ValidationResult, WorkHours,
};
pub use error::ConfigError;

use anyhow::Result;

/// Initialize logging for the Hearth binary
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Hearth core initialized");
    Ok(())
}
