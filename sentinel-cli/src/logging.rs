use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use crate::settings::LogSettings;

/// Install the global subscriber. Logs go to stderr so stdout carries only
/// answers.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(settings: &LogSettings) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = if settings.json { builder.json().try_init() } else { builder.try_init() };
    installed.map_err(|e| anyhow!("failed to initialise logging: {e}"))
}
