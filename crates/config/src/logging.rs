use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{ConfigError, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `log_level` when set. Calling this twice
/// returns an error instead of replacing the first subscriber.
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| ConfigError::Logging(format!("Invalid filter {}: {}", log_level, e)))?;

    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(())
}
