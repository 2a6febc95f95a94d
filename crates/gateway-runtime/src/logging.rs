//! Log subscriber setup.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init(level: &str, json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level {:?}", level))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("cannot install log subscriber: {}", e))
}
