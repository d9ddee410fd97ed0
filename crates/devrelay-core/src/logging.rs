/*!
 * Logging setup for devrelay.
 *
 * Thin wrapper over `tracing-subscriber` so every binary embedding the
 * device manager configures output the same way.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize the logging system with the default `info` filter.
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter.
///
/// The `RUST_LOG` environment variable takes precedence over `filter`
/// (e.g. `RUST_LOG=devrelay_server=trace`).
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("failed to initialize logging: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_tolerated_once() {
        // A second init in the same process returns an error; only the first
        // call in the test binary can succeed.
        let _ = init();
        assert!(init().is_err());
    }
}
