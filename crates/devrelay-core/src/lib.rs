/*!
 * devrelay Core
 *
 * This crate provides the shared pieces of the devrelay device server:
 * the wire protocol message model, the error taxonomy, configuration,
 * and logging setup.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod prelude;

/// devrelay core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization: set up logging with the default filter.
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("devrelay core {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
