//! Structured logging setup
//!
//! Installs a console subscriber for the `tracing` events emitted by the
//! index, store and analyzer. Libraries embedding this crate may install
//! their own subscriber instead.
//!
//! Configuration via environment variables:
//! - RUST_LOG: log level filter (default: info)
//! - SIMILARITY_LOG_FORMAT: `compact` selects the compact formatter (default: full)

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber.
///
/// Returns an error if a global subscriber is already set, so repeated calls
/// are harmless.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // RUST_LOG env var or default to info
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let compact = std::env::var("SIMILARITY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("compact"))
        .unwrap_or(false);

    if compact {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().compact())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .try_init()?;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_init_no_panic() {
        // second call fails with an error instead of panicking
        let _ = init_tracing();
        let _ = init_tracing();
    }
}
