//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` wins over `default_level`. Diagnostics go to stderr; stdout
/// belongs to the interactive shell.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), default_level)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| crate::Error::Logging(format!("Logging already initialised: {}", e)))?;

    Ok(())
}

fn build_filter(env: Option<&str>, default_level: &str) -> crate::Result<EnvFilter> {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .map_or_else(|| EnvFilter::try_new(default_level), Ok)
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))
}
