//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. the directive passed by the caller (e.g. `"debug"`, `"dagflow=trace"`)
//! 2. the `DAGFLOW_LOG` environment variable
//! 3. default to `info`

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "DAGFLOW_LOG";

pub type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Installs the global subscriber, writing to stderr.
///
/// Returns an error if the directive does not parse or a subscriber is
/// already installed.
pub fn init_logging(directive: Option<&str>) -> Result<(), InitError> {
    let filter = filter_for(directive)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .try_init()
}

fn filter_for(directive: Option<&str>) -> Result<EnvFilter, InitError> {
    let directive = match directive {
        Some(d) => d.to_string(),
        None => std::env::var(LOG_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "info".to_string()),
    };
    Ok(EnvFilter::try_new(directive)?)
}
