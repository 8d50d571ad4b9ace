// logging.rs — tracing subscriber bootstrap.
//
// Logs go to stderr so stdout stays free for exported documents. `RUST_LOG`
// directives apply first; the configured level is added for each Provenant
// crate on top.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::CoreError;

const CRATES: &[&str] = &["pv_chain", "pv_policy", "pv_risk", "pv_core"];

/// Build the filter for a logging config.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, CoreError> {
    let mut filter = EnvFilter::from_default_env();
    for krate in CRATES {
        let directive = format!("{}={}", krate, config.level)
            .parse()
            .map_err(|e| CoreError::Logging(format!("invalid level '{}': {}", config.level, e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), CoreError> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| CoreError::Logging(e.to_string()))
}
