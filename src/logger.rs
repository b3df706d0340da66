use tracing_subscriber::fmt::{self, time::Uptime};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::errors::SGError;

/// Setup logging for the library
///
/// Installs a `tracing` subscriber writing to stdout, filtered by `log_level`
/// (any `EnvFilter` directive, e.g. `debug` or `sgrefine=trace`).
///
/// Only one global subscriber can exist; a second call returns
/// `LoggerInitFailed` and leaves the first one in place.
pub fn setup_log(log_level: &str) -> Result<(), SGError>
{
    let env_filter = EnvFilter::try_new(log_level.to_lowercase()).map_err(|_| SGError::InvalidConfiguration)?;
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_timer(Uptime::default());
    Registry::default()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
        .map_err(|_| SGError::LoggerInitFailed)?;
    tracing::debug!("Logging is configured with level: {}", log_level);
    Ok(())
}

#[test]
fn check_logger_installs_once()
{
    assert_eq!(setup_log("sgrefine=loud"), Err(SGError::InvalidConfiguration));
    assert_eq!(setup_log("debug"), Ok(()));
    assert_eq!(setup_log("info"), Err(SGError::LoggerInitFailed));
}
