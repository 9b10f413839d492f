//! Log targets and subscriber setup.
//!
//! Host levels map onto `tracing` as follows: DEBUG -> `debug!`, INFO -> `info!`,
//! ERROR -> `error!` on [`TARGET`]. AUDIT lines record every change made to
//! mandates and financial records; they are `info!` events on [`AUDIT_TARGET`]
//! so they can be routed to a separate sink.
use tracing_subscriber::EnvFilter;

use crate::error::SepaError;
use crate::settings::SepaSettings;

pub const TARGET: &str = "sepa";
pub const AUDIT_TARGET: &str = "sepa::audit";

/// Install a formatting subscriber filtered by `directive` (e.g. `"sepa=debug"`).
///
/// Fails if the directive does not parse or a global subscriber is already set.
pub fn init(directive: &str) -> Result<(), SepaError> {
    let filter = EnvFilter::try_new(directive)
        .map_err(|e| SepaError::Configuration(format!("invalid log filter '{directive}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| SepaError::Configuration(format!("cannot install log subscriber: {e}")))
}

pub fn init_from_settings(settings: &SepaSettings) -> Result<(), SepaError> {
    init(&settings.log_filter)
}
