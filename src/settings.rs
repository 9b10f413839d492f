//! Processor settings
//! Loaded from a TOML file, every key optional.
//!
//! ```toml
//! buffer_days = 2
//! default_creditor_id = 1
//! hide_bic = false
//! hide_billing = true
//! log_filter = "sepa=debug"
//! pending_max_age_hours = 24
//! ```
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::SepaError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SepaSettings {
    /// Extra days on top of the FRST notice before the first recurring collection
    pub buffer_days: u32,

    /// Creditor used when a processor's own creditor no longer exists
    pub default_creditor_id: Option<u64>,

    /// Form hint: do not ask for the BIC
    pub hide_bic: bool,

    /// Form hint: billing address fields are optional
    pub hide_billing: bool,

    /// `tracing` filter directive handed to [`crate::logging::init`]
    pub log_filter: String,

    /// Pending mandates parked longer than this are dropped by the repair job
    pub pending_max_age_hours: u32,
}

impl Default for SepaSettings {
    fn default() -> Self {
        Self {
            buffer_days: 0,
            default_creditor_id: None,
            hide_bic: false,
            hide_billing: false,
            log_filter: "info".into(),
            pending_max_age_hours: 24,
        }
    }
}

impl SepaSettings {
    pub fn from_toml_str(contents: &str) -> Result<Self, SepaError> {
        toml::from_str(contents)
            .map_err(|e| SepaError::Configuration(format!("malformed settings: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            SepaError::Configuration(format!("cannot read settings {}: {e}", path.display()))
        })?;
        Ok(Self::from_toml_str(&contents)?)
    }
}
