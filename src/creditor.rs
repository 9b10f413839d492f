//! Creditor configuration and fallback resolution
use crate::error::{HostError, SepaError};
use crate::host::SepaHost;
use crate::logging::TARGET;
use crate::types::CreditorType;

pub const MIN_CYCLE_DAY: u8 = 1;
pub const MAX_CYCLE_DAY: u8 = 28;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Creditor {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub identifier: String, // SEPA creditor identifier
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub currency: String,
    #[n(4)]
    pub mandate_prefix: String,
    #[n(5)]
    pub creditor_type: CreditorType,
    #[n(6)]
    pub mandate_active: bool, // activate mandates right away, no separate validation
    #[n(7)]
    pub cycle_days: Vec<u8>,
    #[n(8)]
    pub frst_notice_days: u32,
    #[n(9)]
    pub ooff_notice_days: u32,
}

impl Creditor {
    /// A SEPA creditor with every cycle day allowed and no notice periods.
    pub fn new(id: u64, identifier: &str, name: &str) -> Self {
        Self {
            id,
            identifier: identifier.into(),
            name: name.into(),
            currency: "EUR".into(),
            mandate_prefix: "SEPA".into(),
            creditor_type: CreditorType::Sepa,
            mandate_active: true,
            cycle_days: (MIN_CYCLE_DAY..=MAX_CYCLE_DAY).collect(),
            frst_notice_days: 0,
            ooff_notice_days: 0,
        }
    }
    pub fn with_cycle_days(mut self, days: impl IntoIterator<Item = u8>) -> Self {
        self.cycle_days = days.into_iter().collect();
        self
    }
    pub fn with_notice_days(mut self, frst: u32, ooff: u32) -> Self {
        self.frst_notice_days = frst;
        self.ooff_notice_days = ooff;
        self
    }
    pub fn with_mandate_active(mut self, active: bool) -> Self {
        self.mandate_active = active;
        self
    }
    pub fn with_creditor_type(mut self, creditor_type: CreditorType) -> Self {
        self.creditor_type = creditor_type;
        self
    }
    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.into();
        self
    }

    /// The allowed collection days, rejecting sets the date search could never satisfy.
    pub fn validated_cycle_days(&self) -> Result<&[u8], SepaError> {
        validate_cycle_days(&self.cycle_days).map_err(|e| match e {
            SepaError::Configuration(message) => {
                SepaError::Configuration(format!("creditor [{}]: {message}", self.id))
            }
            other => other,
        })?;
        Ok(&self.cycle_days)
    }
}

/// A cycle-day set is usable when it is non-empty and every day exists in every month.
pub fn validate_cycle_days(days: &[u8]) -> Result<(), SepaError> {
    if days.is_empty() {
        return Err(SepaError::Configuration(
            "no collection cycle days configured".into(),
        ));
    }
    if let Some(day) = days
        .iter()
        .find(|d| !(MIN_CYCLE_DAY..=MAX_CYCLE_DAY).contains(*d))
    {
        return Err(SepaError::Configuration(format!(
            "invalid cycle day {day}, allowed are {MIN_CYCLE_DAY}-{MAX_CYCLE_DAY}"
        )));
    }
    Ok(())
}

/// Which creditor a processor ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditorBinding {
    Configured(Creditor),
    /// The configured creditor is gone, the default creditor stands in.
    Fallback(Creditor),
    /// Nothing could be loaded. The processor stays callable but refuses payments.
    Inert,
}

impl CreditorBinding {
    pub fn creditor(&self) -> Option<&Creditor> {
        match self {
            CreditorBinding::Configured(c) | CreditorBinding::Fallback(c) => Some(c),
            CreditorBinding::Inert => None,
        }
    }

    pub fn require(&self) -> Result<&Creditor, SepaError> {
        self.creditor().ok_or_else(|| {
            SepaError::Configuration(
                "creditor cannot be loaded, SEPA payment processor not functional".into(),
            )
        })
    }
}

/// Load `creditor_id`, falling back to the default creditor and finally to [`CreditorBinding::Inert`].
pub fn resolve_creditor<H: SepaHost + ?Sized>(
    host: &H,
    creditor_id: Option<u64>,
    default_creditor_id: Option<u64>,
) -> CreditorBinding {
    if let Some(id) = creditor_id {
        match host.creditor(id) {
            Ok(creditor) => return CreditorBinding::Configured(creditor),
            Err(err) => tracing::error!(
                target: TARGET,
                creditor_id = id,
                error = %err,
                "creditor not found, using default creditor"
            ),
        }
    }

    let Some(default_id) = default_creditor_id else {
        tracing::error!(target: TARGET, "no default creditor configured, payment processor not functional");
        return CreditorBinding::Inert;
    };

    match host.creditor(default_id) {
        Ok(creditor) => CreditorBinding::Fallback(creditor),
        Err(err) => {
            tracing::error!(
                target: TARGET,
                creditor_id = default_id,
                error = %err,
                "default creditor cannot be loaded, payment processor not functional"
            );
            CreditorBinding::Inert
        }
    }
}

/// Load the creditor a stored mandate belongs to, with the same default fallback.
pub fn creditor_for_mandate<H: SepaHost + ?Sized>(
    host: &H,
    creditor_id: u64,
    default_creditor_id: Option<u64>,
) -> Result<Creditor, SepaError> {
    match host.creditor(creditor_id) {
        Ok(creditor) => Ok(creditor),
        Err(HostError::NotFound { .. }) => match default_creditor_id {
            Some(default_id) => Ok(host.creditor(default_id)?),
            None => Err(SepaError::Configuration(format!(
                "creditor [{creditor_id}] not found and no default creditor configured"
            ))),
        },
        Err(err) => Err(err.into()),
    }
}
