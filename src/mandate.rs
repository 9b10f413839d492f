//! SEPA mandates and their lifecycle
//!
//! A mandate is created *provisionally* while the checkout is still running:
//! status PARTIAL and an entity id of [`PENDING_ENTITY_ID`], because the
//! financial record it will point at does not exist yet. Once that record
//! exists the mandate is *finalized*: linked to the record and moved to the
//! status the creditor's activation policy dictates.
//!
//! | policy               | OOFF | RCUR | enabled |
//! |----------------------|------|------|---------|
//! | activate immediately | OOFF | FRST | yes     |
//! | await validation     | INIT | INIT | no      |
use crate::creditor::Creditor;
use crate::error::SepaError;
use crate::types::{EntityTable, MandateStatus, MandateType, TimeStamp};

/// Stand-in entity id while the financial record is not known. The host rejects 0/NULL.
pub const PENDING_ENTITY_ID: u64 = u32::MAX as u64;

/// Width of the host's mandate `source` column.
pub const MAX_SOURCE_LEN: usize = 64;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Mandate {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub reference: String, // correlation key until the record id is known
    #[n(2)]
    pub mandate_type: MandateType,
    #[n(3)]
    pub status: MandateStatus,
    #[n(4)]
    pub creditor_id: u64,
    #[n(5)]
    pub contact_id: Option<u64>,
    #[n(6)]
    pub iban: String,
    #[n(7)]
    pub bic: Option<String>,
    #[n(8)]
    pub currency: String,
    #[n(9)]
    pub entity_table: EntityTable,
    #[n(10)]
    pub entity_id: u64,
    #[n(11)]
    pub source: String,
    #[n(12)]
    pub is_enabled: bool,
    #[n(13)]
    pub creation_date: Option<TimeStamp>,
    #[n(14)]
    pub validation_date: Option<TimeStamp>,
    #[n(15)]
    pub date: Option<TimeStamp>, // signature / activation date
}

/// Everything the host needs to create a mandate; it assigns id and reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMandate {
    pub mandate_type: MandateType,
    pub status: MandateStatus,
    pub creditor_id: u64,
    pub contact_id: Option<u64>,
    pub iban: String,
    pub bic: Option<String>,
    pub currency: String,
    pub entity_table: EntityTable,
    pub entity_id: u64,
    pub source: String,
    pub creation_date: TimeStamp,
}

impl NewMandate {
    /// A PARTIAL mandate not yet linked to any financial record.
    pub fn provisional(
        mandate_type: MandateType,
        creditor: &Creditor,
        contact_id: Option<u64>,
        iban: String,
        bic: Option<String>,
        source: &str,
        now: TimeStamp,
    ) -> Self {
        Self {
            mandate_type,
            status: MandateStatus::Partial,
            creditor_id: creditor.id,
            contact_id,
            iban,
            bic,
            currency: creditor.currency.clone(),
            entity_table: mandate_type.entity_table(),
            entity_id: PENDING_ENTITY_ID,
            source: truncate_source(source),
            creation_date: now,
        }
    }
}

pub fn truncate_source(source: &str) -> String {
    source.chars().take(MAX_SOURCE_LEN).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationPolicy {
    ActivateImmediately,
    AwaitValidation,
}

impl ActivationPolicy {
    pub fn for_creditor(creditor: &Creditor) -> Self {
        if creditor.mandate_active {
            ActivationPolicy::ActivateImmediately
        } else {
            ActivationPolicy::AwaitValidation
        }
    }

    pub fn status_for(&self, mandate_type: MandateType) -> MandateStatus {
        match (self, mandate_type) {
            (ActivationPolicy::AwaitValidation, _) => MandateStatus::Init,
            (ActivationPolicy::ActivateImmediately, MandateType::Ooff) => MandateStatus::Ooff,
            (ActivationPolicy::ActivateImmediately, MandateType::Rcur) => MandateStatus::Frst,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, ActivationPolicy::ActivateImmediately)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MandateState {
    Provisional(MandateType),
    Finalized(MandateType, MandateStatus),
}

/// Field changes for a stored mandate; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MandateUpdate {
    pub entity_id: Option<u64>,
    pub status: Option<MandateStatus>,
    pub is_enabled: Option<bool>,
    pub contact_id: Option<u64>,
    pub creation_date: Option<TimeStamp>,
    pub validation_date: Option<TimeStamp>,
    pub date: Option<TimeStamp>,
}

impl Mandate {
    pub fn state(&self) -> MandateState {
        if self.status == MandateStatus::Partial || self.entity_id == PENDING_ENTITY_ID {
            MandateState::Provisional(self.mandate_type)
        } else {
            MandateState::Finalized(self.mandate_type, self.status)
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self.state(), MandateState::Provisional(_))
    }

    /// The update that links this mandate to `record_id` under `policy`.
    ///
    /// Timestamps are only filled when still empty, so computing and applying
    /// the finalization again with the same record leaves the mandate unchanged.
    pub fn finalization(
        &self,
        record_id: u64,
        policy: ActivationPolicy,
        now: TimeStamp,
    ) -> Result<MandateUpdate, SepaError> {
        if record_id == PENDING_ENTITY_ID || record_id == 0 {
            return Err(SepaError::WorkflowOrdering(format!(
                "mandate [{}] cannot be linked to placeholder record id {record_id}",
                self.id
            )));
        }
        if !self.is_provisional() && self.entity_id != record_id {
            return Err(SepaError::WorkflowOrdering(format!(
                "mandate [{}] is already linked to record [{}], refusing to relink to [{record_id}]",
                self.id, self.entity_id
            )));
        }

        let mut update = MandateUpdate {
            entity_id: Some(record_id),
            status: Some(policy.status_for(self.mandate_type)),
            is_enabled: Some(policy.is_enabled()),
            ..Default::default()
        };
        if self.creation_date.is_none() {
            update.creation_date = Some(now);
        }
        if policy.is_enabled() {
            if self.validation_date.is_none() {
                update.validation_date = Some(now);
            }
            if self.date.is_none() {
                update.date = Some(now);
            }
        }
        Ok(update)
    }

    pub fn apply(&mut self, update: &MandateUpdate) {
        if let Some(entity_id) = update.entity_id {
            self.entity_id = entity_id;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(is_enabled) = update.is_enabled {
            self.is_enabled = is_enabled;
        }
        if let Some(contact_id) = update.contact_id {
            self.contact_id = Some(contact_id);
        }
        if let Some(ts) = update.creation_date {
            self.creation_date = Some(ts);
        }
        if let Some(ts) = update.validation_date {
            self.validation_date = Some(ts);
        }
        if let Some(ts) = update.date {
            self.date = Some(ts);
        }
    }
}
