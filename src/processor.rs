//! The direct debit payment processor
//!
//! A `SepaProcessor` is an ordinary value built per request from the processor
//! configuration and settings. Payment submission creates a provisional mandate
//! and parks it in [`PendingMandates`]; completion settles it once the host has
//! created the contribution.
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

use crate::correlator::{CorrelationToken, PendingMandate, PendingMandates};
use crate::creditor::{Creditor, CreditorBinding, creditor_for_mandate, resolve_creditor};
use crate::error::{HostError, SepaError};
use crate::host::{ContributionUpdate, RecurringUpdate, SepaHost};
use crate::logging::{AUDIT_TARGET, TARGET};
use crate::mandate::{Mandate, NewMandate};
use crate::schedule::{CollectionSchedule, FormDefaults};
use crate::settings::SepaSettings;
use crate::settlement::Settlement;
use crate::types::{BillingMode, Day, Frequency, MandateType};
use crate::utils::{account_fingerprint, normalise_account};
use crate::verify::{AccountVerifier, StandardVerifier, verify_account};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub id: u64,
    pub name: String,
    pub creditor_id: Option<u64>,
    pub billing_mode: BillingMode,
}

impl ProcessorConfig {
    pub fn new(id: u64, name: &str, creditor_id: u64) -> Self {
        Self {
            id,
            name: name.into(),
            creditor_id: Some(creditor_id),
            billing_mode: BillingMode::Form,
        }
    }

    pub fn with_billing_mode(mut self, billing_mode: BillingMode) -> Self {
        self.billing_mode = billing_mode;
        self
    }
}

/// The fields a checkout hands over for one payment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: u64, // minor units
    pub iban: String,
    pub bic: Option<String>,
    pub is_recurring: bool,
    pub contact_id: Option<u64>,
    /// The contribution, when the host created it before the payment step.
    pub contribution_id: Option<u64>,
    pub recurring_id: Option<u64>,
    pub creditor_id: Option<u64>,
    pub frequency: Option<Frequency>,
    pub installments: Option<u32>,
    pub description: String,
    /// Caller-chosen token; one is generated when absent.
    pub correlation_token: Option<CorrelationToken>,
}

impl PaymentRequest {
    pub fn one_off(amount: u64, iban: &str) -> Self {
        Self {
            amount,
            iban: iban.into(),
            ..Default::default()
        }
    }

    pub fn recurring(amount: u64, iban: &str, frequency: Frequency, installments: Option<u32>) -> Self {
        Self {
            amount,
            iban: iban.into(),
            is_recurring: true,
            frequency: Some(frequency),
            installments,
            ..Default::default()
        }
    }

    pub fn with_bic(mut self, bic: &str) -> Self {
        self.bic = Some(bic.into());
        self
    }
    pub fn with_contact(mut self, contact_id: u64) -> Self {
        self.contact_id = Some(contact_id);
        self
    }
    pub fn with_contribution(mut self, contribution_id: u64) -> Self {
        self.contribution_id = Some(contribution_id);
        self
    }
    pub fn with_recurring(mut self, recurring_id: u64) -> Self {
        self.recurring_id = Some(recurring_id);
        self
    }
    pub fn with_creditor(mut self, creditor_id: u64) -> Self {
        self.creditor_id = Some(creditor_id);
        self
    }
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.into();
        self
    }
    pub fn with_token(mut self, token: CorrelationToken) -> Self {
        self.correlation_token = Some(token);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Hand this to [`SepaProcessor::complete_transaction`].
    pub token: CorrelationToken,
    pub mandate_id: u64,
    pub reference: String,
    pub collection_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Nothing to collect, the payment counts as done.
    Completed,
    /// A provisional mandate waits for the contribution.
    Pending(Submission),
}

/// Form hints passed through from settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormHints {
    pub hide_bic: bool,
    pub hide_billing: bool,
}

pub struct SepaProcessor<H: SepaHost, V: AccountVerifier = StandardVerifier> {
    host: Arc<H>,
    verifier: V,
    config: ProcessorConfig,
    settings: SepaSettings,
    creditor: CreditorBinding,
    clock: Option<DateTime<Utc>>,
}

impl<H: SepaHost, V: AccountVerifier> SepaProcessor<H, V> {
    pub fn new(host: Arc<H>, verifier: V, config: ProcessorConfig, settings: SepaSettings) -> Self {
        let creditor = resolve_creditor(
            host.as_ref(),
            config.creditor_id,
            settings.default_creditor_id,
        );
        tracing::debug!(
            target: TARGET,
            processor = %config.name,
            creditor = ?creditor.creditor().map(|c| c.id),
            "payment processor ready"
        );
        Self {
            host,
            verifier,
            config,
            settings,
            creditor,
            clock: None,
        }
    }

    /// Pin "now" instead of reading the system clock.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn creditor(&self) -> &CreditorBinding {
        &self.creditor
    }

    pub fn schedule(&self) -> Result<CollectionSchedule, SepaError> {
        let creditor = self.creditor.require()?;
        Ok(CollectionSchedule::new(creditor, self.settings.buffer_days))
    }

    pub fn form_defaults(&self) -> Result<FormDefaults> {
        Ok(self.schedule()?.form_defaults(self.now().date_naive())?)
    }

    pub fn form_hints(&self) -> FormHints {
        FormHints {
            hide_bic: self.settings.hide_bic,
            hide_billing: self.settings.hide_billing,
        }
    }

    /// Cycle days a donor may choose from, ascending.
    pub fn cycle_day_options(&self) -> Result<Vec<u8>, SepaError> {
        let creditor = self.creditor.require()?;
        let mut days = creditor.validated_cycle_days()?.to_vec();
        days.sort_unstable();
        days.dedup();
        Ok(days)
    }

    /// A message describing why the processor cannot work, `None` when it can.
    pub fn check_config(&self) -> Option<String> {
        let creditor = match self.creditor.require() {
            Ok(creditor) => creditor,
            Err(err) => return Some(err.to_string()),
        };
        if self.config.billing_mode == BillingMode::Notify {
            return Some(unsupported_billing_mode().to_string());
        }
        creditor.validated_cycle_days().err().map(|e| e.to_string())
    }

    /// Submit a payment: verify the account and create a provisional mandate.
    pub fn do_payment(
        &self,
        request: &PaymentRequest,
        pending: &PendingMandates,
    ) -> Result<PaymentOutcome> {
        if request.amount == 0 {
            tracing::info!(target: TARGET, "zero amount, no mandate needed");
            return Ok(PaymentOutcome::Completed);
        }
        if self.config.billing_mode == BillingMode::Notify {
            return Err(unsupported_billing_mode().into());
        }

        let creditor = self.creditor.require()?;
        if let Some(requested) = request.creditor_id {
            if requested != creditor.id {
                return Err(SepaError::Configuration(format!(
                    "request names creditor [{requested}] but processor {} uses [{}]",
                    self.config.name, creditor.id
                ))
                .into());
            }
        }

        let iban = normalise_account(&request.iban);
        let bic = request
            .bic
            .as_deref()
            .map(normalise_account)
            .filter(|b| !b.is_empty());
        verify_account(&self.verifier, creditor.creditor_type, &iban, bic.as_deref())
            .map_err(|(field, message)| SepaError::Validation { field, message })?;

        let mandate_type = if request.is_recurring {
            MandateType::Rcur
        } else {
            MandateType::Ooff
        };
        let now = self.now();
        let schedule = CollectionSchedule::new(creditor, self.settings.buffer_days);
        let collection_date = match mandate_type {
            MandateType::Rcur => schedule.earliest_recurring_date(now.date_naive())?,
            MandateType::Ooff => schedule.earliest_ooff_date(now.date_naive())?,
        };

        let draft = NewMandate::provisional(
            mandate_type,
            creditor,
            request.contact_id,
            iban,
            bic,
            &request.description,
            now.into(),
        );
        let mandate = self.host.create_mandate(draft).map_err(|err| {
            tracing::error!(target: TARGET, error = %err, "mandate creation failed");
            SepaError::MandateCreation(err.to_string())
        })?;
        tracing::info!(
            target: AUDIT_TARGET,
            mandate_id = mandate.id,
            reference = %mandate.reference,
            mandate_type = %mandate.mandate_type,
            account = %account_fingerprint(&mandate.iban),
            "provisional mandate created"
        );

        let token = match &request.correlation_token {
            Some(token) => token.clone(),
            None => CorrelationToken::generate()?,
        };
        let parked = pending.begin_submission(
            &token,
            PendingMandate {
                mandate_id: mandate.id,
                reference: mandate.reference.clone(),
                mandate_type,
                creditor_id: creditor.id,
                contact_id: request.contact_id,
                record_id: request.contribution_id,
                recurring_id: request.recurring_id,
                installments: request.installments,
                collection_date,
                parked_at: now,
            },
        );
        if let Err(err) = parked {
            self.discard(&mandate);
            return Err(err.into());
        }

        // only stamp records once the submission owns its slot
        if let Err(err) = self.stamp_known_records(request, &mandate, collection_date) {
            pending.discard(&token, mandate.id);
            self.discard(&mandate);
            return Err(err.into());
        }

        Ok(PaymentOutcome::Pending(Submission {
            token,
            mandate_id: mandate.id,
            reference: mandate.reference,
            collection_date,
        }))
    }

    /// The host created the contribution for a submission after the payment step.
    pub fn attach_record(
        &self,
        token: &CorrelationToken,
        contribution_id: u64,
        pending: &PendingMandates,
    ) -> Result<()> {
        pending.attach_record_id(token, contribution_id)?;
        Ok(())
    }

    /// Payment completion hook. Settles the mandate parked under `token`.
    ///
    /// Returns `None` when nothing is pending for that token and contribution.
    pub fn complete_transaction(
        &self,
        token: &CorrelationToken,
        contribution_id: u64,
        pending: &PendingMandates,
    ) -> Result<Option<Mandate>> {
        let Some(parked) = pending.release(token, contribution_id) else {
            tracing::debug!(target: TARGET, %token, contribution_id, "no pending mandate");
            return Ok(None);
        };

        let settled = self.settle(&parked, contribution_id).inspect_err(|err| {
            tracing::error!(
                target: TARGET,
                mandate_id = parked.mandate_id,
                contribution_id,
                error = %err,
                "failed to finalize mandate"
            );
        })?;
        Ok(Some(settled))
    }

    fn settle(&self, parked: &PendingMandate, contribution_id: u64) -> Result<Mandate, SepaError> {
        let host = self.host.as_ref();
        let creditor = self.creditor_for(parked.creditor_id)?;
        let mandate = host.mandate(parked.mandate_id)?;
        let contribution = host.contribution(contribution_id)?;
        let settlement = Settlement::new(host, &creditor, self.settings.buffer_days, self.now());

        match mandate.mandate_type {
            MandateType::Ooff => settlement.one_off(&mandate, &contribution),
            MandateType::Rcur => {
                let recurring_id = parked
                    .recurring_id
                    .or(contribution.contribution_recur_id)
                    .ok_or_else(|| SepaError::NotFound {
                        entity: "recurring contribution",
                        key: mandate.reference.clone(),
                    })?;
                let mut recurring = host.recurring_contribution(recurring_id)?;
                if recurring.installments.is_none() {
                    recurring.installments = parked.installments;
                }
                settlement.recurring(&mandate, &contribution, &recurring)
            }
        }
    }

    fn creditor_for(&self, creditor_id: u64) -> Result<Creditor, SepaError> {
        match self.creditor.creditor() {
            Some(creditor) if creditor.id == creditor_id => Ok(creditor.clone()),
            _ => creditor_for_mandate(
                self.host.as_ref(),
                creditor_id,
                self.settings.default_creditor_id,
            ),
        }
    }

    // the correlation key lets the repair job find these records if completion never comes
    fn stamp_known_records(
        &self,
        request: &PaymentRequest,
        mandate: &Mandate,
        collection_date: NaiveDate,
    ) -> Result<(), SepaError> {
        if let Some(id) = request.contribution_id {
            self.host.update_contribution(
                id,
                &ContributionUpdate {
                    trxn_id: Some(mandate.reference.clone()),
                    receive_date: Some(Day::from(collection_date)),
                    ..Default::default()
                },
            )?;
        }
        if let Some(id) = request.recurring_id {
            self.host.update_recurring_contribution(
                id,
                &RecurringUpdate {
                    trxn_id: Some(mandate.reference.clone()),
                    start_date: Some(Day::from(collection_date)),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    fn discard(&self, mandate: &Mandate) {
        match self.host.delete_mandate(mandate.id) {
            Ok(()) => tracing::info!(
                target: AUDIT_TARGET,
                mandate_id = mandate.id,
                reference = %mandate.reference,
                "provisional mandate discarded"
            ),
            Err(HostError::NotFound { .. }) => {}
            Err(err) => tracing::error!(
                target: TARGET,
                mandate_id = mandate.id,
                error = %err,
                "could not discard provisional mandate"
            ),
        }
    }
}

fn unsupported_billing_mode() -> SepaError {
    SepaError::Configuration("Cannot handle Transfer payments".into())
}
