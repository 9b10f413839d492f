//! Linking a provisional mandate to its financial records
//!
//! Used by payment completion and by the partial mandate repair job. Nothing
//! has been collected at this point, so records go back to Pending, carry the
//! SEPA instrument tag and the legal collection date, and lose any financial
//! transactions the host booked prematurely.
use chrono::{DateTime, Datelike, Utc};

use crate::creditor::Creditor;
use crate::error::SepaError;
use crate::host::{
    Contribution, ContributionUpdate, Notification, RecurringContribution, RecurringUpdate,
    SepaHost,
};
use crate::logging::AUDIT_TARGET;
use crate::mandate::{ActivationPolicy, Mandate};
use crate::schedule::{CollectionSchedule, project_end_date};
use crate::types::{ContributionStatus, Day, MandateType, PaymentInstrument};

pub struct Settlement<'a, H: SepaHost + ?Sized> {
    host: &'a H,
    policy: ActivationPolicy,
    schedule: CollectionSchedule,
    now: DateTime<Utc>,
}

impl<'a, H: SepaHost + ?Sized> Settlement<'a, H> {
    pub fn new(host: &'a H, creditor: &Creditor, buffer_days: u32, now: DateTime<Utc>) -> Self {
        Self {
            host,
            policy: ActivationPolicy::for_creditor(creditor),
            schedule: CollectionSchedule::new(creditor, buffer_days),
            now,
        }
    }

    /// Settle an OOFF mandate against its contribution.
    pub fn one_off(
        &self,
        mandate: &Mandate,
        contribution: &Contribution,
    ) -> Result<Mandate, SepaError> {
        expect_type(mandate, MandateType::Ooff)?;

        let today = self.now.date_naive();
        let receive_date = self
            .schedule
            .clamp_ooff_date(contribution.receive_date.date(), today)?;

        self.host.update_contribution(
            contribution.id,
            &ContributionUpdate {
                status: Some(ContributionStatus::Pending),
                payment_instrument: Some(PaymentInstrument::Ooff),
                receive_date: Some(Day::from(receive_date)),
                is_pay_later: Some(false),
                ..Default::default()
            },
        )?;
        tracing::info!(
            target: AUDIT_TARGET,
            contribution_id = contribution.id,
            %receive_date,
            "contribution set to Pending/OOFF"
        );
        self.drop_bookings(contribution.id)?;

        self.finalize(mandate, contribution.id, contribution.contact_id)
    }

    /// Settle an RCUR mandate: the contribution becomes the first installment
    /// of `recurring`, both moved to the first legal collection date.
    pub fn recurring(
        &self,
        mandate: &Mandate,
        contribution: &Contribution,
        recurring: &RecurringContribution,
    ) -> Result<Mandate, SepaError> {
        expect_type(mandate, MandateType::Rcur)?;

        let start = self
            .schedule
            .earliest_recurring_date(self.now.date_naive())?;
        let end = recurring
            .installments
            .filter(|n| *n > 0)
            .and_then(|n| project_end_date(start, recurring.frequency, n));

        self.host.update_contribution(
            contribution.id,
            &ContributionUpdate {
                status: Some(ContributionStatus::Pending),
                payment_instrument: Some(PaymentInstrument::Frst),
                receive_date: Some(Day::from(start)),
                ..Default::default()
            },
        )?;
        self.host.update_recurring_contribution(
            recurring.id,
            &RecurringUpdate {
                status: Some(ContributionStatus::Pending),
                payment_instrument: Some(PaymentInstrument::Frst),
                start_date: Some(Day::from(start)),
                end_date: end.map(Day::from),
                cycle_day: Some(start.day()),
                ..Default::default()
            },
        )?;
        tracing::info!(
            target: AUDIT_TARGET,
            contribution_id = contribution.id,
            contribution_recur_id = recurring.id,
            start_date = %start,
            end_date = ?end,
            "recurring contribution set to Pending/FRST"
        );
        self.drop_bookings(contribution.id)?;

        let settled = self.finalize(mandate, recurring.id, recurring.contact_id)?;

        self.host.notify(Notification::RecurringStarted {
            contact_id: recurring.contact_id,
            contribution_recur_id: recurring.id,
            contribution_page_id: contribution.contribution_page_id,
        });
        self.host.notify(Notification::InstallmentCreated {
            mandate_id: settled.id,
            contribution_recur_id: recurring.id,
            contribution_id: contribution.id,
        });

        Ok(settled)
    }

    fn drop_bookings(&self, contribution_id: u64) -> Result<(), SepaError> {
        let removed = self.host.delete_financial_transactions(contribution_id)?;
        if removed > 0 {
            tracing::info!(
                target: AUDIT_TARGET,
                contribution_id,
                removed,
                "financial transactions removed"
            );
        }
        Ok(())
    }

    fn finalize(
        &self,
        mandate: &Mandate,
        record_id: u64,
        contact_id: u64,
    ) -> Result<Mandate, SepaError> {
        let mut update = mandate.finalization(record_id, self.policy, self.now.into())?;
        if mandate.contact_id.is_none() {
            update.contact_id = Some(contact_id);
        }
        let settled = self.host.update_mandate(mandate.id, &update)?;
        tracing::info!(
            target: AUDIT_TARGET,
            mandate_id = settled.id,
            reference = %settled.reference,
            entity_id = settled.entity_id,
            status = %settled.status,
            enabled = settled.is_enabled,
            "mandate finalized"
        );
        Ok(settled)
    }
}

fn expect_type(mandate: &Mandate, expected: MandateType) -> Result<(), SepaError> {
    if mandate.mandate_type != expected {
        return Err(SepaError::WorkflowOrdering(format!(
            "mandate [{}] is {}, cannot settle as {expected}",
            mandate.id, mandate.mandate_type
        )));
    }
    Ok(())
}
