//! Repair job for mandates left in PARTIAL status
//!
//! A checkout that never reached payment completion leaves its provisional
//! mandate behind. The sweep links such mandates to the contribution found
//! under their reference, or deletes them when the checkout was abandoned.
//! One failing mandate never stops the sweep.
use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

use crate::correlator::PendingMandates;
use crate::creditor::creditor_for_mandate;
use crate::error::SepaError;
use crate::host::SepaHost;
use crate::logging::{AUDIT_TARGET, TARGET};
use crate::mandate::Mandate;
use crate::settings::SepaSettings;
use crate::settlement::Settlement;
use crate::types::{MandateStatus, MandateType};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Mandates now linked to their financial record.
    pub linked: Vec<u64>,
    /// Mandates of abandoned checkouts.
    pub deleted: Vec<u64>,
    pub failed: Vec<(u64, String)>,
}

enum Repair {
    Linked,
    Deleted,
}

pub struct PartialMandateReconciler<H: SepaHost> {
    host: Arc<H>,
    settings: SepaSettings,
    clock: Option<DateTime<Utc>>,
}

impl<H: SepaHost> PartialMandateReconciler<H> {
    pub fn new(host: Arc<H>, settings: SepaSettings) -> Self {
        Self {
            host,
            settings,
            clock: None,
        }
    }

    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    /// Sweep, then drop pending entries for mandates the sweep resolved and
    /// entries parked longer than `pending_max_age_hours`.
    pub fn run_and_prune(&self, pending: &PendingMandates) -> Result<ReconcileReport> {
        let report = self.run()?;

        let resolved: Vec<u64> = report.linked.iter().chain(&report.deleted).copied().collect();
        let forgotten = pending.forget_mandates(&resolved);
        let max_age = TimeDelta::hours(i64::from(self.settings.pending_max_age_hours));
        let expired = pending.expire_older_than(self.now(), max_age);

        tracing::info!(
            target: TARGET,
            forgotten,
            expired = expired.len(),
            remaining = pending.len(),
            "pending mandates pruned"
        );
        Ok(report)
    }

    pub fn run(&self) -> Result<ReconcileReport> {
        let partial = self.host.mandates_with_status(MandateStatus::Partial)?;
        tracing::info!(target: TARGET, count = partial.len(), "reconciling partial mandates");

        let mut report = ReconcileReport::default();
        for mandate in &partial {
            match self.repair(mandate) {
                Ok(Repair::Linked) => report.linked.push(mandate.id),
                Ok(Repair::Deleted) => report.deleted.push(mandate.id),
                Err(err) => {
                    tracing::error!(
                        target: TARGET,
                        mandate_id = mandate.id,
                        reference = %mandate.reference,
                        error = %err,
                        "could not reconcile partial mandate"
                    );
                    report.failed.push((mandate.id, err.to_string()));
                }
            }
        }

        tracing::info!(
            target: TARGET,
            linked = report.linked.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "partial mandate sweep done"
        );
        Ok(report)
    }

    fn repair(&self, mandate: &Mandate) -> Result<Repair, SepaError> {
        let host = self.host.as_ref();
        let contribution = host.find_contribution(&mandate.reference)?;

        match mandate.mandate_type {
            MandateType::Ooff => {
                let Some(contribution) = contribution else {
                    return self.abandon(mandate, "no contribution");
                };
                self.settlement(mandate, |s| s.one_off(mandate, &contribution))
            }
            MandateType::Rcur => {
                let recurring = host.find_recurring_contribution(&mandate.reference)?;
                let (Some(contribution), Some(recurring)) = (contribution, recurring) else {
                    return self.abandon(mandate, "contribution or recurring contribution missing");
                };
                self.settlement(mandate, |s| s.recurring(mandate, &contribution, &recurring))
            }
        }
    }

    fn settlement(
        &self,
        mandate: &Mandate,
        settle: impl FnOnce(&Settlement<'_, H>) -> Result<Mandate, SepaError>,
    ) -> Result<Repair, SepaError> {
        let host = self.host.as_ref();
        let creditor =
            creditor_for_mandate(host, mandate.creditor_id, self.settings.default_creditor_id)?;
        settle(&Settlement::new(host, &creditor, self.settings.buffer_days, self.now()))?;
        Ok(Repair::Linked)
    }

    fn abandon(&self, mandate: &Mandate, reason: &str) -> Result<Repair, SepaError> {
        self.host.delete_mandate(mandate.id)?;
        tracing::info!(
            target: AUDIT_TARGET,
            mandate_id = mandate.id,
            reference = %mandate.reference,
            reason,
            "partial mandate deleted"
        );
        Ok(Repair::Deleted)
    }
}
