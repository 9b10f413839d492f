//! Pending mandate handoff between payment submission and completion
//!
//! Submission and completion are separate callbacks fired by the host at
//! different points of the checkout. The mandate assembled during submission is
//! parked here under the [`CorrelationToken`] the caller carries from one
//! callback to the other, and is consumed exactly once on completion.
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::SepaError;
use crate::logging::{AUDIT_TARGET, TARGET};
use crate::types::MandateType;
use crate::utils::new_uuid_to_bech32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub fn generate() -> anyhow::Result<Self> {
        Ok(Self(new_uuid_to_bech32("sdd")?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What submission knows about a mandate that still waits for its financial record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMandate {
    pub mandate_id: u64,
    pub reference: String,
    pub mandate_type: MandateType,
    pub creditor_id: u64,
    pub contact_id: Option<u64>,
    /// The contribution, once the host has created it.
    pub record_id: Option<u64>,
    pub recurring_id: Option<u64>,
    pub installments: Option<u32>,
    pub collection_date: NaiveDate,
    /// When submission parked it. Abandoned checkouts are expired by age.
    pub parked_at: DateTime<Utc>,
}

impl PendingMandate {
    /// Take `newer`'s values, keeping ids only `self` knows.
    fn merge(&mut self, newer: PendingMandate) {
        let record_id = newer.record_id.or(self.record_id);
        let recurring_id = newer.recurring_id.or(self.recurring_id);
        let contact_id = newer.contact_id.or(self.contact_id);
        *self = PendingMandate {
            record_id,
            recurring_id,
            contact_id,
            ..newer
        };
    }
}

/// Pending mandates keyed by correlation token.
#[derive(Debug, Default)]
pub struct PendingMandates {
    slots: Mutex<HashMap<CorrelationToken, PendingMandate>>,
}

impl PendingMandates {
    pub fn new() -> Self {
        Self::default()
    }

    // every operation is a single map edit, a panicking holder cannot leave it half done
    fn slots(&self) -> MutexGuard<'_, HashMap<CorrelationToken, PendingMandate>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park `data` under `token`, merging into what is already there.
    ///
    /// Two submissions under one token that name different records are an error.
    pub fn begin_submission(
        &self,
        token: &CorrelationToken,
        data: PendingMandate,
    ) -> Result<(), SepaError> {
        let mut slots = self.slots();
        match slots.get_mut(token) {
            Some(existing) => {
                if let (Some(held), Some(incoming)) = (existing.record_id, data.record_id) {
                    if held != incoming {
                        let err = SepaError::WorkflowOrdering(format!(
                            "submission for record [{incoming}] interleaved with pending record [{held}] under token {token}"
                        ));
                        tracing::error!(target: TARGET, %token, error = %err, "pending mandate collision");
                        return Err(err);
                    }
                }
                existing.merge(data);
            }
            None => {
                slots.insert(token.clone(), data);
            }
        }
        Ok(())
    }

    /// Record the financial record the host created after submission.
    pub fn attach_record_id(
        &self,
        token: &CorrelationToken,
        record_id: u64,
    ) -> Result<(), SepaError> {
        let mut slots = self.slots();
        let result = match slots.get_mut(token) {
            None => Err(SepaError::WorkflowOrdering(format!(
                "record [{record_id}] reported before any submission under token {token}"
            ))),
            Some(pending) => match pending.record_id {
                Some(held) if held != record_id => Err(SepaError::WorkflowOrdering(format!(
                    "record [{record_id}] reported for token {token} already bound to record [{held}]"
                ))),
                _ => {
                    pending.record_id = Some(record_id);
                    Ok(())
                }
            },
        };
        if let Err(err) = &result {
            tracing::error!(target: TARGET, %token, error = %err, "cannot attach record id");
        }
        result
    }

    /// Hand out the pending mandate for `expected_record_id`, exactly once.
    ///
    /// `None` when nothing is parked under `token` or it belongs to another record;
    /// completion events for unrelated payments end up here all the time.
    pub fn release(
        &self,
        token: &CorrelationToken,
        expected_record_id: u64,
    ) -> Option<PendingMandate> {
        let mut slots = self.slots();
        let held = slots.get(token)?.record_id;
        if let Some(held) = held {
            if held != expected_record_id {
                tracing::error!(
                    target: TARGET,
                    %token,
                    held,
                    expected = expected_record_id,
                    "pending mandate belongs to another record, leaving it in place"
                );
                return None;
            }
        }

        let mut pending = slots.remove(token)?;
        pending.record_id = Some(expected_record_id);
        Some(pending)
    }

    /// Drop the entry under `token` if it still holds `mandate_id`.
    pub fn discard(&self, token: &CorrelationToken, mandate_id: u64) -> Option<PendingMandate> {
        let mut slots = self.slots();
        if slots.get(token)?.mandate_id != mandate_id {
            return None;
        }
        slots.remove(token)
    }

    /// Drop entries parked longer than `max_age` before `now`.
    pub fn expire_older_than(&self, now: DateTime<Utc>, max_age: TimeDelta) -> Vec<PendingMandate> {
        let mut slots = self.slots();
        let stale: Vec<CorrelationToken> = slots
            .iter()
            .filter(|(_, p)| now.signed_duration_since(p.parked_at) > max_age)
            .map(|(token, _)| token.clone())
            .collect();

        let expired: Vec<PendingMandate> = stale.iter().filter_map(|t| slots.remove(t)).collect();
        if !expired.is_empty() {
            tracing::info!(
                target: AUDIT_TARGET,
                expired = expired.len(),
                remaining = slots.len(),
                "abandoned pending mandates expired"
            );
        }
        expired
    }

    /// Drop entries for mandates settled or deleted elsewhere, e.g. by the repair job.
    pub fn forget_mandates(&self, mandate_ids: &[u64]) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, p| !mandate_ids.contains(&p.mandate_id));
        let forgotten = before - slots.len();
        if forgotten > 0 {
            tracing::debug!(target: TARGET, forgotten, "pending mandates forgotten");
        }
        forgotten
    }

    pub fn contains(&self, token: &CorrelationToken) -> bool {
        self.slots().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parked_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap()
    }

    fn pending(record_id: Option<u64>) -> PendingMandate {
        PendingMandate {
            mandate_id: 3,
            reference: "SEPA-1-000003".into(),
            mandate_type: MandateType::Ooff,
            creditor_id: 1,
            contact_id: Some(9),
            record_id,
            recurring_id: None,
            installments: None,
            collection_date: NaiveDate::from_ymd_opt(2025, 5, 2).unwrap(),
            parked_at: parked_at(),
        }
    }

    #[test]
    fn released_exactly_once() {
        let slots = PendingMandates::new();
        let token = CorrelationToken::from("t1");

        slots.begin_submission(&token, pending(None)).unwrap();
        slots.attach_record_id(&token, 42).unwrap();

        let released = slots.release(&token, 42).unwrap();
        assert_eq!(released.record_id, Some(42));
        assert_eq!(released.mandate_id, 3);
        assert_eq!(slots.release(&token, 42), None);
        assert!(slots.is_empty());
    }

    #[test]
    fn interleaved_submissions_collide() {
        let slots = PendingMandates::new();
        let token = CorrelationToken::from("t1");

        slots.begin_submission(&token, pending(Some(1))).unwrap();
        let err = slots.begin_submission(&token, pending(Some(2))).unwrap_err();
        assert!(err.is_workflow_ordering());
        // the first submission is untouched
        assert_eq!(slots.release(&token, 1).unwrap().record_id, Some(1));
    }

    #[test]
    fn resubmission_without_record_keeps_known_id() {
        let slots = PendingMandates::new();
        let token = CorrelationToken::from("t1");

        slots.begin_submission(&token, pending(Some(5))).unwrap();
        let mut again = pending(None);
        again.mandate_id = 4;
        slots.begin_submission(&token, again).unwrap();

        let released = slots.release(&token, 5).unwrap();
        assert_eq!(released.mandate_id, 4);
        assert_eq!(released.record_id, Some(5));
    }

    #[test]
    fn unrelated_release_is_benign() {
        let slots = PendingMandates::new();
        let token = CorrelationToken::from("t1");
        assert_eq!(slots.release(&token, 42), None);

        slots.begin_submission(&token, pending(Some(7))).unwrap();
        assert_eq!(slots.release(&token, 8), None);
        assert!(slots.contains(&token));
    }

    #[test]
    fn unknown_record_id_is_filled_on_release() {
        let slots = PendingMandates::new();
        let token = CorrelationToken::from("t1");
        slots.begin_submission(&token, pending(None)).unwrap();

        assert_eq!(slots.release(&token, 11).unwrap().record_id, Some(11));
    }

    #[test]
    fn attach_requires_submission_and_matching_id() {
        let slots = PendingMandates::new();
        let token = CorrelationToken::from("t1");
        assert!(slots.attach_record_id(&token, 1).unwrap_err().is_workflow_ordering());

        slots.begin_submission(&token, pending(Some(1))).unwrap();
        slots.attach_record_id(&token, 1).unwrap();
        assert!(slots.attach_record_id(&token, 2).unwrap_err().is_workflow_ordering());
    }

    #[test]
    fn tokens_do_not_interfere() {
        let slots = PendingMandates::new();
        let a = CorrelationToken::from("a");
        let b = CorrelationToken::from("b");

        slots.begin_submission(&a, pending(Some(1))).unwrap();
        slots.begin_submission(&b, pending(Some(2))).unwrap();

        assert_eq!(slots.len(), 2);
        assert!(slots.release(&b, 2).is_some());
        assert!(slots.release(&a, 1).is_some());
    }

    #[test]
    fn discard_only_removes_the_named_mandate() {
        let slots = PendingMandates::new();
        let token = CorrelationToken::from("t1");
        slots.begin_submission(&token, pending(Some(1))).unwrap();

        assert_eq!(slots.discard(&token, 4), None);
        assert!(slots.contains(&token));
        assert_eq!(slots.discard(&token, 3).unwrap().mandate_id, 3);
        assert!(slots.is_empty());
    }

    #[test]
    fn old_entries_expire() {
        let slots = PendingMandates::new();
        let old = CorrelationToken::from("old");
        let fresh = CorrelationToken::from("fresh");

        slots.begin_submission(&old, pending(Some(1))).unwrap();
        let mut recent = pending(Some(2));
        recent.parked_at = parked_at() + TimeDelta::hours(23);
        slots.begin_submission(&fresh, recent).unwrap();

        let now = parked_at() + TimeDelta::hours(25);
        let expired = slots.expire_older_than(now, TimeDelta::hours(24));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].record_id, Some(1));
        assert!(!slots.contains(&old));
        assert!(slots.contains(&fresh));
    }

    #[test]
    fn resubmission_refreshes_parked_at() {
        let slots = PendingMandates::new();
        let token = CorrelationToken::from("t1");
        slots.begin_submission(&token, pending(None)).unwrap();
        let mut again = pending(None);
        again.parked_at = parked_at() + TimeDelta::hours(30);
        slots.begin_submission(&token, again).unwrap();

        let now = parked_at() + TimeDelta::hours(31);
        assert!(slots.expire_older_than(now, TimeDelta::hours(24)).is_empty());
    }

    #[test]
    fn forgotten_mandates_leave_the_map() {
        let slots = PendingMandates::new();
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            let mut p = pending(None);
            p.mandate_id = i as u64;
            slots.begin_submission(&CorrelationToken::from(name), p).unwrap();
        }

        assert_eq!(slots.forget_mandates(&[0, 2, 9]), 2);
        assert_eq!(slots.len(), 1);
        assert!(slots.contains(&CorrelationToken::from("b")));
    }

    #[test]
    fn generated_tokens_are_distinct() {
        let a = CorrelationToken::generate().unwrap();
        let b = CorrelationToken::generate().unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sdd1"));
    }
}
