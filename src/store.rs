//! Embedded `SepaHost` backed by sled
//!
//! Records are CBOR encoded and keyed by their big-endian id, one tree per
//! entity. Useful as a standalone store and as the host in scenario tests.
use sled::{Batch, Db, Tree};
use std::path::Path;

use crate::creditor::Creditor;
use crate::error::HostError;
use crate::host::{
    Contribution, ContributionUpdate, Notification, RecurringContribution, RecurringUpdate,
    SepaHost,
};
use crate::logging::TARGET;
use crate::mandate::{Mandate, MandateUpdate, NewMandate};
use crate::types::MandateStatus;

/// A booking the host made against a contribution (money considered received).
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FinancialTransaction {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub contribution_id: u64,
    #[n(2)]
    pub amount: u64,
}

pub struct SledHost {
    db: Db,
    creditors: Tree,
    mandates: Tree,
    contributions: Tree,
    recurring: Tree,
    financial_trxn: Tree,
    notifications: Tree,
}

impl SledHost {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HostError> {
        Self::new(sled::open(path)?)
    }

    pub fn new(db: Db) -> Result<Self, HostError> {
        Ok(Self {
            creditors: db.open_tree("creditors")?,
            mandates: db.open_tree("mandates")?,
            contributions: db.open_tree("contributions")?,
            recurring: db.open_tree("recurring")?,
            financial_trxn: db.open_tree("financial_trxn")?,
            notifications: db.open_tree("notifications")?,
            db,
        })
    }

    fn next_id(&self) -> Result<u64, HostError> {
        // sled ids start at 0, the host treats 0 as "no record"
        Ok(self.db.generate_id()? + 1)
    }

    pub fn add_creditor(&self, creditor: &Creditor) -> Result<(), HostError> {
        put(&self.creditors, "creditor", creditor.id, creditor)
    }

    pub fn remove_creditor(&self, id: u64) -> Result<(), HostError> {
        self.creditors.remove(key(id))?;
        Ok(())
    }

    /// Store a contribution under a freshly generated id.
    pub fn add_contribution(&self, mut contribution: Contribution) -> Result<Contribution, HostError> {
        contribution.id = self.next_id()?;
        put(&self.contributions, "contribution", contribution.id, &contribution)?;
        Ok(contribution)
    }

    pub fn add_recurring_contribution(
        &self,
        mut recurring: RecurringContribution,
    ) -> Result<RecurringContribution, HostError> {
        recurring.id = self.next_id()?;
        put(&self.recurring, "recurring contribution", recurring.id, &recurring)?;
        Ok(recurring)
    }

    pub fn record_financial_transaction(
        &self,
        contribution_id: u64,
        amount: u64,
    ) -> Result<u64, HostError> {
        let trxn = FinancialTransaction {
            id: self.next_id()?,
            contribution_id,
            amount,
        };
        put(&self.financial_trxn, "financial transaction", trxn.id, &trxn)?;
        Ok(trxn.id)
    }

    pub fn financial_transactions(
        &self,
        contribution_id: u64,
    ) -> Result<Vec<FinancialTransaction>, HostError> {
        let all: Vec<FinancialTransaction> = scan(&self.financial_trxn, "financial transaction")?;
        Ok(all
            .into_iter()
            .filter(|t| t.contribution_id == contribution_id)
            .collect())
    }

    pub fn mandates(&self) -> Result<Vec<Mandate>, HostError> {
        scan(&self.mandates, "mandate")
    }

    pub fn notifications(&self) -> Result<Vec<Notification>, HostError> {
        scan(&self.notifications, "notification")
    }
}

impl SepaHost for SledHost {
    fn creditor(&self, id: u64) -> Result<Creditor, HostError> {
        get(&self.creditors, "creditor", id)
    }

    fn create_mandate(&self, mandate: NewMandate) -> Result<Mandate, HostError> {
        if mandate.iban.is_empty() {
            return Err(HostError::Persistence("Mandate has no IBAN".into()));
        }
        if mandate.entity_id == 0 {
            return Err(HostError::Persistence(
                "Mandate entity_id must not be empty".into(),
            ));
        }
        let creditor = match self.creditor(mandate.creditor_id) {
            Ok(creditor) => creditor,
            Err(HostError::NotFound { .. }) => {
                return Err(HostError::Persistence(format!(
                    "Creditor [{}] does not exist",
                    mandate.creditor_id
                )));
            }
            Err(err) => return Err(err),
        };

        let id = self.next_id()?;
        let stored = Mandate {
            id,
            reference: format!("{}-{}-{:06}", creditor.mandate_prefix, creditor.id, id),
            mandate_type: mandate.mandate_type,
            status: mandate.status,
            creditor_id: mandate.creditor_id,
            contact_id: mandate.contact_id,
            iban: mandate.iban,
            bic: mandate.bic,
            currency: mandate.currency,
            entity_table: mandate.entity_table,
            entity_id: mandate.entity_id,
            source: mandate.source,
            is_enabled: false,
            creation_date: Some(mandate.creation_date),
            validation_date: None,
            date: None,
        };
        put(&self.mandates, "mandate", id, &stored)?;
        Ok(stored)
    }

    fn mandate(&self, id: u64) -> Result<Mandate, HostError> {
        get(&self.mandates, "mandate", id)
    }

    fn mandates_with_status(&self, status: MandateStatus) -> Result<Vec<Mandate>, HostError> {
        Ok(self
            .mandates()?
            .into_iter()
            .filter(|m| m.status == status)
            .collect())
    }

    fn update_mandate(&self, id: u64, update: &MandateUpdate) -> Result<Mandate, HostError> {
        let mut mandate = self.mandate(id)?;
        mandate.apply(update);
        put(&self.mandates, "mandate", id, &mandate)?;
        Ok(mandate)
    }

    fn delete_mandate(&self, id: u64) -> Result<(), HostError> {
        match self.mandates.remove(key(id))? {
            Some(_) => Ok(()),
            None => Err(not_found("mandate", id)),
        }
    }

    fn contribution(&self, id: u64) -> Result<Contribution, HostError> {
        get(&self.contributions, "contribution", id)
    }

    fn find_contribution(&self, trxn_id: &str) -> Result<Option<Contribution>, HostError> {
        let all: Vec<Contribution> = scan(&self.contributions, "contribution")?;
        Ok(all
            .into_iter()
            .find(|c| c.trxn_id.as_deref() == Some(trxn_id)))
    }

    fn update_contribution(&self, id: u64, update: &ContributionUpdate) -> Result<(), HostError> {
        let mut contribution = self.contribution(id)?;
        if let Some(status) = update.status {
            contribution.status = status;
        }
        if let Some(instrument) = update.payment_instrument {
            contribution.payment_instrument = instrument;
        }
        if let Some(date) = update.receive_date {
            contribution.receive_date = date;
        }
        if let Some(trxn_id) = &update.trxn_id {
            contribution.trxn_id = Some(trxn_id.clone());
        }
        if let Some(pay_later) = update.is_pay_later {
            contribution.is_pay_later = pay_later;
        }
        put(&self.contributions, "contribution", id, &contribution)
    }

    fn recurring_contribution(&self, id: u64) -> Result<RecurringContribution, HostError> {
        get(&self.recurring, "recurring contribution", id)
    }

    fn find_recurring_contribution(
        &self,
        trxn_id: &str,
    ) -> Result<Option<RecurringContribution>, HostError> {
        let all: Vec<RecurringContribution> = scan(&self.recurring, "recurring contribution")?;
        Ok(all
            .into_iter()
            .find(|r| r.trxn_id.as_deref() == Some(trxn_id)))
    }

    fn update_recurring_contribution(
        &self,
        id: u64,
        update: &RecurringUpdate,
    ) -> Result<(), HostError> {
        let mut recurring = self.recurring_contribution(id)?;
        if let Some(status) = update.status {
            recurring.status = status;
        }
        if let Some(instrument) = update.payment_instrument {
            recurring.payment_instrument = instrument;
        }
        if let Some(date) = update.start_date {
            recurring.start_date = date;
        }
        if let Some(date) = update.end_date {
            recurring.end_date = Some(date);
        }
        if let Some(day) = update.cycle_day {
            recurring.cycle_day = day;
        }
        if let Some(trxn_id) = &update.trxn_id {
            recurring.trxn_id = Some(trxn_id.clone());
        }
        put(&self.recurring, "recurring contribution", id, &recurring)
    }

    fn delete_financial_transactions(&self, contribution_id: u64) -> Result<usize, HostError> {
        let doomed = self.financial_transactions(contribution_id)?;

        let mut batch = Batch::default();
        for trxn in &doomed {
            batch.remove(key(trxn.id).to_vec());
        }
        self.financial_trxn.apply_batch(batch)?;

        Ok(doomed.len())
    }

    fn notify(&self, notification: Notification) {
        let stored = self
            .next_id()
            .and_then(|id| put(&self.notifications, "notification", id, &notification));
        if let Err(err) = stored {
            tracing::error!(target: TARGET, error = %err, ?notification, "failed to record notification");
        }
    }
}

fn key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn not_found(entity: &'static str, id: u64) -> HostError {
    HostError::NotFound {
        entity,
        key: id.to_string(),
    }
}

fn put<T: minicbor::Encode<()>>(
    tree: &Tree,
    entity: &'static str,
    id: u64,
    value: &T,
) -> Result<(), HostError> {
    let bytes = minicbor::to_vec(value).map_err(|e| HostError::Codec {
        entity,
        message: e.to_string(),
    })?;
    tree.insert(key(id), bytes)?;
    Ok(())
}

fn get<T>(tree: &Tree, entity: &'static str, id: u64) -> Result<T, HostError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    let bytes = tree.get(key(id))?.ok_or_else(|| not_found(entity, id))?;
    decode(entity, &bytes)
}

fn scan<T>(tree: &Tree, entity: &'static str) -> Result<Vec<T>, HostError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.iter()
        .map(|item| {
            let (_, bytes) = item?;
            decode(entity, &bytes)
        })
        .collect()
}

fn decode<T>(entity: &'static str, bytes: &[u8]) -> Result<T, HostError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| HostError::Codec {
        entity,
        message: e.to_string(),
    })
}
