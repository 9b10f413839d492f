//! The host application as seen from the processor
//!
//! The host owns creditors, mandates and financial records. Everything the
//! processor reads or writes goes through [`SepaHost`]; calls are synchronous
//! and not retried here.
use crate::creditor::Creditor;
use crate::error::HostError;
use crate::mandate::{Mandate, MandateUpdate, NewMandate};
use crate::types::{ContributionStatus, Day, Frequency, MandateStatus, PaymentInstrument};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub contact_id: u64,
    #[n(2)]
    pub trxn_id: Option<String>, // carries the mandate reference
    #[n(3)]
    pub receive_date: Day,
    #[n(4)]
    pub status: ContributionStatus,
    #[n(5)]
    pub payment_instrument: PaymentInstrument,
    #[n(6)]
    pub total_amount: u64, // minor units
    #[n(7)]
    pub currency: String,
    #[n(8)]
    pub source: String,
    #[n(9)]
    pub is_pay_later: bool,
    #[n(10)]
    pub contribution_recur_id: Option<u64>,
    #[n(11)]
    pub contribution_page_id: Option<u64>,
    #[n(12)]
    pub campaign_id: Option<u64>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RecurringContribution {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub contact_id: u64,
    #[n(2)]
    pub trxn_id: Option<String>,
    #[n(3)]
    pub amount: u64,
    #[n(4)]
    pub currency: String,
    #[n(5)]
    pub frequency: Frequency,
    #[n(6)]
    pub installments: Option<u32>,
    #[n(7)]
    pub start_date: Day,
    #[n(8)]
    pub end_date: Option<Day>,
    #[n(9)]
    pub cycle_day: u32,
    #[n(10)]
    pub status: ContributionStatus,
    #[n(11)]
    pub payment_instrument: PaymentInstrument,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContributionUpdate {
    pub status: Option<ContributionStatus>,
    pub payment_instrument: Option<PaymentInstrument>,
    pub receive_date: Option<Day>,
    pub trxn_id: Option<String>,
    pub is_pay_later: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurringUpdate {
    pub status: Option<ContributionStatus>,
    pub payment_instrument: Option<PaymentInstrument>,
    pub start_date: Option<Day>,
    pub end_date: Option<Day>,
    pub cycle_day: Option<u32>,
    pub trxn_id: Option<String>,
}

/// Events downstream extensions subscribe to.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    #[n(0)]
    RecurringStarted {
        #[n(0)]
        contact_id: u64,
        #[n(1)]
        contribution_recur_id: u64,
        #[n(2)]
        contribution_page_id: Option<u64>,
    },
    #[n(1)]
    InstallmentCreated {
        #[n(0)]
        mandate_id: u64,
        #[n(1)]
        contribution_recur_id: u64,
        #[n(2)]
        contribution_id: u64,
    },
}

pub trait SepaHost {
    fn creditor(&self, id: u64) -> Result<Creditor, HostError>;

    /// Persist a new mandate; the host assigns id and reference.
    fn create_mandate(&self, mandate: NewMandate) -> Result<Mandate, HostError>;
    fn mandate(&self, id: u64) -> Result<Mandate, HostError>;
    fn mandates_with_status(&self, status: MandateStatus) -> Result<Vec<Mandate>, HostError>;
    fn update_mandate(&self, id: u64, update: &MandateUpdate) -> Result<Mandate, HostError>;
    fn delete_mandate(&self, id: u64) -> Result<(), HostError>;

    fn contribution(&self, id: u64) -> Result<Contribution, HostError>;
    /// Look a contribution up by its correlation key.
    fn find_contribution(&self, trxn_id: &str) -> Result<Option<Contribution>, HostError>;
    fn update_contribution(&self, id: u64, update: &ContributionUpdate) -> Result<(), HostError>;

    fn recurring_contribution(&self, id: u64) -> Result<RecurringContribution, HostError>;
    fn find_recurring_contribution(
        &self,
        trxn_id: &str,
    ) -> Result<Option<RecurringContribution>, HostError>;
    fn update_recurring_contribution(
        &self,
        id: u64,
        update: &RecurringUpdate,
    ) -> Result<(), HostError>;

    /// Drop financial transactions booked against a contribution; returns how many went.
    fn delete_financial_transactions(&self, contribution_id: u64) -> Result<usize, HostError>;

    /// Fire and forget.
    fn notify(&self, notification: Notification);
}
