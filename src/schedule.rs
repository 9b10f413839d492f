//! Collection date scheduling
//!
//! SEPA rules require a notice period between mandate setup and the first
//! collection. Recurring collections additionally have to land on one of the
//! creditor's cycle days, one-off collections do not.
use chrono::{Datelike, Days, Months, NaiveDate};

use crate::creditor::{Creditor, validate_cycle_days};
use crate::error::SepaError;
use crate::types::{Frequency, FrequencyUnit};

/// Days taken off a projected end date so the last cycle is not collected twice.
pub const END_DATE_BACKOFF_DAYS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchedule {
    pub buffer_days: u32,
    pub frst_notice_days: u32,
    pub ooff_notice_days: u32,
    pub cycle_days: Vec<u8>,
}

/// Values a payment form shows next to the bank account fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormDefaults {
    pub earliest_rcur_date: NaiveDate,
    pub earliest_ooff_date: NaiveDate,
    pub earliest_cycle_day: u32,
}

impl CollectionSchedule {
    pub fn new(creditor: &Creditor, buffer_days: u32) -> Self {
        Self {
            buffer_days,
            frst_notice_days: creditor.frst_notice_days,
            ooff_notice_days: creditor.ooff_notice_days,
            cycle_days: creditor.cycle_days.clone(),
        }
    }

    /// today + FRST notice + buffer days, before cycle-day snapping.
    pub fn earliest_rcur_date(&self, today: NaiveDate) -> Result<NaiveDate, SepaError> {
        add_days(today, u64::from(self.frst_notice_days) + u64::from(self.buffer_days))
    }

    /// The first date a recurring collection may happen on.
    pub fn earliest_recurring_date(&self, today: NaiveDate) -> Result<NaiveDate, SepaError> {
        validate_cycle_days(&self.cycle_days)?;

        let mut date = self.earliest_rcur_date(today)?;
        // days 1-28 exist in every month, a month of steps always hits one
        for _ in 0..=31 {
            if self.cycle_days.contains(&(date.day() as u8)) {
                return Ok(date);
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        Err(SepaError::Configuration(format!(
            "no cycle day {:?} found after {date}",
            self.cycle_days
        )))
    }

    /// today + OOFF notice. One-off debits are not tied to a cycle day.
    pub fn earliest_ooff_date(&self, today: NaiveDate) -> Result<NaiveDate, SepaError> {
        add_days(today, u64::from(self.ooff_notice_days))
    }

    /// Move a requested one-off collection date forward to the earliest legal one.
    pub fn clamp_ooff_date(
        &self,
        requested: NaiveDate,
        today: NaiveDate,
    ) -> Result<NaiveDate, SepaError> {
        Ok(requested.max(self.earliest_ooff_date(today)?))
    }

    pub fn form_defaults(&self, today: NaiveDate) -> Result<FormDefaults, SepaError> {
        Ok(FormDefaults {
            earliest_rcur_date: self.earliest_rcur_date(today)?,
            earliest_ooff_date: self.earliest_ooff_date(today)?,
            earliest_cycle_day: self.earliest_recurring_date(today)?.day(),
        })
    }
}

/// End date for `installments` collections starting at `start`.
///
/// Moves forward `installments` full cycles, then back [`END_DATE_BACKOFF_DAYS`],
/// since that lands one cycle past the final collection. Months are added in one
/// step so a start on the 31st is not worn down by short months. Returns `None`
/// when the result leaves chrono's calendar range.
pub fn project_end_date(
    start: NaiveDate,
    frequency: Frequency,
    installments: u32,
) -> Option<NaiveDate> {
    let cycles = frequency.interval.checked_mul(installments)?;
    let end = match frequency.unit {
        FrequencyUnit::Day => start.checked_add_days(Days::new(u64::from(cycles))),
        FrequencyUnit::Week => start.checked_add_days(Days::new(u64::from(cycles) * 7)),
        FrequencyUnit::Month => start.checked_add_months(Months::new(cycles)),
        FrequencyUnit::Year => start.checked_add_months(Months::new(cycles.checked_mul(12)?)),
    }?;
    end.checked_sub_days(Days::new(END_DATE_BACKOFF_DAYS))
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate, SepaError> {
    date.checked_add_days(Days::new(days)).ok_or_else(|| {
        SepaError::Configuration(format!("notice of {days} days from {date} is past any calendar date"))
    })
}
