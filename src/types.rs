//! Shared SEPA vocabulary: mandate types and statuses, instruments, dates
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MandateType {
    #[n(0)]
    Ooff,
    #[n(1)]
    Rcur,
}

impl MandateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MandateType::Ooff => "OOFF",
            MandateType::Rcur => "RCUR",
        }
    }
    /// The kind of financial record a mandate of this type points at.
    pub fn entity_table(&self) -> EntityTable {
        match self {
            MandateType::Ooff => EntityTable::Contribution,
            MandateType::Rcur => EntityTable::ContributionRecur,
        }
    }
}

impl fmt::Display for MandateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Host-owned enumeration. This crate only ever writes Init, Partial, Ooff and Frst.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MandateStatus {
    #[n(0)]
    Init,
    #[n(1)]
    Partial,
    #[n(2)]
    Ooff,
    #[n(3)]
    Frst,
    #[n(4)]
    Rcur,
    #[n(5)]
    Sent,
    #[n(6)]
    Complete,
    #[n(7)]
    Onhold,
    #[n(8)]
    Invalid,
}

impl MandateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MandateStatus::Init => "INIT",
            MandateStatus::Partial => "PARTIAL",
            MandateStatus::Ooff => "OOFF",
            MandateStatus::Frst => "FRST",
            MandateStatus::Rcur => "RCUR",
            MandateStatus::Sent => "SENT",
            MandateStatus::Complete => "COMPLETE",
            MandateStatus::Onhold => "ONHOLD",
            MandateStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for MandateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityTable {
    #[n(0)]
    Contribution,
    #[n(1)]
    ContributionRecur,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentInstrument {
    #[n(0)]
    Ooff,
    #[n(1)]
    Frst,
    #[n(2)]
    Rcur,
    // anything the host attached before SEPA took over (card, cash, ...)
    #[n(3)]
    Other,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Completed,
    #[n(2)]
    InProgress,
    #[n(3)]
    Cancelled,
    #[n(4)]
    Failed,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyUnit {
    #[n(0)]
    Day,
    #[n(1)]
    Week,
    #[n(2)]
    Month,
    #[n(3)]
    Year,
}

impl FromStr for FrequencyUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(FrequencyUnit::Day),
            "week" => Ok(FrequencyUnit::Week),
            "month" => Ok(FrequencyUnit::Month),
            "year" => Ok(FrequencyUnit::Year),
            other => Err(format!("unknown frequency unit '{other}'")),
        }
    }
}

/// One collection cycle, e.g. "every 3 months".
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frequency {
    #[n(0)]
    pub unit: FrequencyUnit,
    #[n(1)]
    pub interval: u32,
}

impl Frequency {
    pub fn new(unit: FrequencyUnit, interval: u32) -> Self {
        Self { unit, interval }
    }
    pub fn monthly() -> Self {
        Self::new(FrequencyUnit::Month, 1)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditorType {
    // IBAN/BIC rules
    #[n(0)]
    Sepa,
    // payment service provider codes instead of bank accounts
    #[n(1)]
    Psp,
}

/// How the payment processor interacts with the checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingMode {
    Form,
    Button,
    Notify,
}

impl BillingMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(BillingMode::Form),
            2 => Some(BillingMode::Button),
            4 => Some(BillingMode::Notify),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A calendar date as stored on financial records (receive, start and end dates).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Day(NaiveDate);

impl Day {
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for Day {
    fn from(value: NaiveDate) -> Self {
        Day(value)
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl<C> minicbor::Encode<C> for Day {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Day {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(Day)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert day number to a calendar date",
            ))
    }
}
