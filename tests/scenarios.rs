use anyhow::Context;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

use sepa_direct_debit::creditor::{Creditor, CreditorBinding};
use sepa_direct_debit::host::{Contribution, Notification, RecurringContribution, SepaHost};
use sepa_direct_debit::mandate::PENDING_ENTITY_ID;
use sepa_direct_debit::processor::Submission;
use sepa_direct_debit::settings::SepaSettings;
use sepa_direct_debit::store::SledHost;
use sepa_direct_debit::types::{
    BillingMode, ContributionStatus, Day, EntityTable, Frequency, MandateStatus, PaymentInstrument,
};
use sepa_direct_debit::verify::StandardVerifier;
use sepa_direct_debit::{
    CorrelationToken, PaymentOutcome, PaymentRequest, PendingMandates, ProcessorConfig,
    SepaError, SepaProcessor,
};

const IBAN: &str = "DE89370400440532013000";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn creditor() -> Creditor {
    Creditor::new(1, "DE98ZZZ09999999999", "Friends of the Earth").with_notice_days(5, 3)
}

// Each test gets its own sled database in a temp dir; sled locks the directory.
fn host(name: &str, creditors: &[Creditor]) -> anyhow::Result<(TempDir, Arc<SledHost>)> {
    let temp_dir = tempdir()?;
    let host = SledHost::open(temp_dir.path().join(name))?;
    for creditor in creditors {
        host.add_creditor(creditor)?;
    }
    Ok((temp_dir, Arc::new(host)))
}

fn processor(
    host: &Arc<SledHost>,
    config: ProcessorConfig,
    settings: SepaSettings,
) -> SepaProcessor<SledHost> {
    SepaProcessor::new(host.clone(), StandardVerifier, config, settings).with_clock(now())
}

fn contribution(contact_id: u64, recur_id: Option<u64>) -> Contribution {
    Contribution {
        id: 0,
        contact_id,
        trxn_id: None,
        receive_date: Day::from(ymd(2025, 3, 10)),
        status: ContributionStatus::Completed,
        payment_instrument: PaymentInstrument::Other,
        total_amount: 2_500,
        currency: "EUR".into(),
        source: "Online donation".into(),
        is_pay_later: false,
        contribution_recur_id: recur_id,
        contribution_page_id: Some(3),
        campaign_id: None,
    }
}

fn pending_submission(outcome: PaymentOutcome) -> anyhow::Result<Submission> {
    match outcome {
        PaymentOutcome::Pending(submission) => Ok(submission),
        PaymentOutcome::Completed => anyhow::bail!("expected a pending submission"),
    }
}

fn sepa_error(err: &anyhow::Error) -> &SepaError {
    err.downcast_ref::<SepaError>().expect("a SepaError")
}

#[test]
fn one_off_payment_round_trip() -> anyhow::Result<()> {
    let (_dir, host) = host("one_off_round_trip.db", &[creditor()])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());
    let pending = PendingMandates::new();

    let request = PaymentRequest::one_off(2_500, "de89 3704 0044 0532 0130 00")
        .with_contact(77)
        .with_description("Online donation");
    let submission = pending_submission(processor.do_payment(&request, &pending)?)?;
    assert_eq!(submission.collection_date, ymd(2025, 3, 13));

    let provisional = host.mandate(submission.mandate_id)?;
    assert_eq!(provisional.status, MandateStatus::Partial);
    assert_eq!(provisional.entity_id, PENDING_ENTITY_ID);
    assert_eq!(provisional.iban, IBAN);

    // the host books the contribution after the payment step returns
    let booked = host.add_contribution(contribution(77, None))?;
    host.record_financial_transaction(booked.id, 2_500)?;
    processor.attach_record(&submission.token, booked.id, &pending)?;

    let mandate = processor
        .complete_transaction(&submission.token, booked.id, &pending)
        .context("completion failed: ")?
        .context("nothing was pending")?;

    assert_eq!(mandate.entity_id, booked.id);
    assert_eq!(mandate.status, MandateStatus::Ooff);
    assert!(mandate.is_enabled);
    assert!(mandate.validation_date.is_some());

    let stored = host.contribution(booked.id)?;
    assert_eq!(stored.status, ContributionStatus::Pending);
    assert_eq!(stored.payment_instrument, PaymentInstrument::Ooff);
    assert_eq!(stored.receive_date.date(), ymd(2025, 3, 13));
    assert!(host.financial_transactions(booked.id)?.is_empty());

    // consumed exactly once
    assert_eq!(processor.complete_transaction(&submission.token, booked.id, &pending)?, None);
    Ok(())
}

#[test]
fn recurring_payment_awaiting_validation() -> anyhow::Result<()> {
    let creditor = creditor()
        .with_mandate_active(false)
        .with_cycle_days([1, 15]);
    let (_dir, host) = host("recurring_awaiting.db", &[creditor])?;
    let settings = SepaSettings {
        buffer_days: 2,
        ..Default::default()
    };
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), settings);
    let pending = PendingMandates::new();

    let recurring = host.add_recurring_contribution(RecurringContribution {
        id: 0,
        contact_id: 77,
        trxn_id: None,
        amount: 1_000,
        currency: "EUR".into(),
        frequency: Frequency::monthly(),
        installments: Some(12),
        start_date: Day::from(ymd(2025, 3, 10)),
        end_date: None,
        cycle_day: 10,
        status: ContributionStatus::InProgress,
        payment_instrument: PaymentInstrument::Other,
    })?;
    let first = host.add_contribution(contribution(77, Some(recurring.id)))?;

    let request = PaymentRequest::recurring(1_000, IBAN, Frequency::monthly(), Some(12))
        .with_bic("COKSDE33")
        .with_contact(77)
        .with_contribution(first.id)
        .with_recurring(recurring.id);
    let submission = pending_submission(processor.do_payment(&request, &pending)?)?;

    // 2025-03-10 + 5 notice + 2 buffer = 2025-03-17, next cycle day is April 1st
    assert_eq!(submission.collection_date, ymd(2025, 4, 1));
    assert_eq!(
        host.contribution(first.id)?.trxn_id.as_deref(),
        Some(submission.reference.as_str())
    );

    let mandate = processor
        .complete_transaction(&submission.token, first.id, &pending)?
        .context("nothing was pending")?;
    assert_eq!(mandate.entity_table, EntityTable::ContributionRecur);
    assert_eq!(mandate.entity_id, recurring.id);
    assert_eq!(mandate.status, MandateStatus::Init);
    assert!(!mandate.is_enabled);
    assert!(mandate.date.is_none());

    let stored = host.recurring_contribution(recurring.id)?;
    assert_eq!(stored.start_date.date(), ymd(2025, 4, 1));
    assert_eq!(stored.cycle_day, 1);
    assert_eq!(stored.end_date.map(|d| d.date()), Some(ymd(2026, 3, 27)));
    assert_eq!(stored.status, ContributionStatus::Pending);
    assert_eq!(stored.payment_instrument, PaymentInstrument::Frst);

    assert_eq!(
        host.notifications()?,
        vec![
            Notification::RecurringStarted {
                contact_id: 77,
                contribution_recur_id: recurring.id,
                contribution_page_id: Some(3),
            },
            Notification::InstallmentCreated {
                mandate_id: mandate.id,
                contribution_recur_id: recurring.id,
                contribution_id: first.id,
            },
        ]
    );
    Ok(())
}

#[test]
fn zero_amount_is_completed_without_mandate() -> anyhow::Result<()> {
    let (_dir, host) = host("zero_amount.db", &[creditor()])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());
    let pending = PendingMandates::new();

    let outcome = processor.do_payment(&PaymentRequest::one_off(0, IBAN), &pending)?;

    assert_eq!(outcome, PaymentOutcome::Completed);
    assert!(host.mandates()?.is_empty());
    assert!(pending.is_empty());
    Ok(())
}

#[test]
fn invalid_iban_is_a_field_error() -> anyhow::Result<()> {
    let (_dir, host) = host("invalid_iban.db", &[creditor()])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());

    let err = processor
        .do_payment(&PaymentRequest::one_off(500, "DE89370400440532013001"), &PendingMandates::new())
        .unwrap_err();

    match sepa_error(&err) {
        SepaError::Validation { field, .. } => assert_eq!(*field, "iban"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(host.mandates()?.is_empty());
    Ok(())
}

#[test]
fn transfer_billing_mode_is_refused() -> anyhow::Result<()> {
    let (_dir, host) = host("transfer_mode.db", &[creditor()])?;
    let config = ProcessorConfig::new(1, "SEPA", 1).with_billing_mode(BillingMode::Notify);
    let processor = processor(&host, config, SepaSettings::default());

    let err = processor
        .do_payment(&PaymentRequest::one_off(500, IBAN), &PendingMandates::new())
        .unwrap_err();

    assert!(sepa_error(&err).is_configuration());
    assert!(err.to_string().contains("Cannot handle Transfer payments"));
    Ok(())
}

#[test]
fn missing_creditor_falls_back_to_default() -> anyhow::Result<()> {
    let (_dir, host) = host("fallback_creditor.db", &[creditor()])?;
    let settings = SepaSettings {
        default_creditor_id: Some(1),
        ..Default::default()
    };
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 9), settings);

    assert!(matches!(processor.creditor(), CreditorBinding::Fallback(c) if c.id == 1));
    let outcome = processor.do_payment(&PaymentRequest::one_off(500, IBAN), &PendingMandates::new())?;
    assert!(matches!(outcome, PaymentOutcome::Pending(_)));
    Ok(())
}

#[test]
fn inert_processor_refuses_payments() -> anyhow::Result<()> {
    let (_dir, host) = host("inert.db", &[])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());

    assert_eq!(processor.creditor(), &CreditorBinding::Inert);
    assert!(processor.check_config().is_some());

    let err = processor
        .do_payment(&PaymentRequest::one_off(500, IBAN), &PendingMandates::new())
        .unwrap_err();
    assert!(sepa_error(&err).is_configuration());
    Ok(())
}

#[test]
fn foreign_creditor_in_request_is_refused() -> anyhow::Result<()> {
    let (_dir, host) = host("foreign_creditor.db", &[creditor()])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());

    let request = PaymentRequest::one_off(500, IBAN).with_creditor(2);
    let err = processor.do_payment(&request, &PendingMandates::new()).unwrap_err();

    assert!(sepa_error(&err).is_configuration());
    Ok(())
}

#[test]
fn empty_cycle_days_fail_before_any_mandate() -> anyhow::Result<()> {
    let (_dir, host) = host("empty_cycle_days.db", &[creditor().with_cycle_days([])])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());

    let request = PaymentRequest::recurring(500, IBAN, Frequency::monthly(), None);
    let err = processor.do_payment(&request, &PendingMandates::new()).unwrap_err();

    assert!(sepa_error(&err).is_configuration());
    assert!(host.mandates()?.is_empty());
    Ok(())
}

#[test]
fn interleaved_checkouts_under_one_token_collide() -> anyhow::Result<()> {
    let (_dir, host) = host("collision.db", &[creditor()])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());
    let pending = PendingMandates::new();
    let token = CorrelationToken::from("checkout-1");

    let first = host.add_contribution(contribution(77, None))?;
    let second = host.add_contribution(contribution(78, None))?;

    let request = PaymentRequest::one_off(500, IBAN).with_token(token.clone());
    processor.do_payment(&request.clone().with_contribution(first.id), &pending)?;
    let err = processor
        .do_payment(&request.with_contribution(second.id), &pending)
        .unwrap_err();

    assert!(sepa_error(&err).is_workflow_ordering());
    // the second provisional mandate was discarded again
    assert_eq!(host.mandates()?.len(), 1);
    // and the second contribution never saw its reference
    let untouched = host.contribution(second.id)?;
    assert_eq!(untouched.trxn_id, None);
    assert_eq!(untouched.receive_date.date(), ymd(2025, 3, 10));
    assert!(processor.complete_transaction(&token, first.id, &pending)?.is_some());
    Ok(())
}

#[test]
fn failed_stamp_leaves_nothing_parked() -> anyhow::Result<()> {
    let (_dir, host) = host("failed_stamp.db", &[creditor()])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());
    let pending = PendingMandates::new();

    // the host never created contribution 404
    let request = PaymentRequest::one_off(500, IBAN).with_contribution(404);
    let err = processor.do_payment(&request, &pending).unwrap_err();

    assert!(matches!(sepa_error(&err), SepaError::Host(_)));
    assert!(pending.is_empty());
    assert!(host.mandates()?.is_empty());
    Ok(())
}

#[test]
fn mandate_creation_failure_keeps_host_message() -> anyhow::Result<()> {
    let (_dir, host) = host("creation_failure.db", &[creditor()])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());
    // creditor removed behind the processor's back
    host.remove_creditor(1)?;

    let err = processor
        .do_payment(&PaymentRequest::one_off(500, IBAN), &PendingMandates::new())
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Couldn't create SEPA mandate. Error was: Creditor [1] does not exist"
    );
    Ok(())
}

#[test]
fn unrelated_completion_is_ignored() -> anyhow::Result<()> {
    let (_dir, host) = host("unrelated_completion.db", &[creditor()])?;
    let processor = processor(&host, ProcessorConfig::new(1, "SEPA", 1), SepaSettings::default());
    let pending = PendingMandates::new();

    let unknown = CorrelationToken::generate()?;
    assert_eq!(processor.complete_transaction(&unknown, 12, &pending)?, None);
    Ok(())
}
