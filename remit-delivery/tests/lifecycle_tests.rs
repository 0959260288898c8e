//! End-to-end delivery lifecycle tests: publish, reconcile, fall back

use std::{sync::Arc, time::Duration};

use remit_common::{
    Channel, DeliveryAttempt, PostalAddress, ProviderStatus, ReasonCode, Recipient, Scheme,
    Statement,
};
use remit_delivery::{
    DeliveryConfig, DeliveryService, MemoryFileSource, PublishOutcome, RecordingNotifier,
    SimulatedProvider,
};
use remit_store::{DeliveryStore, SqliteDeliveryStore, TestDeliveryStore};

struct Fixture {
    store: TestDeliveryStore,
    provider: SimulatedProvider,
    files: MemoryFileSource,
    notifier: RecordingNotifier,
    service: DeliveryService,
}

fn config() -> DeliveryConfig {
    let mut config = DeliveryConfig::default();
    config.send_retry.max_attempts = 1;
    config.status_retry.max_attempts = 1;
    config.batch_size = 20;
    config
}

fn fixture() -> Fixture {
    let store = TestDeliveryStore::new();
    let provider = SimulatedProvider::default();
    let files = MemoryFileSource::new();
    let notifier = RecordingNotifier::new();

    let service = DeliveryService::new(
        &config(),
        Arc::new(store.clone()),
        Arc::new(provider.clone()),
        Arc::new(files.clone()),
        Some(Arc::new(notifier.clone())),
    )
    .unwrap();

    Fixture {
        store,
        provider,
        files,
        notifier,
        service,
    }
}

fn statement(files: &MemoryFileSource, document_reference: &str, scheme: &str) -> Statement {
    let filename = format!("{document_reference}.pdf");
    files.insert(filename.clone(), b"%PDF-1.7".as_slice());

    Statement {
        document_reference: document_reference.to_string(),
        recipient: Recipient {
            business_name: "Hill Farm".to_string(),
            frn: "1234567890".to_string(),
            sbi: Some("123456789".to_string()),
            email: Some("accounts@hillfarm.example".to_string()),
            address: PostalAddress {
                lines: vec!["Hill Farm".to_string(), "Ambridge".to_string()],
                postcode: Some("AB1 2CD".to_string()),
            },
        },
        scheme: Scheme {
            name: "Delinked Payments".to_string(),
            short_name: scheme.to_string(),
            year: 2024,
            frequency: "Annual".to_string(),
        },
        filename,
        transaction_date: None,
    }
}

fn attempts_for(store: &TestDeliveryStore, channel: Channel) -> Vec<DeliveryAttempt> {
    store
        .deliveries()
        .into_iter()
        .filter(|d| d.channel == channel)
        .collect()
}

async fn publish(fixture: &Fixture, document_reference: &str, scheme: &str) -> DeliveryAttempt {
    let outcome = fixture
        .service
        .dispatcher()
        .publish(statement(&fixture.files, document_reference, scheme))
        .await
        .unwrap();

    let PublishOutcome::Dispatched { delivery_id, .. } = outcome else {
        panic!("expected dispatch, got {outcome:?}");
    };
    fixture
        .store
        .deliveries()
        .into_iter()
        .find(|d| d.id == delivery_id)
        .unwrap()
}

async fn cycle(fixture: &Fixture) {
    fixture.service.checker().clear();
    let report = fixture
        .service
        .reconciliation()
        .run_cycle()
        .await
        .unwrap()
        .unwrap();
    assert!(report.outcome.errors.is_empty(), "{:?}", report.outcome.errors);
}

#[tokio::test]
async fn test_email_delivered() {
    let fixture = fixture();
    let email = publish(&fixture, "DOC-1", "DP").await;
    fixture
        .provider
        .set_status(email.reference.clone().unwrap(), ProviderStatus::Delivered);

    cycle(&fixture).await;

    let deliveries = fixture.store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(!deliveries[0].is_outstanding());
    assert!(fixture.store.failures().is_empty());
    assert!(fixture.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_permanent_failure_falls_back_then_letter_delivers() {
    let fixture = fixture();
    let email = publish(&fixture, "DOC-1", "DP").await;
    fixture.provider.set_status(
        email.reference.clone().unwrap(),
        ProviderStatus::PermanentFailure,
    );

    cycle(&fixture).await;

    let failures = fixture.store.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].delivery_id, email.id);
    assert_eq!(failures[0].reason, ReasonCode::Invalid);

    let letters = attempts_for(&fixture.store, Channel::Letter);
    assert_eq!(letters.len(), 1);
    assert!(letters[0].is_outstanding());
    assert_eq!(letters[0].statement_id, email.statement_id);
    assert!(letters[0].requested >= failures[0].failed);

    fixture.provider.set_status(
        letters[0].reference.clone().unwrap(),
        ProviderStatus::Delivered,
    );
    cycle(&fixture).await;

    assert!(
        fixture
            .store
            .deliveries()
            .iter()
            .all(|d| !d.is_outstanding())
    );
    assert_eq!(fixture.store.deliveries().len(), 2);

    let notifications = fixture.notifier.sent();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].frn, "1234567890");
    assert_eq!(notifications[0].message, "Invalid email address");
}

#[tokio::test]
async fn test_failure_without_fallback_scheme() {
    let fixture = fixture();
    let email = publish(&fixture, "DOC-1", "SFI").await;
    fixture.provider.set_status(
        email.reference.clone().unwrap(),
        ProviderStatus::TemporaryFailure,
    );

    cycle(&fixture).await;

    let deliveries = fixture.store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(!deliveries[0].is_outstanding());
    assert_eq!(fixture.store.failures()[0].reason, ReasonCode::Rejected);
    assert_eq!(fixture.provider.sends().len(), 1);
}

#[tokio::test]
async fn test_letter_temporary_failure_is_final() {
    let fixture = fixture();
    let mut statement = statement(&fixture.files, "DOC-1", "DP");
    statement.recipient.email = None;
    fixture
        .service
        .dispatcher()
        .publish(statement)
        .await
        .unwrap();
    fixture
        .provider
        .set_status("DOC-1", ProviderStatus::TemporaryFailure);

    cycle(&fixture).await;

    let deliveries = fixture.store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].channel, Channel::Letter);
    assert!(!deliveries[0].is_outstanding());
    assert_eq!(fixture.store.failures()[0].reason, ReasonCode::Rejected);
}

#[tokio::test]
async fn test_technical_failure_reschedules_once() {
    let fixture = fixture();
    let email = publish(&fixture, "DOC-1", "DP").await;
    fixture.provider.set_status(
        email.reference.clone().unwrap(),
        ProviderStatus::TechnicalFailure,
    );

    cycle(&fixture).await;
    // The replacement has no status yet, so a second cycle changes nothing
    cycle(&fixture).await;

    let emails = attempts_for(&fixture.store, Channel::Email);
    assert_eq!(emails.len(), 2);
    assert!(!emails[0].is_outstanding());
    assert!(emails[1].is_outstanding());
    assert!(emails[1].requested >= emails[0].requested);
    assert!(attempts_for(&fixture.store, Channel::Letter).is_empty());
    assert!(fixture.store.failures().is_empty());
}

#[tokio::test]
async fn test_scan_calls_for_exact_pages() {
    let fixture = fixture();
    for n in 0..40 {
        publish(&fixture, &format!("DOC-{n}"), "SFI").await;
    }

    let report = fixture
        .service
        .reconciliation()
        .run_cycle()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.scan.total_processed, 40);
    assert_eq!(report.scan.batch_count, 2);
    assert_eq!(report.outcome.pending, 40);
    assert_eq!(fixture.store.scan_count(), 3);
}

#[tokio::test]
async fn test_status_lookups_are_cached_within_a_cycle_window() {
    let fixture = fixture();
    let email = publish(&fixture, "DOC-1", "SFI").await;
    let reference = email.reference.unwrap();
    let reconciliation = fixture.service.reconciliation();

    reconciliation.run_cycle().await.unwrap();
    reconciliation.run_cycle().await.unwrap();

    assert_eq!(fixture.provider.lookups(&reference), 1);
    assert_eq!(fixture.service.checker().stats().hits, 1);
}

#[tokio::test]
async fn test_cycle_failure_increments_error_count() {
    let fixture = fixture();
    let reconciliation = fixture.service.reconciliation();

    fixture.store.fail_next_scans(1);
    let delay = reconciliation.tick().await;

    assert_eq!(reconciliation.error_count(), 1);
    assert_eq!(delay, Duration::from_millis(1500));

    assert_eq!(reconciliation.tick().await, Duration::from_secs(60));
    assert_eq!(reconciliation.error_count(), 0);
}

#[tokio::test]
async fn test_loop_reconciles_in_background() {
    let fixture = fixture();
    let email = publish(&fixture, "DOC-1", "SFI").await;
    fixture
        .provider
        .set_status(email.reference.clone().unwrap(), ProviderStatus::Delivered);
    let commits = fixture.store.commit_count();

    let reconciliation = fixture.service.reconciliation();
    reconciliation.start();
    fixture
        .store
        .wait_for_commits(commits + 1, Duration::from_secs(5))
        .await
        .unwrap();
    reconciliation.stop().await;

    assert!(!fixture.store.deliveries()[0].is_outstanding());
    assert!(!fixture.service.checker().is_sweeping());
}

#[tokio::test]
async fn test_lifecycle_on_sqlite() {
    let store = Arc::new(SqliteDeliveryStore::open_in_memory().unwrap());
    let provider = SimulatedProvider::default();
    let files = MemoryFileSource::new();
    let service = DeliveryService::new(
        &config(),
        Arc::clone(&store) as Arc<dyn DeliveryStore>,
        Arc::new(provider.clone()),
        Arc::new(files.clone()),
        None,
    )
    .unwrap();

    let outcome = service
        .dispatcher()
        .publish(statement(&files, "DOC-1", "DP"))
        .await
        .unwrap();
    let PublishOutcome::Dispatched {
        statement_id,
        delivery_id,
        ..
    } = outcome
    else {
        panic!("expected dispatch, got {outcome:?}");
    };

    let email = store.delivery(delivery_id).await.unwrap();
    provider.set_status(
        email.reference.clone().unwrap(),
        ProviderStatus::PermanentFailure,
    );
    service.reconciliation().run_cycle().await.unwrap();

    let attempts = store.deliveries_for(statement_id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].is_outstanding());
    assert_eq!(attempts[1].channel, Channel::Letter);
    assert!(attempts[1].is_outstanding());

    let failure = store.failure(delivery_id).await.unwrap().unwrap();
    assert_eq!(failure.reason, ReasonCode::Invalid);

    let duplicate = service
        .dispatcher()
        .publish(statement(&files, "DOC-1", "DP"))
        .await
        .unwrap();
    assert!(matches!(duplicate, PublishOutcome::Duplicate { .. }));
}
