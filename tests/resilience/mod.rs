use staking_indexer::{
    pipeline::resilience::{
        BatchDirective, ErrorDecision, ResilienceConfig, ResilienceController, SourceMode,
    },
    receiver::SourceError,
};
use std::time::{Duration, Instant};

fn unavailable() -> SourceError {
    SourceError::Unavailable("archive timed out".into())
}

fn direct_controller(now: Instant) -> ResilienceController {
    let mut controller = ResilienceController::default();
    for _ in 0..3 {
        controller.on_source_error(&unavailable(), now);
    }
    assert_eq!(controller.mode(), SourceMode::Direct);
    controller
}

#[test]
fn switches_to_direct_at_threshold() {
    let mut controller = ResilienceController::default();
    let now = Instant::now();
    let delay = Duration::from_secs(5);

    assert_eq!(controller.mode(), SourceMode::Bulk);
    assert_eq!(controller.on_source_error(&unavailable(), now), ErrorDecision::RetryAfter(delay));
    assert_eq!(controller.on_source_error(&unavailable(), now), ErrorDecision::RetryAfter(delay));
    assert_eq!(controller.on_source_error(&unavailable(), now), ErrorDecision::SwitchToDirect);
    assert_eq!(controller.mode(), SourceMode::Direct);
    assert_eq!(controller.failure_count(), 0);

    // direct mode retries without changing mode
    assert_eq!(controller.on_source_error(&unavailable(), now), ErrorDecision::RetryAfter(delay));
    assert_eq!(controller.mode(), SourceMode::Direct);
}

#[test]
fn historical_batches_return_to_bulk_periodically() {
    let start = Instant::now();
    let mut controller = direct_controller(start);

    assert_eq!(controller.on_batch(500, start + Duration::from_secs(10)), BatchDirective::Process);
    assert_eq!(controller.mode(), SourceMode::Direct);

    let later = start + Duration::from_secs(5 * 60);
    assert_eq!(controller.on_batch(500, later), BatchDirective::RestartWithBulk);
    assert_eq!(controller.mode(), SourceMode::Bulk);

    // bulk batches are always processed
    assert_eq!(controller.on_batch(500, later), BatchDirective::Process);
}

#[test]
fn live_batches_stay_direct() {
    let start = Instant::now();
    let mut controller = direct_controller(start);
    let later = start + Duration::from_secs(3600);

    assert_eq!(controller.on_batch(100, later), BatchDirective::Process);
    assert_eq!(controller.on_batch(1, later), BatchDirective::Process);
    assert_eq!(controller.mode(), SourceMode::Direct);
}

#[test]
fn reconciliation_is_rate_limited_until_done() {
    let start = Instant::now();
    let mut controller = direct_controller(start);

    assert!(!controller.should_reconcile(101, start));
    assert!(controller.should_reconcile(1, start));
    assert!(!controller.should_reconcile(1, start + Duration::from_secs(30)));
    assert!(controller.should_reconcile(1, start + Duration::from_secs(60)));

    controller.mark_reconciled();
    assert!(controller.is_reconciled());
    assert!(!controller.should_reconcile(1, start + Duration::from_secs(3600)));
}

#[test]
fn bulk_mode_never_reconciles() {
    let mut controller = ResilienceController::default();
    assert!(!controller.should_reconcile(1, Instant::now()));
}

#[test]
fn custom_thresholds() {
    let config = ResilienceConfig {
        failure_threshold: 1,
        retry_delay_millis: 10,
        bulk_retry_interval_secs: 0,
        historical_block_threshold: 5,
        reconcile_interval_secs: 0,
    };
    let mut controller = ResilienceController::new(config);
    let now = Instant::now();

    assert_eq!(controller.on_source_error(&unavailable(), now), ErrorDecision::SwitchToDirect);
    assert_eq!(controller.on_batch(6, now), BatchDirective::RestartWithBulk);
    assert_eq!(
        controller.on_source_error(&unavailable(), now),
        ErrorDecision::SwitchToDirect
    );
    assert_eq!(controller.on_batch(5, now), BatchDirective::Process);
}
