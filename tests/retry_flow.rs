//! End-to-end checks of the retry state machine, from dispatch outcome to
//! the decision the scheduler would persist.

use std::time::Duration;

use crawld::scheduler::job::{
    backoff_delay, decide_failure, truncate_error, FailureDisposition, MAX_ERROR_LEN,
};

/// Walks a job with max_retries = 3 through three consecutive failures:
/// two retries with growing backoff, then terminal failure on the third.
#[test]
fn three_strikes_with_exponential_backoff() {
    let base = 2.0;
    let unit = Duration::from_secs(60);
    let max_retries = 3;

    // First failure: retry after base^0 × unit = 1 minute.
    let first = decide_failure(0, max_retries, true, base, unit);
    assert_eq!(
        first,
        FailureDisposition::Retry {
            delay: Duration::from_secs(60)
        }
    );

    // Second failure: retry after base^1 × unit = 2 minutes.
    let second = decide_failure(1, max_retries, true, base, unit);
    assert_eq!(
        second,
        FailureDisposition::Retry {
            delay: Duration::from_secs(120)
        }
    );

    // Third failure exhausts the budget: terminal, never claimable again.
    let third = decide_failure(2, max_retries, true, base, unit);
    assert_eq!(third, FailureDisposition::Terminal);
}

/// Timeouts are terminal by default: the worker was killed at the deadline
/// and rerunning it would most likely burn another full timeout window.
#[test]
fn timeout_is_terminal_when_not_retriable() {
    let disposition = decide_failure(0, 3, false, 2.0, Duration::from_secs(60));
    assert_eq!(disposition, FailureDisposition::Terminal);
}

/// With retry_on_timeout enabled a timeout consumes retry budget like any
/// other failure.
#[test]
fn timeout_retries_when_configured_retriable() {
    let disposition = decide_failure(0, 3, true, 2.0, Duration::from_secs(60));
    assert!(matches!(disposition, FailureDisposition::Retry { .. }));
}

/// Backoff growth never exceeds the one-day ceiling, no matter how large
/// the retry budget is configured.
#[test]
fn backoff_never_exceeds_one_day() {
    let unit = Duration::from_secs(3600);
    let mut previous = Duration::ZERO;

    for retry_count in 0..50 {
        let delay = backoff_delay(3.0, unit, retry_count);
        assert!(delay <= Duration::from_secs(86_400));
        assert!(delay >= previous);
        previous = delay;
    }
}

/// Worker stderr can be arbitrarily large; the stored diagnostic is bounded
/// and cut on a character boundary even for multibyte output.
#[test]
fn stored_diagnostics_are_bounded() {
    let noisy = "é".repeat(MAX_ERROR_LEN * 2);
    let stored = truncate_error(&noisy);

    assert_eq!(stored.chars().count(), MAX_ERROR_LEN);
    assert!(stored.is_char_boundary(stored.len()));
}
