//! Properties of the retry backoff and the send limiter

use agent::client::RetryPolicy;
use agent::RateLimiter;
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #[test]
    fn backoff_is_monotone_and_capped(
        step_ms in 1u64..1_000,
        cap_ms in 1u64..5_000,
        retry in 1u32..50,
    ) {
        let policy = RetryPolicy {
            max_retries: 3,
            step: Duration::from_millis(step_ms),
            max_delay: Duration::from_millis(cap_ms),
        };

        let current = policy.backoff_delay(retry);
        let next = policy.backoff_delay(retry + 1);
        prop_assert!(current <= next);
        prop_assert!(next <= policy.max_delay);
        prop_assert_eq!(
            current,
            Duration::from_millis((step_ms * retry as u64).min(cap_ms))
        );
    }

    #[test]
    fn held_permits_never_exceed_limit(limit in 0usize..16, wanted in 0usize..32) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let held = rt.block_on(async {
            let limiter = RateLimiter::new(limit);
            let mut permits = Vec::new();
            for _ in 0..wanted {
                match tokio::time::timeout(Duration::from_millis(5), limiter.acquire()).await {
                    Ok(Ok(permit)) => permits.push(permit),
                    _ => break,
                }
            }
            let held = permits.len();
            assert_eq!(limiter.available(), limiter.limit() - held);
            drop(permits);
            assert_eq!(limiter.available(), limiter.limit());
            held
        });

        prop_assert_eq!(held, wanted.min(limit.max(1)));
    }
}
