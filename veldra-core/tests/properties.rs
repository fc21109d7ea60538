//! Property tests for the bounded structures and the backoff formula.

use proptest::prelude::*;
use std::time::Duration;
use veldra_core::events::{DeadLetterQueue, Event, EventError};
use veldra_core::healing::{Supervisor, SupervisorConfig};

proptest! {
    #[test]
    fn backoff_matches_the_closed_form(
        count in 1u32..=20,
        initial_ms in 1u64..10_000,
        max_ms in 1u64..600_000,
    ) {
        let supervisor = Supervisor::new(SupervisorConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
            failure_threshold: 3,
            circuit_timeout: Duration::from_secs(30),
        });

        let expected = initial_ms
            .saturating_mul(1u64 << (count - 1))
            .min(max_ms);
        prop_assert_eq!(supervisor.backoff_for(count), Duration::from_millis(expected));
    }

    #[test]
    fn backoff_at_first_failure_equals_initial(initial_ms in 1u64..60_000) {
        let supervisor = Supervisor::new(SupervisorConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(initial_ms * 100),
            failure_threshold: 3,
            circuit_timeout: Duration::from_secs(30),
        });
        prop_assert_eq!(supervisor.backoff_for(1), Duration::from_millis(initial_ms));
    }

    #[test]
    fn dlq_never_exceeds_capacity(capacity in 1usize..50, pushes in 0usize..200) {
        let dlq = DeadLetterQueue::new(capacity);
        for n in 0..pushes {
            dlq.push(Event::new(format!("T{n}"), "prop"), "sub-1", EventError::new("boom"));
        }

        prop_assert!(dlq.size() <= capacity);
        prop_assert_eq!(dlq.total_failed(), pushes as u64);

        if pushes > capacity {
            // Oldest entries were evicted, so the head is the first
            // survivor.
            let head = dlq.snapshot()[0].event.event_type().to_string();
            prop_assert_eq!(head, format!("T{}", pushes - capacity));
        }
    }
}
