//! Ordering properties of the proof queue.

use proptest::prelude::*;
use std::sync::Arc;
use trustproof_core::{ManualClock, Priority, ProofType};
use trustproof_pipeline::{ProofQueue, ProofRequest, QueueConfig};

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

fn queue(max_queue_size: usize) -> ProofQueue {
    ProofQueue::new(
        QueueConfig {
            max_queue_size,
            max_concurrent: usize::MAX,
            history_size: 10,
        },
        Arc::new(ManualClock::new(0)),
    )
}

proptest! {
    /// Dequeue order equals a stable sort by descending priority
    #[test]
    fn dequeue_is_stable_priority_order(priorities in prop::collection::vec(priority(), 0..60)) {
        let mut queue = queue(100);
        for (i, p) in priorities.iter().enumerate() {
            queue
                .enqueue(ProofRequest::new(format!("r{}", i), vec![], ProofType::Exact, *p))
                .unwrap();
        }

        let mut expected: Vec<(Priority, usize)> =
            priorities.iter().copied().enumerate().map(|(i, p)| (p, i)).collect();
        expected.sort_by(|a, b| b.0.cmp(&a.0));

        let mut actual = Vec::new();
        while let Some(request) = queue.dequeue() {
            let index: usize = request.id[1..].parse().unwrap();
            actual.push((request.priority, index));
        }
        prop_assert_eq!(actual, expected);
    }

    /// Capacity is never exceeded
    #[test]
    fn capacity_is_enforced(capacity in 1usize..20, extra in 1usize..10) {
        let mut queue = queue(capacity);
        for i in 0..capacity {
            let result = queue.enqueue(ProofRequest::new(
                format!("r{}", i),
                vec![],
                ProofType::Exact,
                Priority::Normal,
            ));
            prop_assert!(result.is_ok());
        }
        for i in 0..extra {
            let result = queue.enqueue(ProofRequest::new(
                format!("x{}", i),
                vec![],
                ProofType::Exact,
                Priority::Critical,
            ));
            prop_assert!(result.is_err());
        }
        prop_assert_eq!(queue.queued_len(), capacity);
    }
}
