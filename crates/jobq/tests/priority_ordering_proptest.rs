//! Property test for testable property 2: the next claimed job for a type
//! always minimizes (priority ascending, then createdAt ascending), ties
//! broken by stable insertion order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobq::{FnProcessor, MemoryRepository, Priority, Queue};
use proptest::prelude::*;
use uuid::Uuid;

fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Critical),
        Just(Priority::High),
        Just(Priority::Medium),
        Just(Priority::Normal),
        Just(Priority::Low),
    ]
}

async fn run_case(priorities: &[Priority]) -> (Vec<Uuid>, Vec<Uuid>) {
    let queue = Queue::create(Arc::new(MemoryRepository::new())).await.unwrap();

    // Insertion order is the tie-break, so record it alongside id.
    let mut inserted = Vec::new();
    for priority in priorities {
        let job = queue.create_job("t", Some(*priority), None).await.unwrap();
        inserted.push((job.id(), *priority));
    }

    let mut expected = inserted.clone();
    expected.sort_by(|a, b| a.1.cmp(&b.1));
    let expected_ids: Vec<_> = expected.into_iter().map(|(id, _)| id).collect();

    let observed = Arc::new(Mutex::new(Vec::new()));
    let recorded = observed.clone();
    queue
        .process(
            "t",
            Arc::new(FnProcessor(move |job| {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().unwrap().push(job.id());
                    Ok(None)
                }
            })),
            1,
        )
        .await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while observed.lock().unwrap().len() < expected_ids.len() {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let observed_ids = observed.lock().unwrap().clone();
    (observed_ids, expected_ids)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn dispatch_order_matches_priority_then_insertion_order(
        priorities in prop::collection::vec(priority_strategy(), 1..12)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (observed_ids, expected_ids) = rt.block_on(run_case(&priorities));
        prop_assert_eq!(observed_ids, expected_ids);
    }
}
