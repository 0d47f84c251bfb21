//! Scenario tests for the dispatch and lifecycle core, against the
//! in-memory repository.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobq::{EventKind, FnProcessor, JobState, MemoryRepository, Priority, Queue};

async fn wait_until<F: Fn() -> bool>(pred: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !pred() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn s1_priority_ordering() {
    let queue = Queue::create(Arc::new(MemoryRepository::new())).await.unwrap();

    let j1 = queue.create_job("t", Some(Priority::Normal), None).await.unwrap();
    let j2 = queue.create_job("t", Some(Priority::High), None).await.unwrap();
    let j3 = queue.create_job("t", Some(Priority::Normal), None).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let recorded = order.clone();
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

    wait_until(|| order.lock().unwrap().len() == 3, Duration::from_secs(2)).await;

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, vec![j2.id(), j1.id(), j3.id()]);
}

#[tokio::test]
async fn s2_fifo_handoff_goes_to_a_single_parked_worker() {
    let queue = Queue::create(Arc::new(MemoryRepository::new())).await.unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    queue
        .process(
            "t",
            Arc::new(FnProcessor(move |_job| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            })),
            2,
        )
        .await;

    // Give both workers time to park before the job exists.
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.create_job("t", None, None).await.unwrap();

    wait_until(|| invocations.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await;

    // The second worker has nothing left to do; invocation count stays at 1.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s3_still_interested_cancellation_leaves_job_inactive() {
    let queue = Queue::create(Arc::new(MemoryRepository::new())).await.unwrap();

    queue
        .process("t", Arc::new(FnProcessor(|_job| async move { Ok(None) })), 1)
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.shutdown(Duration::from_millis(100), Some("t")).await.ok();

    let job = queue.create_job("t", None, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(job.state().await, JobState::Inactive);
    let inactive = queue.list_jobs(Some(JobState::Inactive)).await.unwrap();
    assert_eq!(inactive.len(), 1);
    assert_eq!(inactive[0].id, job.id());
}

#[tokio::test]
async fn s4_crash_recovery_marks_only_active_jobs_as_failed() {
    let repo = Arc::new(MemoryRepository::new());

    fn record(state: JobState) -> jobq::JobRecord {
        let now = chrono::Utc::now();
        jobq::JobRecord {
            id: uuid::Uuid::new_v4(),
            job_type: "t".to_string(),
            priority: Priority::Normal,
            data: serde_json::Value::Null,
            state,
            created_at: now,
            updated_at: now,
            started_at: if state == JobState::Inactive { None } else { Some(now) },
            completed_at: None,
            failed_at: None,
            duration_ms: None,
            progress: None,
            logs: Vec::new(),
        }
    }

    let a = record(JobState::Active);
    let b = record(JobState::Inactive);
    let c = record(JobState::Complete);

    repo.insert(&a).await.unwrap();
    repo.insert(&b).await.unwrap();
    repo.insert(&c).await.unwrap();

    let queue = Queue::create(repo).await.unwrap();

    let a_after = queue.find_job(a.id).await.unwrap().unwrap();
    assert_eq!(a_after.state().await, JobState::Failure);
    assert!(a_after.record().await.logs.iter().any(|l| l.contains("unexpectedly terminated")));

    let b_after = queue.find_job(b.id).await.unwrap().unwrap();
    assert_eq!(b_after.state().await, JobState::Inactive);

    let c_after = queue.find_job(c.id).await.unwrap().unwrap();
    assert_eq!(c_after.state().await, JobState::Complete);
}

#[tokio::test]
async fn s5_shutdown_timeout_force_fails_running_job() {
    let queue = Queue::create(Arc::new(MemoryRepository::new())).await.unwrap();

    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let started_tx = Arc::new(Mutex::new(Some(started_tx)));
    queue
        .process(
            "t",
            Arc::new(FnProcessor(move |_job| {
                let started_tx = started_tx.clone();
                async move {
                    if let Some(tx) = started_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(None)
                }
            })),
            1,
        )
        .await;

    let job = queue.create_job("t", None, None).await.unwrap();
    started_rx.await.unwrap();

    queue.shutdown(Duration::from_millis(50), Some("t")).await.ok();

    let record = queue.find_job(job.id()).await.unwrap().unwrap().record().await;
    assert_eq!(record.state, JobState::Failure);
    assert!(record.logs.iter().any(|l| l.contains("shutdown timeout")));
}

#[tokio::test]
async fn s6_double_save_fails_and_storage_has_one_row() {
    let repo = Arc::new(MemoryRepository::new());
    let queue = Queue::create(repo.clone()).await.unwrap();

    let job = queue.create_job("t", None, None).await.unwrap();
    let result = job.save().await;
    assert!(matches!(result, Err(jobq::Error::AlreadySaved(id)) if id == job.id()));

    assert_eq!(repo.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn emits_events_for_the_full_happy_path() {
    let queue = Queue::create(Arc::new(MemoryRepository::new())).await.unwrap();
    let kinds_seen = Arc::new(Mutex::new(Vec::new()));
    let seen = kinds_seen.clone();
    let _guard = queue.events().on(EventKind::Complete, move |event| {
        if let jobq::JobEvent::Complete { job, .. } = event {
            seen.lock().unwrap().push(job.id);
        }
    });

    let job = queue
        .create_job("t", None, Some(serde_json::json!({"x": 1})))
        .await
        .unwrap();
    queue
        .process("t", Arc::new(FnProcessor(|_job| async move { Ok(None) })), 1)
        .await;

    wait_until(|| kinds_seen.lock().unwrap().contains(&job.id()), Duration::from_secs(2)).await;
}

#[tokio::test]
async fn remove_job_by_id_not_found_re_raises_and_emits_error_event() {
    let queue = Queue::create(Arc::new(MemoryRepository::new())).await.unwrap();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    let _guard = queue.events().on(EventKind::Error, move |event| {
        if let jobq::JobEvent::Error { message, .. } = event {
            seen.lock().unwrap().push(message.clone());
        }
    });

    let missing = uuid::Uuid::new_v4();
    let result = queue.remove_job_by_id(missing).await;
    assert!(matches!(result, Err(jobq::Error::NotFound(id)) if id == missing));

    wait_until(|| !errors.lock().unwrap().is_empty(), Duration::from_secs(2)).await;
    assert!(errors.lock().unwrap()[0].contains(&missing.to_string()));
}

#[tokio::test]
async fn removing_an_active_job_fails_the_owning_workers_terminal_write_and_emits_error() {
    let queue = Queue::create(Arc::new(MemoryRepository::new())).await.unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    let _guard = queue.events().on(EventKind::Error, move |event| {
        if let jobq::JobEvent::Error { message, .. } = event {
            seen.lock().unwrap().push(message.clone());
        }
    });

    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let started_tx = Arc::new(Mutex::new(Some(started_tx)));
    let (release_tx, release_rx) = tokio::sync::oneshot::channel();
    let release_rx = Arc::new(Mutex::new(Some(release_rx)));
    queue
        .process(
            "t",
            Arc::new(FnProcessor(move |_job| {
                let started_tx = started_tx.clone();
                let release_rx = release_rx.clone();
                async move {
                    if let Some(tx) = started_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    if let Some(rx) = release_rx.lock().unwrap().take() {
                        let _ = rx.await;
                    }
                    Ok(None)
                }
            })),
            1,
        )
        .await;

    let job = queue.create_job("t", None, None).await.unwrap();
    started_rx.await.unwrap();

    let target = job.id();
    let removed = queue.remove_jobs_by_callback(|j| j.id() == target).await.unwrap();
    assert_eq!(removed.len(), 1);

    release_tx.send(()).unwrap();

    wait_until(|| !errors.lock().unwrap().is_empty(), Duration::from_secs(2)).await;
    assert!(errors.lock().unwrap().iter().any(|m| m.contains(&target.to_string())));
}
