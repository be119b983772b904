//! PostgreSQL adapter tests
//!
//! These start a PostgreSQL container and are ignored by default.
//! Run with `cargo test -p infra_db -- --ignored` when Docker is available.

use std::sync::Arc;
use std::time::Duration;

use core_kernel::{JobId, PortError, SavedClaimId, UserId};
use domain_submission::{
    AttachmentPort, BackendClaimId, Batch, BatchPort, JobEnvelope, JobKind, JobQueuePort,
    JobSource, JobState, JobStatusPort, JobStatusUpdate, JobTask, Submission, SubmissionPort,
};
use infra_db::{
    PostgresAttachmentAdapter, PostgresBatchAdapter, PostgresJobQueue, PostgresJobStatusAdapter,
    PostgresSubmissionAdapter,
};
use test_utils::{create_isolated_test_database, AuthFixtures, PayloadFixtures, TestDatabase};

async fn database() -> TestDatabase {
    create_isolated_test_database()
        .await
        .expect("Failed to create test database")
}

async fn stored_submission(db: &TestDatabase) -> Submission {
    let submission = Submission::new(
        UserId::new(),
        SavedClaimId::new(),
        PayloadFixtures::full(1),
        AuthFixtures::user(),
    );
    PostgresSubmissionAdapter::new(db.pool().clone())
        .insert(&submission)
        .await
        .unwrap();
    submission
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_submission_roundtrip() {
    let db = database().await;
    let submission = stored_submission(&db).await;
    let adapter = PostgresSubmissionAdapter::new(db.pool().clone());

    let loaded = adapter.get(submission.id).await.unwrap();

    assert_eq!(loaded.payload, submission.payload);
    assert_eq!(loaded.auth_context, submission.auth_context);
    assert_eq!(loaded.backend_claim_id, None);
    assert!(!loaded.complete);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_backend_claim_id_is_set_once() {
    let db = database().await;
    let submission = stored_submission(&db).await;
    let adapter = PostgresSubmissionAdapter::new(db.pool().clone());

    adapter
        .set_backend_claim_id(submission.id, BackendClaimId::new(600_130_094))
        .await
        .unwrap();
    adapter
        .set_backend_claim_id(submission.id, BackendClaimId::new(600_130_094))
        .await
        .unwrap();
    let err = adapter
        .set_backend_claim_id(submission.id, BackendClaimId::new(1))
        .await
        .unwrap_err();

    assert!(matches!(err, PortError::Conflict { .. }));
    let loaded = adapter.get(submission.id).await.unwrap();
    assert_eq!(loaded.backend_claim_id, Some(BackendClaimId::new(600_130_094)));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_mark_complete_flips_once() {
    let db = database().await;
    let submission = stored_submission(&db).await;
    let adapter = PostgresSubmissionAdapter::new(db.pool().clone());

    assert!(adapter.mark_complete(submission.id).await.unwrap());
    assert!(!adapter.mark_complete(submission.id).await.unwrap());
    assert!(adapter.get(submission.id).await.unwrap().complete);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_missing_submission_is_not_found() {
    let db = database().await;
    let adapter = PostgresSubmissionAdapter::new(db.pool().clone());

    let err = adapter
        .get(core_kernel::SubmissionId::new())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_twice_keeps_one_row() {
    let db = database().await;
    let submission = stored_submission(&db).await;
    let adapter = PostgresJobStatusAdapter::new(db.pool().clone());
    let envelope = JobEnvelope::primary(submission.id, AuthFixtures::user());

    adapter
        .upsert(JobStatusUpdate::new(&envelope, JobState::Trying))
        .await
        .unwrap();
    let row = adapter
        .upsert(JobStatusUpdate::new(&envelope, JobState::Retrying).with_error("gateway timeout"))
        .await
        .unwrap();

    assert_eq!(row.status, JobState::Retrying);
    assert_eq!(row.job_class, JobKind::Primary);
    let rows = adapter.list_for_submission(submission.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].error_message.as_deref(), Some("gateway timeout"));

    let found = adapter.find_by(envelope.job_id).await.unwrap().unwrap();
    assert_eq!(found, row);
    assert!(adapter.find_by(JobId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_empty_batch_completes_immediately() {
    let db = database().await;
    let submission = stored_submission(&db).await;
    let adapter = PostgresBatchAdapter::new(db.pool().clone());
    let batch = Batch::new(submission.id, vec![]);

    assert!(adapter.register(&batch).await.unwrap());
    let progress = adapter.try_complete(batch.id).await.unwrap();

    assert!(progress.just_completed);
    assert_eq!(progress.expected, 0);
    assert!(!adapter.try_complete(batch.id).await.unwrap().just_completed);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_second_batch_for_submission_is_refused() {
    let db = database().await;
    let submission = stored_submission(&db).await;
    let adapter = PostgresBatchAdapter::new(db.pool().clone());

    let first = Batch::new(submission.id, submission.payload.ancillary_tasks());
    assert!(adapter.register(&first).await.unwrap());
    assert!(!adapter
        .register(&Batch::new(submission.id, submission.payload.ancillary_tasks()))
        .await
        .unwrap());

    let found = adapter
        .find_for_submission(submission.id)
        .await
        .unwrap()
        .expect("batch stored");
    assert_eq!(found, first);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_batch_members_keep_order_and_tasks() {
    let db = database().await;
    let submission = stored_submission(&db).await;
    let adapter = PostgresBatchAdapter::new(db.pool().clone());
    let batch = Batch::new(submission.id, submission.payload.ancillary_tasks());
    adapter.register(&batch).await.unwrap();

    let found = adapter
        .find_for_submission(submission.id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.members, batch.members);
    assert!(matches!(found.members[0].task, JobTask::Upload(_)));
    assert!(adapter
        .find_for_submission(core_kernel::SubmissionId::new())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_members_complete_batch_exactly_once() {
    let db = database().await;
    let submission = stored_submission(&db).await;
    let adapter = Arc::new(PostgresBatchAdapter::new(db.pool().clone()));
    let tasks = (0..8)
        .map(|_| JobTask::Upload(PayloadFixtures::upload()))
        .collect();
    let batch = Batch::new(submission.id, tasks);
    let members = batch.member_ids();
    adapter.register(&batch).await.unwrap();

    let handles: Vec<_> = members
        .into_iter()
        .map(|job_id| {
            let adapter = Arc::clone(&adapter);
            let batch_id = batch.id;
            tokio::spawn(async move { adapter.record_terminal(batch_id, job_id).await })
        })
        .collect();

    let mut completions = 0;
    for handle in handles {
        let progress = handle.await.unwrap().unwrap();
        if progress.just_completed {
            completions += 1;
        }
    }

    assert_eq!(completions, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_attachment_store_and_fetch() {
    let db = database().await;
    let adapter = PostgresAttachmentAdapter::new(db.pool().clone());

    adapter.store("guid-1", b"%PDF-1.4 a".to_vec()).await.unwrap();
    adapter.store("guid-1", b"%PDF-1.4 b".to_vec()).await.unwrap();

    assert_eq!(
        adapter.fetch("guid-1").await.unwrap(),
        Some(b"%PDF-1.4 b".to_vec())
    );
    assert_eq!(adapter.fetch("guid-unknown").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_queue_claim_hides_job_until_released() {
    let db = database().await;
    let queue = PostgresJobQueue::new(db.pool().clone());
    let envelope = JobEnvelope::primary(core_kernel::SubmissionId::new(), AuthFixtures::user());

    queue.enqueue(envelope.clone()).await.unwrap();
    queue.enqueue(envelope.clone()).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);

    let claimed = queue.claim().await.unwrap().expect("job is due");
    assert_eq!(claimed, envelope);
    assert!(queue.claim().await.unwrap().is_none());

    queue.release(claimed, Duration::ZERO).await.unwrap();
    let again = queue.claim().await.unwrap().expect("released job is due");
    queue.ack(&again).await.unwrap();

    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_queue_ack_keeps_a_retry_scheduled_during_delivery() {
    let db = database().await;
    let queue = PostgresJobQueue::new(db.pool().clone());
    let envelope = JobEnvelope::primary(core_kernel::SubmissionId::new(), AuthFixtures::user());
    queue.enqueue(envelope.clone()).await.unwrap();

    let claimed = queue.claim().await.unwrap().unwrap();
    queue
        .schedule(claimed.next_attempt(), Duration::from_secs(3600))
        .await
        .unwrap();
    queue.ack(&claimed).await.unwrap();

    assert_eq!(queue.len().await.unwrap(), 1);
    // Not due for an hour
    assert!(queue.claim().await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_queue_claim_lapses_after_visibility_timeout() {
    let db = database().await;
    let queue = PostgresJobQueue::new(db.pool().clone())
        .with_visibility_timeout(Duration::from_millis(200));
    let envelope = JobEnvelope::primary(core_kernel::SubmissionId::new(), AuthFixtures::user());
    queue.enqueue(envelope.clone()).await.unwrap();

    assert!(queue.claim().await.unwrap().is_some());
    assert!(queue.claim().await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(queue.claim().await.unwrap(), Some(envelope));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_queue_survives_a_new_adapter_on_the_same_database() {
    let db = database().await;
    let envelope = JobEnvelope::primary(core_kernel::SubmissionId::new(), AuthFixtures::user());
    PostgresJobQueue::new(db.pool().clone())
        .schedule(envelope.clone(), Duration::ZERO)
        .await
        .unwrap();

    let restarted = PostgresJobQueue::new(db.pool().clone());
    assert_eq!(restarted.claim().await.unwrap(), Some(envelope));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_claims_take_distinct_jobs() {
    let db = database().await;
    let queue = Arc::new(PostgresJobQueue::new(db.pool().clone()));
    for _ in 0..6 {
        queue
            .enqueue(JobEnvelope::primary(
                core_kernel::SubmissionId::new(),
                AuthFixtures::user(),
            ))
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.claim().await })
        })
        .collect();

    let mut claimed = std::collections::HashSet::new();
    for handle in handles {
        if let Some(envelope) = handle.await.unwrap().unwrap() {
            assert!(claimed.insert(envelope.job_id), "job claimed twice");
        }
    }
    assert_eq!(claimed.len(), 6);
}
