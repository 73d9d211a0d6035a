//! Orchestrator Integration Tests
//!
//! Drives the download pipeline end to end against a scripted source
//! adapter: deduplication, the concurrency bound, retry/backoff,
//! cancellation, and failure isolation from the committed library.

mod common;

use std::time::Duration;

use cratedig::core::{Orchestrator, StatusReport, SubmitError};
use cratedig::domain::{ItemId, JobErrorKind, JobState, TagPatch};

use common::{expect_started, test_library, test_settings, MockSource, MockStep};

#[tokio::test]
async fn test_happy_path_submit_to_ready() {
    let (mock, _events) = MockSource::new();
    mock.script("src://abc", vec![MockStep::succeed("Provider Title")]);

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let mut handle = orchestrator
        .submit("src://abc", TagPatch::default())
        .await
        .unwrap();

    assert_eq!(handle.wait().await, JobState::Ready);

    let listed = index.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "Provider Title");
    assert!(listed[0].storage_path.exists());
    assert!(listed[0].size_bytes > 0);
}

#[tokio::test]
async fn test_submit_rejects_invalid_locators() {
    let (mock, _events) = MockSource::new();
    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index, mock.clone(), test_settings(2));

    assert!(matches!(
        orchestrator.submit("", TagPatch::default()).await,
        Err(SubmitError::InvalidLocator(_))
    ));
    assert!(matches!(
        orchestrator.submit("   \t ", TagPatch::default()).await,
        Err(SubmitError::InvalidLocator(_))
    ));
    assert!(matches!(
        orchestrator.submit("src://a\nb", TagPatch::default()).await,
        Err(SubmitError::InvalidLocator(_))
    ));

    // Rejected before any job was created
    assert_eq!(mock.fetch_calls(), 0);
}

#[tokio::test]
async fn test_duplicate_submit_returns_same_job() {
    let (mock, mut events) = MockSource::new();
    mock.script(
        "src://dup",
        vec![MockStep::BlockThenSucceed {
            title: "Once".to_string(),
        }],
    );

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let mut first = orchestrator
        .submit("src://dup", TagPatch::default())
        .await
        .unwrap();
    expect_started(&mut events, "src://dup").await;

    // Second submission while the fetch is in flight joins the live job
    let second = orchestrator
        .submit("src://dup", TagPatch::default())
        .await
        .unwrap();
    assert_eq!(first.job_id(), second.job_id());

    mock.gate.notify_one();
    assert_eq!(first.wait().await, JobState::Ready);

    // Exactly one fetch and one committed item
    assert_eq!(mock.fetch_calls(), 1);
    assert_eq!(index.list().await.len(), 1);
}

#[tokio::test]
async fn test_resubmit_after_terminal_starts_fresh_job() {
    let (mock, _events) = MockSource::new();
    mock.script("src://flaky", vec![MockStep::Rejected]);

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index, mock.clone(), test_settings(2));

    let mut first = orchestrator
        .submit("src://flaky", TagPatch::default())
        .await
        .unwrap();
    assert!(matches!(first.wait().await, JobState::Failed { .. }));

    let second = orchestrator
        .submit("src://flaky", TagPatch::default())
        .await
        .unwrap();
    assert_ne!(first.job_id(), second.job_id());
}

#[tokio::test]
async fn test_transient_failures_retry_then_succeed() {
    let (mock, _events) = MockSource::new();
    mock.script(
        "src://retry",
        vec![
            MockStep::Unreachable,
            MockStep::Exhausted,
            MockStep::succeed("Third Time Lucky"),
        ],
    );

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let mut handle = orchestrator
        .submit("src://retry", TagPatch::default())
        .await
        .unwrap();
    assert_eq!(handle.wait().await, JobState::Ready);

    assert_eq!(mock.fetch_calls(), 3);
    assert_eq!(index.list().await[0].title, "Third Time Lucky");

    match orchestrator.status(handle.id()).await {
        Some(StatusReport::Job { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected job status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_exhausts_attempts_then_fails() {
    let (mock, _events) = MockSource::new();
    mock.script("src://down", vec![MockStep::Unreachable]);

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let mut handle = orchestrator
        .submit("src://down", TagPatch::default())
        .await
        .unwrap();

    match handle.wait().await {
        JobState::Failed { kind, .. } => assert_eq!(kind, JobErrorKind::SourceUnreachable),
        other => panic!("expected failure, got {}", other),
    }

    // Bounded at max_attempts, library untouched, staging cleaned
    assert_eq!(mock.fetch_calls(), 3);
    assert!(index.list().await.is_empty());
    assert_eq!(common::staging_file_count(&index).await, 0);
}

#[tokio::test]
async fn test_rejected_fails_without_retry() {
    let (mock, _events) = MockSource::new();
    mock.script("src://bad", vec![MockStep::Rejected]);

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let mut handle = orchestrator
        .submit("src://bad", TagPatch::default())
        .await
        .unwrap();

    match handle.wait().await {
        JobState::Failed { kind, .. } => assert_eq!(kind, JobErrorKind::SourceRejected),
        other => panic!("expected failure, got {}", other),
    }
    assert_eq!(mock.fetch_calls(), 1);
}

#[tokio::test]
async fn test_non_audio_payload_fails_as_unsupported_container() {
    let (mock, _events) = MockSource::new();
    mock.script("src://garbage", vec![MockStep::SucceedGarbage]);

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let mut handle = orchestrator
        .submit("src://garbage", TagPatch::default())
        .await
        .unwrap();

    match handle.wait().await {
        JobState::Failed { kind, .. } => assert_eq!(kind, JobErrorKind::UnsupportedContainer),
        other => panic!("expected failure, got {}", other),
    }

    assert!(index.list().await.is_empty());
    assert_eq!(common::staging_file_count(&index).await, 0);
}

#[tokio::test]
async fn test_caller_overrides_win_over_provider_attributes() {
    let (mock, _events) = MockSource::new();
    mock.script(
        "src://tagged",
        vec![MockStep::Succeed {
            title: "Provider Title".to_string(),
            artist: Some("Provider Artist".to_string()),
            duration: Some(200),
        }],
    );

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let overrides = TagPatch {
        title: Some("My Title".to_string()),
        artist: None,
        album: Some("My Album".to_string()),
    };

    let mut handle = orchestrator.submit("src://tagged", overrides).await.unwrap();
    assert_eq!(handle.wait().await, JobState::Ready);

    let item = index.lookup(handle.id()).await.unwrap();
    assert_eq!(item.title, "My Title"); // override wins
    assert_eq!(item.artist.as_deref(), Some("Provider Artist")); // provider fills the gap
    assert_eq!(item.duration_secs, Some(200)); // provider duration kept for a silent container
}

#[tokio::test]
async fn test_concurrency_bound_queues_excess_jobs() {
    let (mock, mut events) = MockSource::new();
    mock.script(
        "src://slow",
        vec![MockStep::BlockThenSucceed {
            title: "Slow".to_string(),
        }],
    );
    mock.script("src://queued", vec![MockStep::succeed("Queued")]);

    let (_temp, index) = test_library().await;
    // Single worker: the second job must wait in pending
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(1));

    let mut slow = orchestrator
        .submit("src://slow", TagPatch::default())
        .await
        .unwrap();
    expect_started(&mut events, "src://slow").await;

    let mut queued = orchestrator
        .submit("src://queued", TagPatch::default())
        .await
        .unwrap();

    // The queued job cannot start while the only worker is occupied
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queued.state(), JobState::Pending);
    assert_eq!(mock.fetch_calls(), 1);

    mock.gate.notify_one();
    assert_eq!(slow.wait().await, JobState::Ready);
    assert_eq!(queued.wait().await, JobState::Ready);
    assert_eq!(index.list().await.len(), 2);
}

#[tokio::test]
async fn test_cancel_pending_job_never_starts() {
    let (mock, mut events) = MockSource::new();
    mock.script(
        "src://busy",
        vec![MockStep::BlockThenSucceed {
            title: "Busy".to_string(),
        }],
    );
    mock.script("src://victim", vec![MockStep::succeed("Victim")]);

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(1));

    let mut busy = orchestrator
        .submit("src://busy", TagPatch::default())
        .await
        .unwrap();
    expect_started(&mut events, "src://busy").await;

    let mut victim = orchestrator
        .submit("src://victim", TagPatch::default())
        .await
        .unwrap();
    assert!(orchestrator.cancel(victim.id()).await);

    mock.gate.notify_one();
    assert_eq!(busy.wait().await, JobState::Ready);
    assert_eq!(victim.wait().await, JobState::Cancelled);

    // The cancelled job never reached the adapter
    assert_eq!(mock.fetch_calls(), 1);
    assert_eq!(index.list().await.len(), 1);
}

#[tokio::test]
async fn test_cancel_inflight_job_discards_result() {
    let (mock, mut events) = MockSource::new();
    mock.script("src://abort", vec![MockStep::BlockUntilCancelled]);

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let mut handle = orchestrator
        .submit("src://abort", TagPatch::default())
        .await
        .unwrap();
    expect_started(&mut events, "src://abort").await;

    assert!(orchestrator.cancel(handle.id()).await);
    assert_eq!(handle.wait().await, JobState::Cancelled);

    assert!(index.list().await.is_empty());
    assert_eq!(common::staging_file_count(&index).await, 0);

    // Cancelling a finished job reports false
    assert!(!orchestrator.cancel(handle.id()).await);
}

#[tokio::test]
async fn test_failed_job_leaves_prior_commit_servable() {
    let (mock, _events) = MockSource::new();
    mock.script(
        "src://precious",
        vec![MockStep::succeed("First Version"), MockStep::Rejected],
    );

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let mut first = orchestrator
        .submit("src://precious", TagPatch::default())
        .await
        .unwrap();
    assert_eq!(first.wait().await, JobState::Ready);
    let committed = index.lookup(first.id()).await.unwrap();

    // Resubmission fails; the committed item must be untouched
    let mut second = orchestrator
        .submit("src://precious", TagPatch::default())
        .await
        .unwrap();
    assert!(matches!(second.wait().await, JobState::Failed { .. }));

    let after = index.lookup(first.id()).await.unwrap();
    assert_eq!(after.title, "First Version");
    assert_eq!(after.seq, committed.seq);
    assert!(after.storage_path.exists());
}

#[tokio::test]
async fn test_status_falls_back_to_committed_item() {
    let (mock, _events) = MockSource::new();
    mock.script("src://status", vec![MockStep::succeed("Status Track")]);

    let (_temp, index) = test_library().await;
    let orchestrator = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));

    let mut handle = orchestrator
        .submit("src://status", TagPatch::default())
        .await
        .unwrap();
    assert_eq!(handle.wait().await, JobState::Ready);

    // The terminal job is still queryable
    match orchestrator.status(handle.id()).await {
        Some(StatusReport::Job { state, .. }) => assert_eq!(state, JobState::Ready),
        other => panic!("expected job status, got {:?}", other),
    }

    // A fresh orchestrator (as after a restart) has no job memory and
    // resolves from the committed library instead
    let restarted = Orchestrator::new(index.clone(), mock.clone(), test_settings(2));
    match restarted.status(handle.id()).await {
        Some(StatusReport::Committed(item)) => assert_eq!(item.title, "Status Track"),
        other => panic!("expected committed item, got {:?}", other),
    }

    assert!(restarted
        .status(&ItemId::from_locator("src://never-seen"))
        .await
        .is_none());
}
