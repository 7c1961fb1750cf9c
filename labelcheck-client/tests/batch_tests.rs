//! Batch subscriber and session against a scripted remote

mod helpers;

use helpers::{accepted, batch_detail, label, snapshot, MockApi, Reply, StreamFeed};
use labelcheck_client::batch::{BatchProgress, ConnectionState};
use labelcheck_client::{ApiError, BatchProgressSubscriber, BatchSession, SubscriberConfig, TrackingError};
use labelcheck_common::config::ConnectionLossPolicy;
use labelcheck_common::types::{BatchHandle, BatchProgressSnapshot, BatchStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn session(api: &Arc<MockApi>) -> BatchSession<MockApi> {
    BatchSession::new(Arc::clone(api), SubscriberConfig::default())
}

fn halting_session(api: &Arc<MockApi>) -> BatchSession<MockApi> {
    let config = SubscriberConfig {
        connection_loss: ConnectionLossPolicy::Halt,
    };
    BatchSession::new(Arc::clone(api), config)
}

fn send(feed: &StreamFeed, status: BatchStatus, total: u32, completed: u32, failed: u32) {
    feed.unbounded_send(Ok(snapshot(status, total, completed, failed)))
        .expect("stream closed");
}

async fn progress_until(
    session: &BatchSession<MockApi>,
    mut ready: impl FnMut(&BatchProgress) -> bool,
) -> BatchProgress {
    let mut rx = session.subscribe_progress();
    timeout(Duration::from_secs(5), async move {
        rx.wait_for(|p| ready(p)).await.map(|p| p.clone())
    })
    .await
    .expect("timed out waiting for progress")
    .expect("progress channel closed")
}

#[tokio::test(start_paused = true)]
async fn test_results_fetched_once_after_completion() {
    let api = Arc::new(MockApi::new());
    let feed = api.stream("b1");
    let mut session = session(&api);

    let accepted = session.submit(&[label()], None).await.unwrap();
    assert_eq!(accepted.batch_id, BatchHandle::new("b1"));

    send(&feed, BatchStatus::Processing, 10, 3, 0);
    progress_until(&session, |p| p.completed() == 3).await;
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 0);

    send(&feed, BatchStatus::Processing, 10, 7, 1);
    progress_until(&session, |p| p.completed() == 7).await;
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 0);

    send(&feed, BatchStatus::Completed, 10, 9, 1);
    let view = session.wait_until_settled().await;

    assert!(view.progress.is_complete());
    assert_eq!(view.progress.connection(), ConnectionState::Closed);
    assert_eq!(view.results.analyses().map(|a| a.len()), Some(3));
    assert!(view.error().is_none());
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_terminal_snapshots_fetch_once() {
    let api = Arc::new(MockApi::new().with_batch_fetches(vec![Reply::Delayed(
        Duration::from_secs(3),
        batch_detail("b1", 3),
    )]));
    let feed = api.stream("b1");
    let mut session = session(&api);
    session.submit(&[label()], None).await.unwrap();

    for _ in 0..3 {
        let _ = feed.unbounded_send(Ok(snapshot(BatchStatus::Completed, 3, 3, 0)));
    }
    let view = session.wait_until_settled().await;

    assert_eq!(view.results.analyses().map(|a| a.len()), Some(3));
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_still_fetches_results() {
    let api = Arc::new(MockApi::new());
    let feed = api.stream("b1");
    let mut session = session(&api);
    session.submit(&[label()], None).await.unwrap();

    send(&feed, BatchStatus::Failed, 3, 0, 3);
    let view = session.wait_until_settled().await;

    assert_eq!(view.progress.status(), BatchStatus::Failed);
    assert!(view.results.analyses().is_some());
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_counts_never_decrease() {
    let api = Arc::new(MockApi::new());
    let feed = api.stream("b1");
    let mut session = session(&api);
    session.submit(&[label()], None).await.unwrap();

    send(&feed, BatchStatus::Processing, 10, 5, 1);
    progress_until(&session, |p| p.completed() == 5).await;

    send(&feed, BatchStatus::Processing, 10, 4, 1);
    send(&feed, BatchStatus::Processing, 10, 5, 0);
    send(&feed, BatchStatus::Processing, 10, 9, 2);
    sleep(Duration::from_secs(1)).await;

    let progress = session.view().progress;
    assert_eq!(*progress.snapshot(), snapshot(BatchStatus::Processing, 10, 5, 1));
    assert!(progress.error().is_none());

    send(&feed, BatchStatus::Processing, 10, 7, 1);
    let progress = progress_until(&session, |p| p.completed() == 7).await;
    assert_eq!(progress.failed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_status_honoured_despite_lower_counts() {
    let api = Arc::new(MockApi::new());
    let feed = api.stream("b1");
    let mut session = halting_session(&api);
    session.submit(&[label()], None).await.unwrap();

    send(&feed, BatchStatus::Processing, 10, 5, 1);
    progress_until(&session, |p| p.completed() == 5).await;

    send(&feed, BatchStatus::Completed, 10, 4, 1);
    let view = session.wait_until_settled().await;

    assert!(view.progress.is_complete());
    assert_eq!(view.progress.status(), BatchStatus::Completed);
    assert_eq!(view.progress.connection(), ConnectionState::Closed);
    assert_eq!(view.progress.completed(), 5);
    assert!(view.error().is_none());
    assert!(view.results.analyses().is_some());
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 1);

    // Closed by the client, not by the server dropping it
    sleep(Duration::from_millis(10)).await;
    assert!(feed.is_closed());
    assert!(session.view().progress.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_message_skipped() {
    let api = Arc::new(MockApi::new());
    let feed = api.stream("b1");
    let mut session = session(&api);
    session.submit(&[label()], None).await.unwrap();

    feed.unbounded_send(Err(ApiError::Decode("expected value at line 1".to_string())))
        .unwrap();
    send(&feed, BatchStatus::Processing, 3, 1, 0);

    let progress = progress_until(&session, |p| p.completed() == 1).await;
    assert!(progress.error().is_none());
    assert_eq!(progress.connection(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_connection_lost_completes_by_default() {
    let api = Arc::new(MockApi::new());
    let feed = api.stream("b1");
    let mut session = session(&api);
    session.submit(&[label()], None).await.unwrap();

    send(&feed, BatchStatus::Processing, 3, 1, 0);
    progress_until(&session, |p| p.completed() == 1).await;
    drop(feed);

    let view = session.wait_until_settled().await;

    assert_eq!(view.progress.error(), Some(&TrackingError::StreamConnectionLost));
    assert_eq!(view.error().map(|e| e.to_string()).as_deref(), Some("Connection lost"));
    assert!(view.progress.is_complete());
    assert_eq!(view.progress.completed(), 1);
    assert!(view.results.analyses().is_some());
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_lost_halts_under_halt_policy() {
    let api = Arc::new(MockApi::new());
    let feed = api.stream("b1");
    let mut session = halting_session(&api);
    session.submit(&[label()], None).await.unwrap();

    send(&feed, BatchStatus::Processing, 3, 1, 0);
    progress_until(&session, |p| p.completed() == 1).await;
    drop(feed);

    let view = session.wait_until_settled().await;

    assert_eq!(view.progress.error(), Some(&TrackingError::StreamConnectionLost));
    assert!(!view.progress.is_complete());
    assert!(view.results.analyses().is_none());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stream_refused_counts_as_connection_lost() {
    let api = Arc::new(MockApi::new());
    let mut session = halting_session(&api);
    session.submit(&[label()], None).await.unwrap();

    let view = session.wait_until_settled().await;

    assert_eq!(MockApi::count(&api.stream_opens), 1);
    assert_eq!(view.progress.error(), Some(&TrackingError::StreamConnectionLost));
    assert_eq!(view.progress.connection(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_result_fetch_failure_not_retried() {
    let api = Arc::new(MockApi::new().with_batch_fetches(vec![Reply::Err]));
    let feed = api.stream("b1");
    let mut session = session(&api);
    session.submit(&[label()], None).await.unwrap();

    send(&feed, BatchStatus::Completed, 3, 3, 0);
    let view = session.wait_until_settled().await;

    assert_eq!(view.results.error(), Some(&TrackingError::BatchResultFetchFailed));
    assert_eq!(
        view.error().map(|e| e.to_string()).as_deref(),
        Some("Failed to fetch batch results")
    );
    assert!(view.results.gate().is_latched_for(&BatchHandle::new("b1")));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_upload_failure_starts_nothing() {
    let api = Arc::new(MockApi::new().with_batch_uploads(vec![Reply::Err]));
    let mut session = session(&api);

    let result = session.submit(&[label()], None).await;

    assert_eq!(result.unwrap_err(), TrackingError::BatchUploadFailed);
    let view = session.view();
    assert_eq!(view.error(), Some(&TrackingError::BatchUploadFailed));
    assert!(view.handle().is_none());
    assert!(view.is_settled());

    sleep(Duration::from_secs(5)).await;
    assert_eq!(MockApi::count(&api.stream_opens), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_batch_isolated_from_previous() {
    let api = Arc::new(
        MockApi::new()
            .with_batch_uploads(vec![Reply::Ok(accepted("b1", 3)), Reply::Ok(accepted("b2", 2))])
            .with_batch_fetches(vec![Reply::Delayed(Duration::from_secs(5), batch_detail("b1", 3))]),
    );
    let old_feed = api.stream("b1");
    let new_feed = api.stream("b2");
    let mut session = session(&api);

    session.submit(&[label()], None).await.unwrap();
    send(&old_feed, BatchStatus::Completed, 3, 3, 0);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(MockApi::count(&api.batch_fetch_calls), 1);

    // b1 results are still in flight
    session.submit(&[label(), label()], None).await.unwrap();
    sleep(Duration::from_secs(10)).await;

    let view = session.view();
    assert_eq!(view.handle(), Some(&BatchHandle::new("b2")));
    assert_eq!(view.progress.handle(), Some(&BatchHandle::new("b2")));
    assert_eq!(*view.progress.snapshot(), BatchProgressSnapshot::default());
    assert!(!view.progress.is_complete());
    assert!(view.results.analyses().is_none());
    assert!(view.error().is_none());

    send(&new_feed, BatchStatus::Processing, 2, 1, 0);
    let progress = progress_until(&session, |p| p.completed() == 1).await;
    assert_eq!(progress.total(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_everything() {
    let api = Arc::new(MockApi::new());
    let feed = api.stream("b1");
    let mut session = session(&api);
    session.submit(&[label()], None).await.unwrap();

    send(&feed, BatchStatus::Completed, 3, 3, 0);
    let view = session.wait_until_settled().await;
    assert!(view.results.analyses().is_some());

    session.reset();
    let view = session.view();

    assert!(view.handle().is_none());
    assert!(view.progress.handle().is_none());
    assert_eq!(view.progress.connection(), ConnectionState::Inactive);
    assert_eq!(*view.progress.snapshot(), BatchProgressSnapshot::default());
    assert!(view.results.analyses().is_none());
    assert!(!view.results.gate().is_latched_for(&BatchHandle::new("b1")));
    assert!(view.error().is_none());

    // Second reset publishes nothing
    let results = session.subscribe_results();
    session.reset();
    assert!(!results.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_session_closes_stream() {
    let api = Arc::new(MockApi::new());
    let feed = api.stream("b1");
    let mut session = session(&api);
    session.submit(&[label()], None).await.unwrap();

    send(&feed, BatchStatus::Processing, 3, 1, 0);
    progress_until(&session, |p| p.completed() == 1).await;

    drop(session);
    sleep(Duration::from_millis(10)).await;
    assert!(feed.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_watching_same_handle_opens_once() {
    let api = Arc::new(MockApi::new());
    let _feed = api.stream("b1");
    let mut subscriber = BatchProgressSubscriber::new(Arc::clone(&api), SubscriberConfig::default());

    subscriber.watch(Some(BatchHandle::new("b1")));
    subscriber.watch(Some(BatchHandle::new("b1")));
    sleep(Duration::from_millis(10)).await;

    assert_eq!(MockApi::count(&api.stream_opens), 1);
    assert_eq!(subscriber.progress().connection(), ConnectionState::Open);

    subscriber.watch(None);
    assert_eq!(subscriber.progress().connection(), ConnectionState::Inactive);
    assert!(subscriber.handle().is_none());
}
