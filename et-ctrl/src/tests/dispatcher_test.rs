use std::sync::Arc;
use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};
use std::time::Duration;

use assertables::*;
use et_api::v1beta1::FEATURE_EVENT_TRIGGER;
use et_core::errors::*;
use rstest::*;
use testutils::*;
use tokio::sync::oneshot;

use super::{
    wait_for_result,
    wait_until_running,
};
use crate::dispatcher::*;

fn deploy_key() -> JobKey {
    JobKey::deploy(&TEST_CLUSTER_ID, TEST_TRIGGER_NAME, FEATURE_EVENT_TRIGGER)
}

fn other_key() -> JobKey {
    JobKey::deploy(&TEST_CLUSTER_ID, "other-trigger", FEATURE_EVENT_TRIGGER)
}

#[rstest]
#[tokio::test]
async fn test_submit_deploy() {
    let dispatcher = Dispatcher::new(2, Duration::from_secs(60));
    assert_eq!(dispatcher.get_result(&deploy_key()), JobStatus::Unavailable);

    dispatcher.submit(deploy_key(), async { Ok(()) }).unwrap();
    assert_eq!(wait_for_result(&dispatcher, &deploy_key()).await, JobStatus::Deployed);
}

#[rstest]
#[tokio::test]
async fn test_submit_failure_retains_message() {
    let dispatcher = Dispatcher::new(2, Duration::from_secs(60));
    dispatcher.submit(deploy_key(), async { bail!("boom") }).unwrap();
    assert_eq!(wait_for_result(&dispatcher, &deploy_key()).await, JobStatus::Failed("boom".into()));

    // results are retained until the next submit of the same key
    assert_eq!(dispatcher.get_result(&deploy_key()), JobStatus::Failed("boom".into()));
    dispatcher.submit(deploy_key(), async { Ok(()) }).unwrap();
    assert_eq!(wait_for_result(&dispatcher, &deploy_key()).await, JobStatus::Deployed);
}

#[rstest]
#[tokio::test]
async fn test_cleanup_direction_result() {
    let dispatcher = Dispatcher::new(2, Duration::from_secs(60));
    let key = deploy_key().opposite();
    dispatcher.submit(key.clone(), async { Ok(()) }).unwrap();
    assert_eq!(wait_for_result(&dispatcher, &key).await, JobStatus::Removed);
}

#[rstest]
#[tokio::test]
async fn test_opposite_direction_rejected_while_running() {
    let dispatcher = Dispatcher::new(2, Duration::from_secs(60));
    let (tx, rx) = oneshot::channel::<()>();

    dispatcher
        .submit(deploy_key(), async move {
            rx.await?;
            Ok(())
        })
        .unwrap();
    wait_until_running(&dispatcher, &deploy_key()).await;

    assert_err!(dispatcher.submit(deploy_key().opposite(), async { Ok(()) }));

    tx.send(()).unwrap();
    assert_eq!(wait_for_result(&dispatcher, &deploy_key()).await, JobStatus::Deployed);

    // once the deploy has drained, cleanup is accepted
    dispatcher.submit(deploy_key().opposite(), async { Ok(()) }).unwrap();
    assert_eq!(wait_for_result(&dispatcher, &deploy_key().opposite()).await, JobStatus::Removed);
}

#[rstest]
#[tokio::test]
async fn test_identical_pending_submissions_coalesce() {
    // a single worker, blocked, so the target key stays pending
    let dispatcher = Dispatcher::new(1, Duration::from_secs(60));
    let (tx, rx) = oneshot::channel::<()>();
    dispatcher
        .submit(other_key(), async move {
            rx.await?;
            Ok(())
        })
        .unwrap();
    wait_until_running(&dispatcher, &other_key()).await;

    let runs = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let runs = runs.clone();
        dispatcher
            .submit(deploy_key(), async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
    }

    tx.send(()).unwrap();
    assert_eq!(wait_for_result(&dispatcher, &deploy_key()).await, JobStatus::Deployed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn test_at_most_one_handler_per_key() {
    let dispatcher = Dispatcher::new(4, Duration::from_secs(60));

    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let handler = |active: Arc<AtomicUsize>, overlaps: Arc<AtomicUsize>, runs: Arc<AtomicUsize>| async move {
        if active.fetch_add(1, Ordering::SeqCst) > 0 {
            overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        active.fetch_sub(1, Ordering::SeqCst);
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };

    dispatcher
        .submit(deploy_key(), handler(active.clone(), overlaps.clone(), runs.clone()))
        .unwrap();
    wait_until_running(&dispatcher, &deploy_key()).await;

    // submitted while running; parked and re-dispatched when the first handler finishes
    dispatcher
        .submit(deploy_key(), handler(active.clone(), overlaps.clone(), runs.clone()))
        .unwrap();

    assert_eq!(wait_for_result(&dispatcher, &deploy_key()).await, JobStatus::Deployed);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn test_cleanup_entries_drops_pending() {
    let dispatcher = Dispatcher::new(1, Duration::from_secs(60));
    let (tx, rx) = oneshot::channel::<()>();
    dispatcher
        .submit(other_key(), async move {
            rx.await?;
            Ok(())
        })
        .unwrap();
    wait_until_running(&dispatcher, &other_key()).await;

    let runs = Arc::new(AtomicUsize::new(0));
    let handler_runs = runs.clone();
    dispatcher
        .submit(deploy_key(), async move {
            handler_runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    dispatcher.cleanup_entries(&deploy_key());

    tx.send(()).unwrap();
    assert_eq!(wait_for_result(&dispatcher, &other_key()).await, JobStatus::Deployed);

    // the cancelled entry never runs and leaves no result behind
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatcher.get_result(&deploy_key()), JobStatus::Unavailable);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}
