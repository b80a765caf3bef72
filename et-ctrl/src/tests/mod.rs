mod dispatcher_test;
mod expander_test;
mod index_test;
mod sweeper_test;

use std::time::Duration;

use crate::dispatcher::{
    Dispatcher,
    JobKey,
    JobStatus,
};

// Polls until the key has settled out of InProgress
pub(crate) async fn wait_for_result(dispatcher: &Dispatcher, key: &JobKey) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match dispatcher.get_result(key) {
                JobStatus::InProgress => tokio::time::sleep(Duration::from_millis(10)).await,
                other => return other,
            }
        }
    })
    .await
    .expect("dispatcher result did not settle")
}

pub(crate) async fn wait_until_running(dispatcher: &Dispatcher, key: &JobKey) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !dispatcher.is_in_progress(key) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handler never started running")
}
