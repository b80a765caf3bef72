use std::collections::{
    HashMap,
    HashSet,
};
use std::fmt;
use std::pin::pin;
use std::sync::{
    Arc,
    Mutex,
};
use std::time::Duration;

use et_core::errors::*;
use et_core::prelude::*;
use futures::Future;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::*;

use crate::errors::EtControllerError;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    Deploy,
    Cleanup,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Deploy => Direction::Cleanup,
            Direction::Cleanup => Direction::Deploy,
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct JobKey {
    pub cluster: ClusterId,
    pub trigger: String,
    pub feature: String,
    pub direction: Direction,
}

impl JobKey {
    pub fn deploy(cluster: &ClusterId, trigger: &str, feature: &str) -> JobKey {
        JobKey {
            cluster: cluster.clone(),
            trigger: trigger.into(),
            feature: feature.into(),
            direction: Direction::Deploy,
        }
    }

    pub fn cleanup(cluster: &ClusterId, trigger: &str, feature: &str) -> JobKey {
        JobKey { direction: Direction::Cleanup, ..JobKey::deploy(cluster, trigger, feature) }
    }

    pub fn opposite(&self) -> JobKey {
        JobKey { direction: self.direction.opposite(), ..self.clone() }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}:{}:{}/{}", self.direction, self.cluster, self.trigger, self.feature)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Deployed,
    Failed(String),
    InProgress,
    Removed,
    Unavailable,
}

type JobHandler = BoxFuture<'static, EmptyResult>;

#[derive(Default)]
struct DispatcherState {
    queued: HashSet<JobKey>,
    handlers: HashMap<JobKey, JobHandler>,
    in_progress: HashSet<JobKey>,
    results: HashMap<JobKey, Result<(), String>>,
}

// Keyed work queue with a result memo.  A fixed pool of workers pulls keys off a
// channel; the shared state tracks what is queued, what is running, and the outcome of
// the last completed handler per key.  Invariants:
//   - at most one handler runs for a key at any time (a key submitted while running is
//     parked in `queued` and re-dispatched by the finishing worker, latest handler wins)
//   - deploy and cleanup for the same (cluster, trigger, feature) never run together;
//     submission against a running opposite direction is rejected
// Retries are the reconciler's job, never the dispatcher's.
pub struct Dispatcher {
    state: Arc<Mutex<DispatcherState>>,
    tx: mpsc::UnboundedSender<JobKey>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new(worker_count: usize, program_duration: Duration) -> Arc<Dispatcher> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(DispatcherState::default()));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..worker_count.max(1) {
            workers.spawn(worker_loop(state.clone(), rx.clone(), tx.clone(), program_duration));
        }

        Arc::new(Dispatcher { state, tx, workers: tokio::sync::Mutex::new(workers) })
    }

    pub fn submit<F>(&self, key: JobKey, handler: F) -> EmptyResult
    where
        F: Future<Output = EmptyResult> + Send + 'static,
    {
        let mut state = self.state.lock().expect("dispatcher mutex poisoned");

        if state.in_progress.contains(&key.opposite()) {
            bail!(EtControllerError::job_in_progress_error(&key.opposite()));
        }

        state.handlers.insert(key.clone(), Box::pin(handler));
        state.results.remove(&key);
        if state.queued.insert(key.clone()) && !state.in_progress.contains(&key) {
            // The channel only closes at shutdown, after the workers are gone anyways
            let _ = self.tx.send(key);
        }
        Ok(())
    }

    pub fn is_in_progress(&self, key: &JobKey) -> bool {
        self.state.lock().expect("dispatcher mutex poisoned").in_progress.contains(key)
    }

    // Drops any pending (not running) entry and the memoized result for the key
    pub fn cleanup_entries(&self, key: &JobKey) {
        let mut state = self.state.lock().expect("dispatcher mutex poisoned");
        state.queued.remove(key);
        state.handlers.remove(key);
        state.results.remove(key);
    }

    pub fn get_result(&self, key: &JobKey) -> JobStatus {
        let state = self.state.lock().expect("dispatcher mutex poisoned");
        if state.in_progress.contains(key) || state.queued.contains(key) {
            return JobStatus::InProgress;
        }
        match state.results.get(key) {
            Some(Ok(())) => match key.direction {
                Direction::Deploy => JobStatus::Deployed,
                Direction::Cleanup => JobStatus::Removed,
            },
            Some(Err(e)) => JobStatus::Failed(e.clone()),
            None => JobStatus::Unavailable,
        }
    }

    pub async fn shutdown(&self) {
        self.workers.lock().await.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn seed_result(&self, key: &JobKey, res: Result<(), String>) {
        self.state.lock().unwrap().results.insert(key.clone(), res);
    }
}

impl EtControllerError {
    fn job_in_progress_error(key: &JobKey) -> anyhow::Error {
        match key.direction {
            Direction::Deploy => EtControllerError::deploy_in_progress(&key.to_string()),
            Direction::Cleanup => EtControllerError::cleanup_in_progress(&key.to_string()),
        }
    }
}

async fn worker_loop(
    state: Arc<Mutex<DispatcherState>>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<JobKey>>>,
    tx: mpsc::UnboundedSender<JobKey>,
    program_duration: Duration,
) {
    loop {
        let key = { rx.lock().await.recv().await };
        let Some(key) = key else { break };

        let handler = {
            let mut s = state.lock().expect("dispatcher mutex poisoned");
            // A key can reach a worker twice (submit during execution plus the finishing
            // worker's re-dispatch); whoever loses the `queued` race skips it
            if !s.queued.remove(&key) {
                continue;
            }
            let Some(handler) = s.handlers.remove(&key) else { continue };
            s.in_progress.insert(key.clone());
            s.results.remove(&key);
            handler
        };

        debug!("running handler for {key}");
        let res = run_with_watchdog(&key, handler, program_duration).await;
        if let Err(e) = &res {
            warn!("handler for {key} failed: {e:#}");
        }

        let mut s = state.lock().expect("dispatcher mutex poisoned");
        s.in_progress.remove(&key);
        s.results.insert(key.clone(), res.map_err(|e| format!("{e:#}")));
        if s.queued.contains(&key) {
            let _ = tx.send(key);
        }
    }
}

async fn run_with_watchdog(key: &JobKey, handler: JobHandler, program_duration: Duration) -> EmptyResult {
    let mut handler = pin!(handler);
    let mut elapsed = Duration::ZERO;
    loop {
        tokio::select! {
            res = &mut handler => return res,
            _ = tokio::time::sleep(program_duration) => {
                elapsed += program_duration;
                warn!("handler for {key} slow, still running after {elapsed:?}");
            },
        }
    }
}
