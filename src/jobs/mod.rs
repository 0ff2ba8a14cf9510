use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Future;
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::analysis::AnalyzerResult;
use crate::cache::Fingerprint;
use crate::exception::EngineError;

pub type JobOutput = Result<Arc<AnalyzerResult>, EngineError>;
pub type JobWork = Pin<Box<dyn Future<Output = JobOutput> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// What a caller gets back when work could not finish inline.
#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub state: JobState,
    pub position: Option<usize>,
}

/// Poll-able view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub state: JobState,
    /// 0 while running, 1-based queue index while queued, absent afterwards.
    pub position: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<AnalyzerResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct JobRecord {
    id: Uuid,
    #[allow(dead_code)]
    fingerprint: Fingerprint,
    state: JobState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    result: Option<Arc<AnalyzerResult>>,
    error: Option<EngineError>,
    work: Option<JobWork>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

struct QueueInner {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    pending: Mutex<VecDeque<Uuid>>,
    wakeup: Notify,
    shutdown: CancellationToken,
    job_timeout: Duration,
    completed_ttl: Duration,
}

/// FIFO admission queue drained by a fixed pool of worker tasks.
///
/// Jobs run strictly in admission order; `position` reports 0 for running
/// jobs and the 1-based queue index otherwise. Terminal jobs are retained for
/// `completed_ttl` and then garbage collected.
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(workers: usize, job_timeout: Duration, completed_ttl: Duration) -> Self {
        let inner = Arc::new(QueueInner {
            jobs: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            job_timeout,
            completed_ttl,
        });

        for worker_id in 0..workers.max(1) {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                worker_loop(worker_id, inner).await;
            });
        }

        let gc_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            gc_loop(gc_inner).await;
        });

        Self { inner }
    }

    /// Admit a job. `make_work` receives the job's cancellation token and
    /// builds the future a worker will drive.
    pub async fn submit<F>(&self, fingerprint: Fingerprint, make_work: F) -> JobHandle
    where
        F: FnOnce(CancellationToken) -> JobWork,
    {
        let id = Uuid::new_v4();
        let cancel = self.inner.shutdown.child_token();
        let work = make_work(cancel.clone());
        let (done_tx, done_rx) = watch::channel(false);

        let record = JobRecord {
            id,
            fingerprint,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            work: Some(work),
            cancel,
            done_tx,
            done_rx,
        };

        let position = {
            let mut jobs = self.inner.jobs.lock().await;
            let mut pending = self.inner.pending.lock().await;
            jobs.insert(id, record);
            pending.push_back(id);
            pending.len()
        };
        self.inner.wakeup.notify_one();
        debug!(job_id = %id, position, "job admitted");

        JobHandle {
            id,
            state: JobState::Queued,
            position: Some(position),
        }
    }

    /// Wait up to `timeout` for the job to reach a terminal state. Returns
    /// the final status if it did.
    pub async fn wait(&self, id: Uuid, timeout: Duration) -> Option<JobStatus> {
        let mut done_rx = {
            let jobs = self.inner.jobs.lock().await;
            let record = jobs.get(&id)?;
            if *record.done_rx.borrow() {
                drop(jobs);
                return self.status(id).await;
            }
            record.done_rx.clone()
        };

        let finished = tokio::time::timeout(timeout, async {
            while !*done_rx.borrow_and_update() {
                if done_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok();

        if finished {
            self.status(id).await
        } else {
            None
        }
    }

    pub async fn status(&self, id: Uuid) -> Option<JobStatus> {
        let (state, created_at, started_at, finished_at, result, error) = {
            let jobs = self.inner.jobs.lock().await;
            let record = jobs.get(&id)?;
            (
                record.state,
                record.created_at,
                record.started_at,
                record.finished_at,
                record.result.clone(),
                record.error.as_ref().map(|e| e.to_string()),
            )
        };
        let position = match state {
            JobState::Running => Some(0),
            JobState::Queued => {
                let pending = self.inner.pending.lock().await;
                pending.iter().position(|pid| *pid == id).map(|idx| idx + 1)
            }
            _ => None,
        };
        Some(JobStatus {
            id,
            state,
            position,
            created_at,
            started_at,
            finished_at,
            result,
            error,
        })
    }

    /// Cloned terminal output of a job, if it has one.
    pub async fn output(&self, id: Uuid) -> Option<JobOutput> {
        let jobs = self.inner.jobs.lock().await;
        let record = jobs.get(&id)?;
        match record.state {
            JobState::Completed => record.result.clone().map(Ok),
            JobState::Failed => record.error.clone().map(Err),
            _ => None,
        }
    }

    /// Cancel a job: queued jobs fail immediately, running jobs get a
    /// cooperative abort request. Returns whether anything changed.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let mut jobs = self.inner.jobs.lock().await;
        let Some(record) = jobs.get_mut(&id) else {
            return false;
        };
        match record.state {
            JobState::Queued => {
                self.inner.pending.lock().await.retain(|pid| *pid != id);
                record.state = JobState::Failed;
                record.error = Some(EngineError::Canceled);
                record.finished_at = Some(Utc::now());
                let _ = record.done_tx.send(true);
                info!(job_id = %id, "queued job canceled");
                true
            }
            JobState::Running => {
                record.cancel.cancel();
                info!(job_id = %id, "cooperative abort requested");
                true
            }
            _ => false,
        }
    }

    /// Stop the workers and cancel everything in flight.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

async fn worker_loop(worker_id: usize, inner: Arc<QueueInner>) {
    loop {
        let job_id = loop {
            if inner.shutdown.is_cancelled() {
                return;
            }
            if let Some(id) = inner.pending.lock().await.pop_front() {
                break id;
            }
            tokio::select! {
                _ = inner.wakeup.notified() => {}
                _ = inner.shutdown.cancelled() => return,
            }
        };

        let work = {
            let mut jobs = inner.jobs.lock().await;
            let Some(record) = jobs.get_mut(&job_id) else {
                continue;
            };
            // A cancel may have raced the dequeue and already failed the job.
            if record.state != JobState::Queued {
                continue;
            }
            record.state = JobState::Running;
            record.started_at = Some(Utc::now());
            record.work.take()
        };
        let Some(work) = work else {
            continue;
        };
        debug!(worker_id, job_id = %job_id, "job started");

        let output = match tokio::time::timeout(inner.job_timeout, work).await {
            Ok(output) => output,
            Err(_) => Err(EngineError::Timeout(format!(
                "job exceeded {}s wall clock",
                inner.job_timeout.as_secs()
            ))),
        };

        let mut jobs = inner.jobs.lock().await;
        if let Some(record) = jobs.get_mut(&job_id) {
            record.finished_at = Some(Utc::now());
            match output {
                Ok(result) => {
                    record.state = JobState::Completed;
                    record.result = Some(result);
                }
                Err(err) => {
                    error!(job_id = %job_id, error = %err, "job failed");
                    record.state = JobState::Failed;
                    record.error = Some(err);
                }
            }
            let _ = record.done_tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn dummy_result(tag: u32) -> Arc<AnalyzerResult> {
        Arc::new(AnalyzerResult {
            report: format!("R{}", tag),
            source_reports: vec![],
            analyzer: "hits".into(),
            pull_count: 0,
            entries: vec![],
            totals: BTreeMap::new(),
            filters: BTreeMap::new(),
            phases: None,
            phase_labels: None,
            ability_ids: None,
            fight_totals: None,
            player_classes: BTreeMap::new(),
            player_roles: BTreeMap::new(),
            player_specs: BTreeMap::new(),
            player_events: None,
        })
    }

    #[tokio::test]
    async fn single_worker_completes_jobs_in_admission_order() {
        let queue = JobQueue::new(1, Duration::from_secs(5), Duration::from_secs(60));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for tag in 0..3u32 {
            let order = Arc::clone(&order);
            let handle = queue
                .submit(Fingerprint::digest(&tag), move |_cancel| {
                    let work: JobWork = Box::pin(async move {
                        order.lock().await.push(tag);
                        Ok(dummy_result(tag))
                    });
                    work
                })
                .await;
            handles.push(handle);
        }

        for handle in &handles {
            let status = queue.wait(handle.id, Duration::from_secs(2)).await.unwrap();
            assert_eq!(status.state, JobState::Completed);
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn queued_position_reflects_admission_order() {
        let queue = JobQueue::new(1, Duration::from_secs(5), Duration::from_secs(60));

        let blocker = queue
            .submit(Fingerprint::digest(&"blocker"), |_cancel| {
                let work: JobWork = Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(dummy_result(0))
                });
                work
            })
            .await;
        let waiting = queue
            .submit(Fingerprint::digest(&"waiting"), |_cancel| {
                let work: JobWork = Box::pin(async { Ok(dummy_result(1)) });
                work
            })
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let blocker_status = queue.status(blocker.id).await.unwrap();
        let waiting_status = queue.status(waiting.id).await.unwrap();
        assert_eq!(blocker_status.state, JobState::Running);
        assert_eq!(blocker_status.position, Some(0));
        assert_eq!(waiting_status.state, JobState::Queued);
        assert_eq!(waiting_status.position, Some(1));
    }

    #[tokio::test]
    async fn canceled_queued_jobs_fail_without_running() {
        let queue = JobQueue::new(1, Duration::from_secs(5), Duration::from_secs(60));
        let ran = Arc::new(Mutex::new(false));

        let _blocker = queue
            .submit(Fingerprint::digest(&"blocker"), |_cancel| {
                let work: JobWork = Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(dummy_result(0))
                });
                work
            })
            .await;
        let victim = {
            let ran = Arc::clone(&ran);
            queue
                .submit(Fingerprint::digest(&"victim"), move |_cancel| {
                    let work: JobWork = Box::pin(async move {
                        *ran.lock().await = true;
                        Ok(dummy_result(1))
                    });
                    work
                })
                .await
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.cancel(victim.id).await);
        let status = queue.wait(victim.id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("job was canceled"));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!*ran.lock().await);
    }
}

/// Periodically drop terminal jobs older than `completed_ttl`.
async fn gc_loop(inner: Arc<QueueInner>) {
    let period = inner.completed_ttl.min(Duration::from_secs(60)).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.shutdown.cancelled() => return,
        }
        let horizon = Utc::now()
            - chrono::Duration::from_std(inner.completed_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let mut jobs = inner.jobs.lock().await;
        jobs.retain(|_, record| {
            let terminal = matches!(record.state, JobState::Completed | JobState::Failed);
            !(terminal && record.finished_at.is_some_and(|at| at < horizon))
        });
    }
}
