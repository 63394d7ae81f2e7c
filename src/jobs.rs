//! Async job tracking
//!
//! Every asynchronous command returns a job id. Each tracked job gets its own
//! poll task that queries the job on a fixed interval until it reaches a
//! terminal state, then reports once over the event channel and exits.

use crate::actions::ActionDescriptor;
use crate::api::{ApiError, CloudClient, JobStatus};
use crate::panel::TargetRef;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type JobId = String;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Job {0} is already being tracked")]
    AlreadyTracked(JobId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(Value),
    Failed(String),
    /// Polling hit a transport or API error; the job's fate is unknown.
    Abandoned(ApiError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

#[derive(Debug)]
pub struct TrackedJob {
    pub id: JobId,
    pub label: String,
    pub target: TargetRef,
    pub action: &'static ActionDescriptor,
    pub started_at: Instant,
    cancel: CancellationToken,
}

impl TrackedJob {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

pub struct JobTracker {
    client: Arc<CloudClient>,
    default_interval: Duration,
    jobs: HashMap<JobId, TrackedJob>,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl JobTracker {
    pub fn new(
        client: Arc<CloudClient>,
        default_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let tracker = Self {
            client,
            default_interval,
            jobs: HashMap::new(),
            events,
        };
        (tracker, receiver)
    }

    /// Registers a job and starts polling it.
    pub fn track(
        &mut self,
        job_id: JobId,
        label: String,
        target: TargetRef,
        action: &'static ActionDescriptor,
    ) -> Result<(), JobError> {
        if self.jobs.contains_key(&job_id) {
            return Err(JobError::AlreadyTracked(job_id));
        }

        let interval = action.poll_interval().unwrap_or(self.default_interval);
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Stopped polling job {}", id);
                }
                outcome = poll_until_terminal(client, id.clone(), interval) => {
                    if events.send(JobEvent { job_id: id, outcome }).is_err() {
                        debug!("Job event receiver is gone");
                    }
                }
            }
        });

        info!("Tracking job {} ({}) every {:?}", job_id, label, interval);
        self.jobs.insert(
            job_id.clone(),
            TrackedJob {
                id: job_id,
                label,
                target,
                action,
                started_at: Instant::now(),
                cancel,
            },
        );
        Ok(())
    }

    /// Deregisters a job whose terminal event arrived. `None` if it was not tracked.
    pub fn finish(&mut self, job_id: &str) -> Option<TrackedJob> {
        let job = self.jobs.remove(job_id)?;
        job.cancel.cancel();
        Some(job)
    }

    pub fn cancel(&mut self, job_id: &str) -> bool {
        match self.jobs.remove(job_id) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops every poll task. Returns how many jobs were abandoned.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.jobs.len();
        for (_, job) in self.jobs.drain() {
            job.cancel.cancel();
        }
        if count > 0 {
            info!("Abandoned {} running jobs", count);
        }
        count
    }

    pub fn is_tracked(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Tracked jobs, oldest first.
    pub fn jobs(&self) -> Vec<&TrackedJob> {
        let mut jobs: Vec<&TrackedJob> = self.jobs.values().collect();
        jobs.sort_by_key(|job| job.started_at);
        jobs
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Polls one job until it succeeds or fails. Any error while polling ends
/// tracking without a retry.
pub async fn poll_until_terminal(
    client: Arc<CloudClient>,
    job_id: JobId,
    interval: Duration,
) -> JobOutcome {
    loop {
        tokio::time::sleep(interval).await;

        match client.query_async_job_result(&job_id).await {
            Ok(JobStatus::Pending) => {
                debug!("Job {} still pending", job_id);
            }
            Ok(JobStatus::Succeeded(result)) => return JobOutcome::Succeeded(result),
            Ok(JobStatus::Failed(text)) => return JobOutcome::Failed(text),
            Err(err) => {
                warn!("Polling job {} failed, giving up: {}", job_id, err);
                return JobOutcome::Abandoned(err);
            }
        }
    }
}
