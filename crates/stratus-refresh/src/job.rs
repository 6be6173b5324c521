//! Host background-job scheduling.
//!
//! The refresh scheduler only asks for an earliest start time; when a job
//! actually runs is up to the host. [`TokioJobScheduler`] is the in-process
//! host used by the daemon: it sleeps until the requested time, runs the
//! registered handler, and signals expiry once the wall-clock budget is spent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use stratus_core::{Clock, SchedulerError};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Identifier of the weather refresh job
pub const REFRESH_JOB_ID: &str = "stratus.weather-refresh";

/// Time a handler gets to wind down after expiry is signalled
const EXPIRY_GRACE: Duration = Duration::from_secs(1);

/// Opaque handle of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

impl JobHandle {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub job_id: String,
    pub earliest_start: DateTime<Utc>,
}

/// What a handler gets when its job runs
#[derive(Debug, Clone)]
pub struct JobContext {
    pub handle: JobHandle,
    pub job_id: String,
    expiry: CancellationToken,
}

impl JobContext {
    pub fn new(handle: JobHandle, job_id: impl Into<String>) -> Self {
        Self {
            handle,
            job_id: job_id.into(),
            expiry: CancellationToken::new(),
        }
    }

    /// Signal that the host's budget for this job is spent
    pub fn expire(&self) {
        self.expiry.cancel();
    }

    pub fn is_expired(&self) -> bool {
        self.expiry.is_cancelled()
    }

    /// Resolves once the job has expired
    pub async fn expired(&self) {
        self.expiry.cancelled().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Expired,
}

/// Runs a job. After expiry is signalled the host stops waiting for the
/// result but lets `run` finish.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> JobOutcome;
}

/// Host capability that runs jobs no earlier than a requested time
pub trait JobScheduler: Send + Sync {
    /// Register the handler invoked for `job_id`
    fn register(&self, job_id: &str, handler: Weak<dyn JobHandler>);

    fn submit(&self, request: JobRequest) -> Result<JobHandle, SchedulerError>;

    /// Cancel a pending job; unknown or already started jobs are ignored
    fn cancel(&self, handle: JobHandle);
}

/// Job host built on tokio timers
pub struct TokioJobScheduler {
    clock: Arc<dyn Clock>,
    budget: Duration,
    runtime: Handle,
    handlers: RwLock<HashMap<String, Weak<dyn JobHandler>>>,
    pending: Arc<Mutex<HashMap<JobHandle, CancellationToken>>>,
    next_id: AtomicU64,
}

impl TokioJobScheduler {
    /// Must be called from within a tokio runtime
    pub fn new(clock: Arc<dyn Clock>, budget: Duration) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::Unavailable)?;
        Ok(Self {
            clock,
            budget,
            runtime,
            handlers: RwLock::new(HashMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Cancel every pending job
    pub fn shutdown(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, token) in &pending {
            token.cancel();
        }
        if !pending.is_empty() {
            tracing::info!("Cancelled {} pending background jobs", pending.len());
        }
    }
}

impl JobScheduler for TokioJobScheduler {
    fn register(&self, job_id: &str, handler: Weak<dyn JobHandler>) {
        self.handlers.write().insert(job_id.to_string(), handler);
        tracing::debug!("Registered background job handler: {}", job_id);
    }

    fn submit(&self, request: JobRequest) -> Result<JobHandle, SchedulerError> {
        let handler = self
            .handlers
            .read()
            .get(&request.job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::NoHandler(request.job_id.clone()))?;

        let handle = JobHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        self.pending.lock().insert(handle, cancel.clone());

        let delay = (request.earliest_start - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let pending = self.pending.clone();
        let budget = self.budget;
        let job_id = request.job_id;

        tracing::info!(
            "Submitted {} ({}) to start no earlier than {}",
            job_id,
            handle,
            request.earliest_start
        );

        self.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if pending.lock().remove(&handle).is_none() {
                return;
            }
            let Some(handler) = handler.upgrade() else {
                tracing::warn!("Handler for {} is gone, dropping {}", job_id, handle);
                return;
            };

            let ctx = JobContext::new(handle, job_id.clone());
            let expiry = ctx.clone();
            // Own task: giving up on the handler must not cancel what it does after expiry
            let mut run = tokio::spawn(async move { handler.run(ctx).await });
            let outcome = tokio::select! {
                joined = &mut run => joined_outcome(&job_id, joined),
                _ = tokio::time::sleep(budget) => {
                    tracing::warn!("{} ({}) exceeded its {:?} budget", job_id, handle, budget);
                    expiry.expire();
                    match tokio::time::timeout(EXPIRY_GRACE, &mut run).await {
                        Ok(joined) => joined_outcome(&job_id, joined),
                        Err(_) => {
                            tracing::debug!("{} ({}) still winding down", job_id, handle);
                            JobOutcome::Expired
                        }
                    }
                }
            };
            tracing::info!("{} ({}) finished: {:?}", job_id, handle, outcome);
        });

        Ok(handle)
    }

    fn cancel(&self, handle: JobHandle) {
        if let Some(token) = self.pending.lock().remove(&handle) {
            token.cancel();
            tracing::debug!("Cancelled {}", handle);
        }
    }
}

fn joined_outcome(
    job_id: &str,
    joined: Result<JobOutcome, tokio::task::JoinError>,
) -> JobOutcome {
    joined.unwrap_or_else(|e| {
        tracing::error!("{} handler aborted: {}", job_id, e);
        JobOutcome::Failed
    })
}
