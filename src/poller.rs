//! Analytics job submission and the status polling state machine.
//!
//! ```text
//! SUBMITTED ──► POLLING ──► COMPLETE | FAILED | TIMED_OUT | UNEXPECTED | CANCELLED
//! ```
//!
//! A submission that fails, or that comes back without a job id, ends in
//! `UNEXPECTED` without polling. A submission the server rejects outright
//! (`FAILED`) ends in `FAILED` with zero polls. Otherwise the job is queried
//! up to `max_attempts` times with a fixed delay in between. Failed queries
//! are reported and retried, so a `TIMED_OUT` report may mean the job is slow
//! or the service is unreachable. `last_error` holds the failure of the final
//! query, and is cleared by any query that gets an answer.

use crate::api::{AnalysisParams, ApiClient, JobHandle, ParameterError};
use crate::config::PollingConfig;
use crate::error::RequestError;
use crate::snapshot::{self, GenerationResult, JobSnapshot};
use crate::transport::HttpTransport;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    interval: Duration,
    max_attempts: u32,
}

impl PollPolicy {
    pub fn new(poll_interval_seconds: u64, max_attempts: u32) -> Result<Self, ParameterError> {
        if poll_interval_seconds == 0 {
            return Err(ParameterError::ZeroPollInterval);
        }
        Self::with_interval(Duration::from_secs(poll_interval_seconds), max_attempts)
    }

    /// Sub-second intervals are allowed here; zero is not.
    pub fn with_interval(interval: Duration, max_attempts: u32) -> Result<Self, ParameterError> {
        if interval.is_zero() {
            return Err(ParameterError::ZeroPollInterval);
        }
        if max_attempts == 0 {
            return Err(ParameterError::ZeroMaxAttempts);
        }
        Ok(Self {
            interval,
            max_attempts,
        })
    }

    pub fn from_config(config: &PollingConfig) -> Result<Self, ParameterError> {
        Self::new(config.poll_interval_seconds, config.max_attempts)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Terminal state of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Complete,
    Failed,
    TimedOut,
    Unexpected,
    Cancelled,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Complete => "COMPLETE",
            JobState::Failed => "FAILED",
            JobState::TimedOut => "TIMED_OUT",
            JobState::Unexpected => "UNEXPECTED",
            JobState::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmissionError {
    #[error("failed to trigger analysis: {0}")]
    Request(#[from] RequestError),

    #[error("submission response did not include an analytics id")]
    MissingJobId { body: Option<Value> },
}

/// What a finished run has to show for itself.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The most recent snapshot obtained for the job.
    Snapshot(JobSnapshot),
    /// Polling ended without a single successful status query.
    NoDataObtained,
    /// The job was never created.
    Rejected(SubmissionError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub building_id: u64,
    pub handle: Option<JobHandle>,
    pub state: JobState,
    /// Status queries performed after submission.
    pub polls: u32,
    pub outcome: JobOutcome,
    /// Most recent dispatcher failure seen while polling.
    pub last_error: Option<RequestError>,
}

impl JobReport {
    fn rejected(building_id: u64, error: SubmissionError) -> Self {
        Self {
            building_id,
            handle: None,
            state: JobState::Unexpected,
            polls: 0,
            outcome: JobOutcome::Rejected(error),
            last_error: None,
        }
    }

    fn finished(handle: &JobHandle, state: JobState, polls: u32, snapshot: JobSnapshot) -> Self {
        Self {
            building_id: handle.building_id,
            handle: Some(handle.clone()),
            state,
            polls,
            outcome: JobOutcome::Snapshot(snapshot),
            last_error: None,
        }
    }

    pub fn snapshot(&self) -> Option<&JobSnapshot> {
        match &self.outcome {
            JobOutcome::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == JobState::Complete
    }
}

/// What a single poll attempt produced.
#[derive(Debug, Clone, Copy)]
pub enum PollEvent<'a> {
    Status(&'a JobSnapshot),
    Error(&'a RequestError),
}

/// Receives progress from the poll loop. Rendering is up to the implementor.
pub trait ProgressSink: Send + Sync {
    /// A job of [`JobPoller::run_sequence`] is about to be submitted.
    fn on_job_started(&self, _building_id: u64) {}

    fn on_submitted(&self, _handle: &JobHandle, _initial: &GenerationResult) {}

    fn on_poll_attempt(&self, attempt: u32, max_attempts: u32, event: PollEvent<'_>);

    /// A job of [`JobPoller::run_sequence`] reached its terminal state.
    fn on_job_finished(&self, _report: &JobReport) {}
}

/// Default sink: structured log events only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_submitted(&self, handle: &JobHandle, initial: &GenerationResult) {
        tracing::info!(
            building_id = handle.building_id,
            analytics_id = %handle.analytics_id,
            status = %initial,
            "analysis triggered"
        );
    }

    fn on_poll_attempt(&self, attempt: u32, max_attempts: u32, event: PollEvent<'_>) {
        match event {
            PollEvent::Status(snapshot) => {
                tracing::info!(
                    attempt,
                    max_attempts,
                    status = %snapshot.generation_result(),
                    "poll attempt"
                );
            }
            PollEvent::Error(error) => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    kind = %error.kind(),
                    %error,
                    "error fetching analysis details"
                );
            }
        }
    }
}

pub struct JobPoller<T: HttpTransport> {
    client: ApiClient<T>,
    policy: PollPolicy,
    sink: Box<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl<T: HttpTransport> JobPoller<T> {
    pub fn new(client: ApiClient<T>, policy: PollPolicy) -> Self {
        Self {
            client,
            policy,
            sink: Box::new(TracingProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn client(&self) -> &ApiClient<T> {
        &self.client
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Trigger an analysis for `building_id` and follow it to a terminal state.
    pub async fn submit_and_poll(&self, building_id: u64, params: &AnalysisParams) -> JobReport {
        tracing::info!(
            building_id,
            savings_target = %params.savings_target(),
            min_r_squared = params.min_r_squared(),
            "triggering analysis"
        );

        let body = match self.client.run_building_analysis(building_id, params).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                return JobReport::rejected(
                    building_id,
                    SubmissionError::MissingJobId { body: None },
                )
            }
            Err(error) => {
                tracing::warn!(building_id, %error, "failed to trigger analysis");
                return JobReport::rejected(building_id, error.into());
            }
        };

        let Some(analytics_id) = snapshot::analytics_id(&body) else {
            tracing::warn!(building_id, "submission response carried no analytics id");
            return JobReport::rejected(
                building_id,
                SubmissionError::MissingJobId { body: Some(body) },
            );
        };

        let handle = JobHandle::new(building_id, analytics_id);
        let initial = JobSnapshot::from_body(body);
        self.sink.on_submitted(&handle, initial.generation_result());

        match initial.generation_result() {
            GenerationResult::InProgress | GenerationResult::Unknown(None) => {
                self.poll(&handle).await
            }
            GenerationResult::Failed => JobReport::finished(&handle, JobState::Failed, 0, initial),
            GenerationResult::Complete => {
                JobReport::finished(&handle, JobState::Complete, 0, initial)
            }
            GenerationResult::Unknown(Some(_)) => {
                JobReport::finished(&handle, JobState::Unexpected, 0, initial)
            }
        }
    }

    /// Query an existing job until it reaches a terminal state.
    pub async fn poll(&self, handle: &JobHandle) -> JobReport {
        let max_attempts = self.policy.max_attempts;
        let mut last_snapshot: Option<JobSnapshot> = None;
        let mut last_error: Option<RequestError> = None;
        let mut polls = 0;

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                break;
            }

            polls = attempt;
            match self.client.get_building_analysis(handle).await {
                Ok(body) => {
                    last_error = None;
                    let snapshot = JobSnapshot::from_body(body.unwrap_or(Value::Null));
                    self.sink
                        .on_poll_attempt(attempt, max_attempts, PollEvent::Status(&snapshot));

                    let state = match snapshot.generation_result() {
                        GenerationResult::InProgress => None,
                        GenerationResult::Complete => Some(JobState::Complete),
                        GenerationResult::Failed => Some(JobState::Failed),
                        GenerationResult::Unknown(_) => Some(JobState::Unexpected),
                    };
                    if let Some(state) = state {
                        tracing::info!(%handle, %state, polls, "analysis finished");
                        return JobReport::finished(handle, state, polls, snapshot);
                    }
                    last_snapshot = Some(snapshot);
                }
                Err(error) => {
                    self.sink
                        .on_poll_attempt(attempt, max_attempts, PollEvent::Error(&error));
                    last_error = Some(error);
                }
            }

            if attempt < max_attempts && !self.wait().await {
                break;
            }
        }

        let state = if self.cancel.is_cancelled() {
            JobState::Cancelled
        } else {
            tracing::warn!(%handle, max_attempts, "polling timed out");
            JobState::TimedOut
        };

        JobReport {
            building_id: handle.building_id,
            handle: Some(handle.clone()),
            state,
            polls,
            outcome: match last_snapshot {
                Some(snapshot) => JobOutcome::Snapshot(snapshot),
                None => JobOutcome::NoDataObtained,
            },
            last_error,
        }
    }

    /// Run one job per building, strictly one after another. A cancelled job
    /// ends the sequence.
    pub async fn run_sequence(
        &self,
        building_ids: &[u64],
        params: &AnalysisParams,
    ) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(building_ids.len());

        for &building_id in building_ids {
            if self.cancel.is_cancelled() {
                break;
            }
            self.sink.on_job_started(building_id);
            let report = self.submit_and_poll(building_id, params).await;
            self.sink.on_job_finished(&report);
            let cancelled = report.state == JobState::Cancelled;
            reports.push(report);
            if cancelled {
                break;
            }
        }

        reports
    }

    /// Sleep for one poll interval. Returns `false` if cancelled meanwhile.
    async fn wait(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.policy.interval) => true,
        }
    }
}

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;
