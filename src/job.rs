//! Optimization job records and their lifecycle.
//!
//! ```text
//! pending -> processing -> completed
//!                       \-> failed
//! ```
//!
//! `completed` and `failed` are terminal. Moving an already-processing job to
//! processing again is allowed so that a redelivered queue message can resume it.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OptimizeError;
use crate::model::{AccountId, StaffId};
use crate::objective::{Algorithm, Objective};
use crate::route::UnassignedAppointment;

/// Cause chain entries kept on a failed job.
pub const MAX_TRACE_ENTRIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const IN_FLIGHT: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Processing];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub objective: Objective,
    pub algorithm: Algorithm,
    /// Empty means every staff member with work on the date.
    pub staff_ids: Vec<StaffId>,
    pub force_reoptimization: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Savings {
    pub time_saved_hours: f64,
    pub cost_savings: f64,
    pub efficiency_improvement_percent: f64,
    pub total_distance_km: f64,
    pub routes_created: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    pub total_appointments: usize,
    pub staff_count: usize,
    pub average_route_duration_seconds: f64,
    pub appointments_per_route: f64,
    pub fitness: Option<f64>,
    /// Generations run by the genetic solver.
    pub generations: Option<usize>,
}

/// Payload of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub routes_created: usize,
    pub savings: Savings,
    pub metrics: OptimizationMetrics,
    pub algorithm: Algorithm,
    pub objective: Objective,
    pub unassigned: Vec<UnassignedAppointment>,
}

/// Payload of a failed job; readable without access to logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    pub retryable: bool,
    pub trace: Vec<String>,
}

impl From<&OptimizeError> for JobFailure {
    fn from(err: &OptimizeError) -> Self {
        JobFailure {
            message: err.describe(),
            retryable: err.is_retryable(),
            trace: err.causes().into_iter().take(MAX_TRACE_ENTRIES).collect(),
        }
    }
}

/// Input for [`crate::traits::Store::create_job`]. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub account_id: AccountId,
    pub requested_date: NaiveDate,
    pub parameters: JobParameters,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub id: JobId,
    pub account_id: AccountId,
    pub requested_date: NaiveDate,
    pub status: JobStatus,
    pub parameters: JobParameters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<OptimizationResult>,
    pub error: Option<JobFailure>,
    /// Executions started so far, including redeliveries.
    pub attempts: u32,
    /// Transient failure of the previous attempt while a retry is pending.
    pub last_error: Option<String>,
    /// Last lifecycle change; an in-flight job idle for too long is abandoned.
    pub updated_at: DateTime<Utc>,
}

impl OptimizationJob {
    pub fn from_new(id: JobId, new: NewJob) -> Self {
        Self {
            id,
            account_id: new.account_id,
            requested_date: new.requested_date,
            status: JobStatus::Pending,
            parameters: new.parameters,
            created_at: new.created_at,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            attempts: 0,
            last_error: None,
            updated_at: new.created_at,
        }
    }

    fn transition(&self, to: JobStatus) -> OptimizeError {
        OptimizeError::InvalidTransition {
            job: self.id,
            from: self.status,
            to,
        }
    }

    /// Begins an execution attempt.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), OptimizeError> {
        match self.status {
            JobStatus::Pending | JobStatus::Processing => {
                self.status = JobStatus::Processing;
                self.started_at.get_or_insert(now);
                self.attempts += 1;
                self.updated_at = now;
                Ok(())
            }
            JobStatus::Completed | JobStatus::Failed => Err(self.transition(JobStatus::Processing)),
        }
    }

    pub fn complete(
        &mut self,
        result: OptimizationResult,
        now: DateTime<Utc>,
    ) -> Result<(), OptimizeError> {
        if self.status != JobStatus::Processing {
            return Err(self.transition(JobStatus::Completed));
        }
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
        self.updated_at = now;
        self.last_error = None;
        Ok(())
    }

    pub fn fail(&mut self, failure: JobFailure, now: DateTime<Utc>) -> Result<(), OptimizeError> {
        if self.status != JobStatus::Processing {
            return Err(self.transition(JobStatus::Failed));
        }
        self.finish_failed(failure, now);
        Ok(())
    }

    /// Fails a job that can no longer make progress, whether or not an
    /// execution ever started.
    pub fn abandon(
        &mut self,
        failure: JobFailure,
        now: DateTime<Utc>,
    ) -> Result<(), OptimizeError> {
        if self.is_terminal() {
            return Err(self.transition(JobStatus::Failed));
        }
        self.finish_failed(failure, now);
        Ok(())
    }

    fn finish_failed(&mut self, failure: JobFailure, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(failure.message.clone());
        self.error = Some(failure);
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Notes a transient failure; the job stays processing until redelivered.
    pub fn record_retry(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), OptimizeError> {
        if self.status != JobStatus::Processing {
            return Err(self.transition(JobStatus::Processing));
        }
        self.last_error = Some(message.into());
        self.updated_at = now;
        Ok(())
    }

    /// In flight with no lifecycle change for more than `after_secs`.
    pub fn is_stale(&self, now: DateTime<Utc>, after_secs: u64) -> bool {
        let idle = (now - self.updated_at).num_seconds();
        !self.is_terminal() && u64::try_from(idle).is_ok_and(|idle| idle > after_secs)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    pub fn processing_time_seconds(&self) -> Option<i64> {
        Some((self.completed_at? - self.started_at?).num_seconds())
    }

    pub fn savings(&self) -> Option<&Savings> {
        self.result.as_ref().map(|result| &result.savings)
    }

    pub fn time_savings(&self) -> f64 {
        self.savings().map_or(0.0, |s| s.time_saved_hours)
    }

    pub fn cost_savings(&self) -> f64 {
        self.savings().map_or(0.0, |s| s.cost_savings)
    }

    pub fn routes_created(&self) -> usize {
        self.result.as_ref().map_or(0, |result| result.routes_created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use chrono::Duration;

    fn job() -> OptimizationJob {
        OptimizationJob::from_new(
            JobId(1),
            NewJob {
                account_id: AccountId::new("acct"),
                requested_date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
                parameters: JobParameters {
                    objective: Objective::MinimizeTravelTime,
                    algorithm: Algorithm::NearestNeighbor,
                    staff_ids: Vec::new(),
                    force_reoptimization: false,
                },
                created_at: Utc::now(),
            },
        )
    }

    fn result() -> OptimizationResult {
        OptimizationResult {
            routes_created: 2,
            savings: Savings {
                time_saved_hours: 1.5,
                cost_savings: 37.5,
                ..Savings::default()
            },
            metrics: OptimizationMetrics::default(),
            algorithm: Algorithm::NearestNeighbor,
            objective: Objective::MinimizeTravelTime,
            unassigned: Vec::new(),
        }
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut job = job();
        let started = Utc::now();
        job.start(started).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);

        job.complete(result(), started + Duration::seconds(4)).unwrap();
        assert!(job.is_success());
        assert_eq!(job.processing_time_seconds(), Some(4));
        assert_eq!(job.routes_created(), 2);
        assert_eq!(job.time_savings(), 1.5);
        assert_eq!(job.cost_savings(), 37.5);
    }

    #[test]
    fn restart_while_processing_is_allowed() {
        let mut job = job();
        let first = Utc::now();
        job.start(first).unwrap();
        job.record_retry("quota", first + Duration::seconds(1)).unwrap();
        job.start(first + Duration::seconds(30)).unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.started_at, Some(first));
        assert_eq!(job.updated_at, first + Duration::seconds(30));
        assert_eq!(job.last_error.as_deref(), Some("quota"));
    }

    #[test]
    fn pending_job_can_be_abandoned() {
        let mut job = job();
        let err = OptimizeError::Abandoned {
            job: job.id,
            idle_secs: 3600,
        };
        job.abandon(JobFailure::from(&err), Utc::now()).unwrap();
        assert!(job.is_failed());
        assert_eq!(job.attempts, 0);
        assert!(job.error.as_ref().unwrap().message.contains("abandoned"));

        // already terminal
        assert!(job.abandon(JobFailure::from(&err), Utc::now()).is_err());
    }

    #[test]
    fn staleness_is_measured_from_the_last_change() {
        let mut job = job();
        let created = job.created_at;
        assert!(!job.is_stale(created + Duration::seconds(60), 600));
        assert!(job.is_stale(created + Duration::seconds(601), 600));

        job.start(created + Duration::seconds(590)).unwrap();
        assert!(!job.is_stale(created + Duration::seconds(601), 600));

        job.complete(result(), created + Duration::seconds(595)).unwrap();
        assert!(!job.is_stale(created + Duration::hours(5), 600));
    }

    #[test]
    fn terminal_jobs_reject_transitions() {
        let mut job = job();
        job.start(Utc::now()).unwrap();
        let err = OptimizeError::from(ValidationError::UnknownObjective("x".into()));
        job.fail(JobFailure::from(&err), Utc::now()).unwrap();
        assert!(job.is_failed());
        assert!(!job.error.as_ref().unwrap().retryable);

        assert!(matches!(
            job.start(Utc::now()),
            Err(OptimizeError::InvalidTransition {
                from: JobStatus::Failed,
                ..
            })
        ));
        assert!(job.complete(result(), Utc::now()).is_err());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn pending_job_cannot_complete() {
        let mut job = job();
        assert!(job.complete(result(), Utc::now()).is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }
}
