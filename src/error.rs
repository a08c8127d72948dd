//! Error taxonomy for the optimizer and its collaborators.

use std::error::Error as StdError;

use chrono::NaiveDate;
use thiserror::Error;

use crate::job::{JobId, JobStatus};
use crate::model::{AccountId, AppointmentId};

/// Failures reported by a [`crate::traits::DistanceProvider`].
///
/// Zero-results answers are not errors; providers return them as "no data".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("distance provider quota exceeded")]
    QuotaExceeded,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request denied: {0}")]
    RequestDenied(String),
    #[error("unknown provider status {status}: {message}")]
    UnknownStatus { status: String, message: String },
    #[error("provider returned HTTP {status}")]
    Http { status: u16 },
    #[error("transport failure: {message}")]
    Transport { message: String, timeout: bool },
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// Transient failures worth retrying later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::QuotaExceeded | ProviderError::Transport { .. } => true,
            ProviderError::Http { status } => *status == 429 || *status >= 500,
            ProviderError::InvalidRequest(_)
            | ProviderError::RequestDenied(_)
            | ProviderError::UnknownStatus { .. }
            | ProviderError::MalformedResponse(_)
            | ProviderError::Unsupported(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ProviderError::MalformedResponse(err.to_string());
        }
        if let Some(status) = err.status() {
            return ProviderError::Http {
                status: status.as_u16(),
            };
        }
        ProviderError::Transport {
            message: err.to_string(),
            timeout: err.is_timeout(),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::MalformedResponse(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{entity} {id} not found in store")]
    Missing { entity: &'static str, id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("job queue closed")]
    Closed,
    #[error("no job queue configured for asynchronous optimization")]
    NotConfigured,
}

/// Bad input. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error(
        "invalid optimization type '{0}'. Must be one of: minimize_travel_time, \
         minimize_distance, minimize_total_cost, balance_workload, maximize_revenue"
    )]
    UnknownObjective(String),
    #[error("invalid algorithm '{0}'. Must be one of: nearest_neighbor, genetic")]
    UnknownAlgorithm(String),
    #[error("no appointments found for optimization on {date}")]
    NoAppointments { date: NaiveDate },
    #[error("no available staff for {date}")]
    NoStaff { date: NaiveDate },
    #[error("appointment {0} has a non-positive service duration")]
    InvalidDuration(AppointmentId),
    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),
}

/// Broad classes callers and the queue act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Provider,
    Computation,
}

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("optimization job {0} not found")]
    JobNotFound(JobId),
    #[error("distance provider failed")]
    Provider(#[from] ProviderError),
    #[error("store operation failed")]
    Store(#[from] StoreError),
    #[error("could not enqueue optimization")]
    Queue(#[from] QueueError),
    #[error("job {job} cannot move from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("computation failed: {0}")]
    Computation(String),
    #[error("optimization job {job} made no progress for {idle_secs}s and was abandoned")]
    Abandoned { job: JobId, idle_secs: i64 },
}

impl OptimizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OptimizeError::Validation(_) => ErrorKind::Validation,
            OptimizeError::AccountNotFound(_) | OptimizeError::JobNotFound(_) => {
                ErrorKind::NotFound
            }
            OptimizeError::Provider(_) => ErrorKind::Provider,
            OptimizeError::Store(_)
            | OptimizeError::Queue(_)
            | OptimizeError::InvalidTransition { .. }
            | OptimizeError::Computation(_)
            | OptimizeError::Abandoned { .. } => ErrorKind::Computation,
        }
    }

    /// Whether a queued execution that hit this error should be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            OptimizeError::Provider(err) => err.is_retryable(),
            OptimizeError::Store(_) | OptimizeError::Computation(_) => true,
            OptimizeError::Validation(_)
            | OptimizeError::AccountNotFound(_)
            | OptimizeError::JobNotFound(_)
            | OptimizeError::Queue(_)
            | OptimizeError::InvalidTransition { .. }
            | OptimizeError::Abandoned { .. } => false,
        }
    }

    /// Full message including every underlying cause, for job records.
    pub fn describe(&self) -> String {
        let mut message = self.to_string();
        for cause in self.causes().into_iter().skip(1) {
            message.push_str(": ");
            message.push_str(&cause);
        }
        message
    }

    /// Display strings of this error and its sources, outermost first.
    pub fn causes(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = StdError::source(self);
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        chain
    }
}
