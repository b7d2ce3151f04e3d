// Lifecycle state for one logical AI request.
// Transitions never mutate the previous state; each returns a new one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{ClassifiedError, ErrorCode};
use crate::clock::Clock;

/// Retries allowed before `can_retry` gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// Scheduling priority. Ordered `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Caller-supplied context carried alongside a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// AI feature that issued the request (`chat`, `hint`, `feedback`).
    pub feature: Option<String>,
    pub priority: Priority,
    /// UI surface the request came from.
    pub source: Option<String>,
}

impl RequestMetadata {
    pub fn feature(feature: impl Into<String>) -> Self {
        Self {
            feature: Some(feature.into()),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Rejected state transitions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("request {id} cannot be retried while {status:?}")]
    NotInError { id: String, status: RequestStatus },

    #[error("request {id} failed with {code}, which is not retryable")]
    NotRetryable { id: String, code: ErrorCode },
}

/// State of one logical request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestState<T> {
    pub id: String,
    pub status: RequestStatus,
    /// Last successful result. Survives a later failure so stale data can
    /// still be shown next to the error.
    pub data: Option<T>,
    pub error: Option<ClassifiedError>,
    pub started_at: Option<DateTime<Utc>>,
    /// `None` while loading.
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub metadata: Option<RequestMetadata>,
}

impl<T> RequestState<T> {
    /// A fresh idle request.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: RequestStatus::Idle,
            data: None,
            error: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            metadata: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == RequestStatus::Idle
    }

    pub fn is_loading(&self) -> bool {
        self.status == RequestStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == RequestStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == RequestStatus::Error
    }

    /// Finished, either way.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, RequestStatus::Success | RequestStatus::Error)
    }

    /// Whether another attempt is allowed under `max_retries`.
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.is_error()
            && self.error.as_ref().is_some_and(|e| e.retryable)
            && self.retry_count < max_retries
    }

    /// The result of the current success, if any.
    pub fn data(&self) -> Option<&T> {
        match self.status {
            RequestStatus::Success => self.data.as_ref(),
            _ => None,
        }
    }

    /// Time between start and completion.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

impl<T: Clone> RequestState<T> {
    /// Start (or restart) the request. Metadata is replaced only when given.
    pub fn to_loading(&self, metadata: Option<RequestMetadata>, clock: &dyn Clock) -> Self {
        Self {
            status: RequestStatus::Loading,
            error: None,
            started_at: Some(clock.now()),
            completed_at: None,
            metadata: metadata.or_else(|| self.metadata.clone()),
            ..self.clone()
        }
    }

    pub fn to_success(&self, data: T, clock: &dyn Clock) -> Self {
        Self {
            status: RequestStatus::Success,
            data: Some(data),
            error: None,
            completed_at: Some(clock.now()),
            ..self.clone()
        }
    }

    /// Record a failure. Prior data is kept.
    pub fn to_error(&self, error: ClassifiedError, clock: &dyn Clock) -> Self {
        Self {
            status: RequestStatus::Error,
            error: Some(error),
            completed_at: Some(clock.now()),
            ..self.clone()
        }
    }

    /// Go back to loading after a retryable failure.
    pub fn to_retry(&self, clock: &dyn Clock) -> Result<Self, TransitionError> {
        let error = match (&self.status, &self.error) {
            (RequestStatus::Error, Some(error)) => error,
            _ => {
                return Err(TransitionError::NotInError {
                    id: self.id.clone(),
                    status: self.status,
                });
            }
        };

        if !error.retryable {
            return Err(TransitionError::NotRetryable {
                id: self.id.clone(),
                code: error.code,
            });
        }

        let mut next = self.to_loading(None, clock);
        next.retry_count = self.retry_count + 1;
        Ok(next)
    }
}
