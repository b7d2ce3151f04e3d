// Request lifecycle, response cache, and error classification for the
// tutoring platform's AI assistant.

pub mod backend;
pub mod cache;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod request;
pub mod service;

pub use cache::{CacheConfig, CacheStore, FetchOptions, PersistenceAdapter, SetOptions};
pub use classify::{ClassifiedError, ErrorCode, RawError, parse_error};
pub use config::Config;
pub use error::{Result, TutorError};
pub use request::{RequestCoordinator, RequestState, RequestStatus};
pub use service::{AiService, RequestOptions};
