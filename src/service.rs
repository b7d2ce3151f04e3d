// AI request service.
// Runs assistant requests through the cache and the request state machine,
// classifying failures and retrying the retryable ones after their backoff.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{info, warn};

use crate::backend::{
    AiClient, ChatRequest, ChatResponse, FeedbackRequest, FeedbackResponse, HintRequest,
    HintResponse,
};
use crate::cache::{
    AI_NAMESPACE, CacheStore, FetchOptions, PersistenceAdapter, cache_key, feature_prefix,
};
use crate::classify::{RawError, parse_error_with};
use crate::clock::{self, SharedClock};
use crate::config::Config;
use crate::error::Result;
use crate::request::{
    DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES, Priority, RequestCoordinator, RequestMetadata,
    RequestState,
};

pub const FEATURE_CHAT: &str = "chat";
pub const FEATURE_HINT: &str = "hint";
pub const FEATURE_FEEDBACK: &str = "feedback";

/// Tag attached to every cached response for a course.
pub fn course_tag(course_id: &str) -> String {
    format!("course:{}", course_id)
}

/// Per-call knobs for `AiService::request`.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Serve from and store into the cache under this key.
    pub cache_key: Option<String>,
    pub fetch: FetchOptions,
    pub metadata: Option<RequestMetadata>,
    /// Retry retryable failures automatically.
    pub auto_retry: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            cache_key: None,
            fetch: FetchOptions::default(),
            metadata: None,
            auto_retry: true,
        }
    }
}

impl RequestOptions {
    pub fn cached(key: impl Into<String>, fetch: FetchOptions) -> Self {
        Self {
            cache_key: Some(key.into()),
            fetch,
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.auto_retry = false;
        self
    }
}

/// Entry point for the assistant features.
pub struct AiService {
    cache: Arc<CacheStore>,
    client: AiClient,
    clock: SharedClock,
    max_concurrent: usize,
    max_retries: u32,
    chat_seq: AtomicU64,
}

impl AiService {
    pub fn new(cache: Arc<CacheStore>, client: AiClient, clock: SharedClock) -> Self {
        Self {
            cache,
            client,
            clock,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            chat_seq: AtomicU64::new(0),
        }
    }

    pub fn with_limits(mut self, max_concurrent: usize, max_retries: u32) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self.max_retries = max_retries;
        self
    }

    /// Build the cache, client, and limits described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let clock = clock::system();
        let cache = if config.cache.persist {
            CacheStore::with_persistence(
                config.cache.clone(),
                clock.clone(),
                PersistenceAdapter::for_config(&config.cache),
            )
        } else {
            CacheStore::new(config.cache.clone(), clock.clone())
        };
        let client = AiClient::new(config)?;

        Ok(Self::new(Arc::new(cache), client, clock)
            .with_limits(config.max_concurrent, config.max_retries))
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn client(&self) -> &AiClient {
        &self.client
    }

    /// Run `fetcher` as request `id`, returning its settled state.
    pub async fn request<T, F, Fut>(
        &self,
        id: &str,
        fetcher: F,
        options: RequestOptions,
    ) -> RequestState<T>
    where
        T: Clone + Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, RawError>>,
    {
        let clock = self.clock.as_ref();
        let mut state = RequestState::new(id).to_loading(options.metadata.clone(), clock);

        loop {
            let outcome = match &options.cache_key {
                Some(key) => {
                    self.cache
                        .get_or_fetch(key, &fetcher, options.fetch.clone())
                        .await
                }
                None => fetcher().await,
            };

            let raw = match outcome {
                Ok(data) => return state.to_success(data, clock),
                Err(raw) => raw,
            };

            let mut error = parse_error_with(&raw, clock);
            if error.request_id.is_none() {
                error.request_id = Some(id.to_string());
            }
            state = state.to_error(error, clock);

            if !options.auto_retry || !state.can_retry(self.max_retries) {
                return state;
            }

            let delay = state
                .error
                .as_ref()
                .and_then(|e| e.retry_delay())
                .unwrap_or_default();
            info!(
                id,
                attempt = state.retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying AI request"
            );
            tokio::time::sleep(delay).await;

            state = match state.to_retry(clock) {
                Ok(next) => next,
                Err(e) => {
                    warn!(id, "retry rejected: {}", e);
                    return state;
                }
            };
        }
    }

    /// Chat turns are conversational and never cached.
    pub async fn chat(&self, request: ChatRequest) -> RequestState<ChatResponse> {
        let id = self.next_chat_id();
        let options = RequestOptions::default()
            .with_metadata(RequestMetadata::feature(FEATURE_CHAT).with_priority(Priority::High));
        self.request(&id, || self.client.chat(&request), options).await
    }

    /// Unique per service, even for turns started in the same millisecond.
    fn next_chat_id(&self) -> String {
        let seq = self.chat_seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}:{}:{}-{}",
            AI_NAMESPACE,
            FEATURE_CHAT,
            self.clock.now().timestamp_millis(),
            seq
        )
    }

    pub async fn hint(&self, request: HintRequest) -> RequestState<HintResponse> {
        let key = cache_key(AI_NAMESPACE, FEATURE_HINT, &request);
        let options =
            RequestOptions::cached(key.clone(), fetch_options(FEATURE_HINT, &request.course_id))
                .with_metadata(RequestMetadata::feature(FEATURE_HINT));
        self.request(&key, || self.client.hint(&request), options).await
    }

    pub async fn feedback(&self, request: FeedbackRequest) -> RequestState<FeedbackResponse> {
        let key = cache_key(AI_NAMESPACE, FEATURE_FEEDBACK, &request);
        let options =
            RequestOptions::cached(key.clone(), fetch_options(FEATURE_FEEDBACK, &request.course_id))
                .with_metadata(RequestMetadata::feature(FEATURE_FEEDBACK));
        self.request(&key, || self.client.feedback(&request), options).await
    }

    /// Warm the cache with hints for many questions, a few at a time.
    pub async fn prefetch_hints(
        &self,
        requests: Vec<HintRequest>,
    ) -> RequestCoordinator<HintResponse> {
        let mut coordinator = RequestCoordinator::new(self.max_concurrent, self.clock.clone());

        for request in requests {
            let key = cache_key(AI_NAMESPACE, FEATURE_HINT, &request);
            let options = fetch_options(FEATURE_HINT, &request.course_id);
            let cache = self.cache.clone();
            let client = self.client.clone();
            let entry_key = key.clone();

            let queued = coordinator.enqueue(&key, Priority::Low, move || async move {
                cache
                    .get_or_fetch(&entry_key, || client.hint(&request), options)
                    .await
            });
            if let Err(e) = queued {
                warn!(key = %key, "skipping hint prefetch: {}", e);
            }
        }

        coordinator.drain().await;
        coordinator
    }

    /// Drop every cached response for a course.
    pub fn invalidate_course(&self, course_id: &str) -> usize {
        self.cache.invalidate_by_tag(&course_tag(course_id))
    }

    /// Drop every cached response for a feature.
    pub fn invalidate_feature(&self, feature: &str) -> usize {
        self.cache
            .invalidate_by_prefix(&feature_prefix(AI_NAMESPACE, feature))
    }
}

fn fetch_options(feature: &str, course_id: &str) -> FetchOptions {
    FetchOptions::default().with_tags([feature.to_string(), course_tag(course_id)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::classify::{ErrorCode, ErrorContext, create_error};
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicU32;

    fn service() -> AiService {
        let clock: SharedClock = Arc::new(ManualClock::default());
        let cache = Arc::new(CacheStore::new(CacheConfig::default(), clock.clone()));
        let client = AiClient::new(&Config::default()).unwrap();
        AiService::new(cache, client, clock)
    }

    fn http(status: u16) -> RawError {
        RawError::Http {
            status,
            retry_after: Some("1".to_string()),
            body: None,
            message: "failed".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let svc = service();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let state = svc
            .request(
                "hint:1",
                move || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(http(429))
                    } else {
                        Ok("use the quadratic formula".to_string())
                    }
                },
                RequestOptions::default(),
            )
            .await;

        assert!(state.is_success());
        assert_eq!(state.retry_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let svc = service().with_limits(2, 2);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let state: RequestState<String> = svc
            .request(
                "chat:1",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(http(503))
                },
                RequestOptions::default(),
            )
            .await;

        assert!(state.is_error());
        assert_eq!(state.retry_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let error = state.error.unwrap();
        assert_eq!(error.code, ErrorCode::ServiceUnavailable);
        assert_eq!(error.request_id.as_deref(), Some("chat:1"));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let svc = service();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let state: RequestState<String> = svc
            .request(
                "hint:2",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RawError::Classified(create_error(
                        ErrorCode::ContentFiltered,
                        "blocked",
                        ErrorContext::default(),
                    )))
                },
                RequestOptions::default(),
            )
            .await;

        assert!(state.is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!state.can_retry(DEFAULT_MAX_RETRIES));
    }

    #[tokio::test]
    async fn test_auto_retry_can_be_disabled() {
        let svc = service();
        let state: RequestState<String> = svc
            .request(
                "x",
                || async { Err(http(500)) },
                RequestOptions::default().without_retry(),
            )
            .await;
        assert!(state.is_error());
        assert_eq!(state.retry_count, 0);
    }

    #[tokio::test]
    async fn test_cached_request_skips_fetcher() {
        let svc = service();
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let options = RequestOptions::cached(
            "ai:hint:{\"q\":1}",
            fetch_options(FEATURE_HINT, "algebra"),
        );

        for _ in 0..3 {
            let state = svc
                .request(
                    "ai:hint:{\"q\":1}",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, RawError>(42u32)
                    },
                    options.clone(),
                )
                .await;
            assert_eq!(state.data(), Some(&42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(svc.invalidate_course("algebra"), 1);
        assert_eq!(svc.cache().size(), 0);
    }

    #[test]
    fn test_chat_ids_are_unique_within_a_millisecond() {
        let svc = service();
        let first = svc.next_chat_id();
        let second = svc.next_chat_id();

        assert!(first.starts_with("ai:chat:"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalidate_feature() {
        let svc = service();
        svc.cache().set("ai:hint:{\"a\":1}", &1, Default::default());
        svc.cache().set("ai:feedback:{\"a\":1}", &2, Default::default());

        assert_eq!(svc.invalidate_feature(FEATURE_HINT), 1);
        assert_eq!(svc.cache().keys(), vec!["ai:feedback:{\"a\":1}"]);
    }

    #[tokio::test]
    async fn test_prefetch_serves_cached_hints_without_network() {
        let svc = service();
        let request = HintRequest {
            course_id: "algebra".to_string(),
            question_id: "q1".to_string(),
            question: "Solve x^2 = 4".to_string(),
            attempt: None,
            level: 1,
        };
        let cached = HintResponse {
            hint: "Take the square root of both sides".to_string(),
            level: 1,
            remaining_hints: Some(2),
            finish_reason: None,
        };
        let key = cache_key(AI_NAMESPACE, FEATURE_HINT, &request);
        svc.cache().set(&key, &cached, Default::default());

        let coordinator = svc.prefetch_hints(vec![request]).await;

        assert!(coordinator.is_all_success());
        assert_eq!(coordinator.state(&key).unwrap().data(), Some(&cached));
    }
}
