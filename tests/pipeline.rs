// End-to-end tests for the AI request pipeline.
// Exercise the service, cache, coordinator, and classifier through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tempfile::TempDir;

use tutor_ai::backend::{AiClient, interpret_response};
use tutor_ai::cache::{CacheConfig, CacheStore, FetchOptions, FileStorage, PersistenceAdapter};
use tutor_ai::classify::{ErrorCategory, ErrorCode, RawError, parse_error};
use tutor_ai::clock::{ManualClock, SharedClock};
use tutor_ai::request::{Priority, RequestCoordinator};
use tutor_ai::{AiService, Config, RequestOptions};

fn persisted_store(dir: &TempDir, clock: SharedClock) -> CacheStore {
    let config = CacheConfig {
        persist: true,
        ..CacheConfig::default()
    };
    let adapter = PersistenceAdapter::new(
        &config.key_prefix,
        Box::new(FileStorage::new(dir.path())),
    );
    CacheStore::with_persistence(config, clock, adapter)
}

fn service(cache: CacheStore, clock: SharedClock) -> AiService {
    let client = AiClient::new(&Config::default()).unwrap();
    AiService::new(Arc::new(cache), client, clock)
}

#[tokio::test]
async fn test_cached_response_survives_restart_until_ttl() {
    let temp_dir = TempDir::new().unwrap();
    let manual = Arc::new(ManualClock::default());
    let clock: SharedClock = manual.clone();
    let calls = AtomicU32::new(0);
    let calls = &calls;
    let fetch = move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, RawError>("Factor the left-hand side first".to_string())
    };
    let options = RequestOptions::cached(
        "ai:hint:{\"question_id\":\"q7\"}",
        FetchOptions::default()
            .with_ttl(Duration::from_secs(60))
            .with_tags(["hint", "course:algebra"]),
    );

    let svc = service(persisted_store(&temp_dir, clock.clone()), clock.clone());
    let state = svc.request("q7", fetch, options.clone()).await;
    assert!(state.is_success());
    drop(svc);

    // A fresh store over the same storage serves the entry without fetching.
    let svc = service(persisted_store(&temp_dir, clock.clone()), clock.clone());
    let state = svc.request("q7", fetch, options.clone()).await;
    assert_eq!(state.data().map(String::as_str), Some("Factor the left-hand side first"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(svc.cache().stats().hits, 1);

    manual.advance(chrono::Duration::seconds(61));
    let state = svc.request("q7", fetch, options).await;
    assert!(state.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert_eq!(svc.invalidate_course("algebra"), 1);
    let restored = persisted_store(&temp_dir, clock);
    assert_eq!(restored.size(), 0);
}

#[tokio::test]
async fn test_coordinator_classifies_and_retries_failures() {
    let clock: SharedClock = Arc::new(ManualClock::default());
    let mut coordinator: RequestCoordinator<String> = RequestCoordinator::new(2, clock);

    for i in 0..4 {
        let id = format!("hint-{}", i);
        coordinator
            .enqueue(&id, Priority::Normal, move || async move {
                if i == 2 {
                    Err(RawError::Http {
                        status: 429,
                        retry_after: Some("2".to_string()),
                        body: None,
                        message: "slow down".to_string(),
                    })
                } else {
                    Ok(format!("hint {}", i))
                }
            })
            .unwrap();
    }
    coordinator.drain().await;

    assert!(coordinator.has_any_error());
    assert!(!coordinator.is_any_loading());
    let errors = coordinator.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::RateLimited);
    assert_eq!(errors[0].retry_after_ms, Some(2000));
    assert_eq!(errors[0].request_id.as_deref(), Some("hint-2"));

    let ticket = coordinator.retry("hint-2").unwrap();
    assert_eq!(coordinator.state("hint-2").unwrap().retry_count, 1);
    assert!(coordinator.succeed(&ticket, "hint 2".to_string()));
    assert!(coordinator.is_all_success());
}

#[test]
fn test_quota_in_successful_response_is_not_retryable() {
    let raw = interpret_response(
        200,
        None,
        r#"{ "error": { "code": "quota_exceeded", "message": "Monthly quota used up" } }"#,
    )
    .unwrap_err();

    let error = parse_error(&raw);
    assert_eq!(error.category, ErrorCategory::Quota);
    assert!(!error.retryable);
    assert!(error.retry_after_ms.is_none());
    assert!(error.is_quota_error());
}
