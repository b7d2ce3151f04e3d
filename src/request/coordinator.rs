// Coordinator for many concurrent AI requests.
// Tracks named request states, aggregates their status, and admits queued
// work in priority order without exceeding the concurrency limit.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::classify::{ClassifiedError, RawError, parse_error_with};
use crate::clock::SharedClock;

use super::state::{Priority, RequestMetadata, RequestState, TransitionError};

/// Default number of requests allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
/// Default number of requests allowed to wait in the queue.
pub const DEFAULT_MAX_QUEUED: usize = 50;

/// In-flight request body.
pub type RequestFuture<T> = Pin<Box<dyn Future<Output = Result<T, RawError>> + Send>>;

/// Deferred request body.
pub type Execute<T> = Box<dyn FnOnce() -> RequestFuture<T> + Send>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("request queue is full ({limit} pending)")]
    QueueFull { limit: usize },
}

/// Proof that a caller started a request. Completing with a ticket whose
/// generation is stale (the request was cancelled or restarted) is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub id: String,
    generation: u64,
}

/// A unit of work waiting for a free slot.
pub struct QueuedRequest<T> {
    pub id: String,
    pub priority: Priority,
    pub added_at: DateTime<Utc>,
    seq: u64,
    execute: Execute<T>,
}

impl<T> std::fmt::Debug for QueuedRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("added_at", &self.added_at)
            .field("seq", &self.seq)
            .finish()
    }
}

impl<T> PartialEq for QueuedRequest<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for QueuedRequest<T> {}

impl<T> PartialOrd for QueuedRequest<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueuedRequest<T> {
    // Max-heap: higher priority first, then earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Tracks a set of named requests and admits queued work.
pub struct RequestCoordinator<T> {
    states: HashMap<String, RequestState<T>>,
    generations: HashMap<String, u64>,
    queue: BinaryHeap<QueuedRequest<T>>,
    max_concurrent: usize,
    max_queued: usize,
    next_seq: u64,
    clock: SharedClock,
}

impl<T: Clone> RequestCoordinator<T> {
    pub fn new(max_concurrent: usize, clock: SharedClock) -> Self {
        Self {
            states: HashMap::new(),
            generations: HashMap::new(),
            queue: BinaryHeap::new(),
            max_concurrent: max_concurrent.max(1),
            max_queued: DEFAULT_MAX_QUEUED,
            next_seq: 0,
            clock,
        }
    }

    pub fn with_queue_limit(mut self, max_queued: usize) -> Self {
        self.max_queued = max_queued;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn state(&self, id: &str) -> Option<&RequestState<T>> {
        self.states.get(id)
    }

    pub fn states(&self) -> impl Iterator<Item = &RequestState<T>> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn is_any_loading(&self) -> bool {
        self.states.values().any(RequestState::is_loading)
    }

    pub fn has_any_error(&self) -> bool {
        self.states.values().any(RequestState::is_error)
    }

    pub fn is_all_success(&self) -> bool {
        !self.states.is_empty() && self.states.values().all(RequestState::is_success)
    }

    pub fn loading_count(&self) -> usize {
        self.states.values().filter(|s| s.is_loading()).count()
    }

    /// Errors of every request currently in the error state.
    pub fn errors(&self) -> Vec<&ClassifiedError> {
        self.states
            .values()
            .filter(|s| s.is_error())
            .filter_map(|s| s.error.as_ref())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    fn next_generation(&mut self, id: &str) -> u64 {
        let generation = self.generations.entry(id.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        self.generations.get(&ticket.id) == Some(&ticket.generation)
    }

    /// Move a request into loading, creating it if needed.
    pub fn start(&mut self, id: &str, metadata: Option<RequestMetadata>) -> Ticket {
        let next = self
            .states
            .get(id)
            .cloned()
            .unwrap_or_else(|| RequestState::new(id))
            .to_loading(metadata, self.clock.as_ref());
        self.states.insert(id.to_string(), next);

        let generation = self.next_generation(id);
        Ticket {
            id: id.to_string(),
            generation,
        }
    }

    /// Record a result. Returns false when the ticket is stale.
    pub fn succeed(&mut self, ticket: &Ticket, data: T) -> bool {
        if !self.is_current(ticket) {
            debug!(id = %ticket.id, "ignoring late success for cancelled request");
            return false;
        }
        let Some(state) = self.states.get(&ticket.id) else {
            return false;
        };
        let next = state.to_success(data, self.clock.as_ref());
        self.states.insert(ticket.id.clone(), next);
        true
    }

    /// Classify and record a failure. Returns false when the ticket is stale.
    pub fn fail(&mut self, ticket: &Ticket, raw: &RawError) -> bool {
        if !self.is_current(ticket) {
            debug!(id = %ticket.id, "ignoring late failure for cancelled request");
            return false;
        }
        let Some(state) = self.states.get(&ticket.id) else {
            return false;
        };
        let mut error = parse_error_with(raw, self.clock.as_ref());
        if error.request_id.is_none() {
            error.request_id = Some(ticket.id.clone());
        }
        warn!(id = %ticket.id, code = %error.code, "request failed: {}", error.technical_message);
        let next = state.to_error(error, self.clock.as_ref());
        self.states.insert(ticket.id.clone(), next);
        true
    }

    /// Put a failed request back into loading.
    pub fn retry(&mut self, id: &str) -> Result<Ticket, TransitionError> {
        let current = self
            .states
            .get(id)
            .cloned()
            .unwrap_or_else(|| RequestState::new(id));
        let next = current.to_retry(self.clock.as_ref())?;
        self.states.insert(id.to_string(), next);

        let generation = self.next_generation(id);
        Ok(Ticket {
            id: id.to_string(),
            generation,
        })
    }

    /// Drop a request and any queued work for it. Outstanding tickets go stale.
    pub fn cancel(&mut self, id: &str) -> bool {
        let queued_before = self.queue.len();
        self.queue.retain(|item| item.id != id);
        let dequeued = queued_before != self.queue.len();

        self.next_generation(id);
        let removed = self.states.remove(id).is_some();
        removed || dequeued
    }

    /// Return a request to idle, keeping its slot in the map.
    pub fn reset(&mut self, id: &str) {
        self.next_generation(id);
        self.states.insert(id.to_string(), RequestState::new(id));
    }

    pub fn remove(&mut self, id: &str) -> Option<RequestState<T>> {
        self.next_generation(id);
        self.states.remove(id)
    }

    /// Forget every request and all queued work.
    pub fn clear(&mut self) {
        let ids: Vec<String> = self.generations.keys().cloned().collect();
        for id in ids {
            self.next_generation(&id);
        }
        self.states.clear();
        self.queue.clear();
    }

    /// Queue work to run when a slot is free.
    pub fn enqueue<F, Fut>(
        &mut self,
        id: &str,
        priority: Priority,
        execute: F,
    ) -> Result<(), CoordinatorError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RawError>> + Send + 'static,
    {
        if self.queue.len() >= self.max_queued {
            return Err(CoordinatorError::QueueFull {
                limit: self.max_queued,
            });
        }

        self.states
            .entry(id.to_string())
            .or_insert_with(|| RequestState::new(id));

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedRequest {
            id: id.to_string(),
            priority,
            added_at: self.clock.now(),
            seq,
            execute: Box::new(move || -> RequestFuture<T> { Box::pin(execute()) }),
        });
        Ok(())
    }

    /// Start as much queued work as the concurrency limit allows.
    /// Work for an id that is already loading waits until it settles.
    pub fn admit(&mut self) -> Vec<(Ticket, Execute<T>)> {
        let mut admitted = Vec::new();
        let mut held = Vec::new();
        while self.loading_count() < self.max_concurrent {
            let Some(item) = self.queue.pop() else {
                break;
            };
            if self.states.get(&item.id).is_some_and(RequestState::is_loading) {
                held.push(item);
                continue;
            }
            let metadata = self
                .states
                .get(&item.id)
                .and_then(|s| s.metadata.clone())
                .unwrap_or_default()
                .with_priority(item.priority);
            let ticket = self.start(&item.id, Some(metadata));
            debug!(id = %item.id, priority = ?item.priority, "admitted queued request");
            admitted.push((ticket, item.execute));
        }
        self.queue.extend(held);
        admitted
    }
}

impl<T: Clone + Send + 'static> RequestCoordinator<T> {
    /// Run queued work to completion, keeping at most `max_concurrent`
    /// requests in flight.
    pub async fn drain(&mut self) {
        let mut in_flight = JoinSet::new();

        loop {
            for (ticket, execute) in self.admit() {
                in_flight.spawn(async move {
                    let outcome = match tokio::spawn(execute()).await {
                        Ok(result) => result,
                        Err(e) => Err(RawError::Message(format!("request task failed: {}", e))),
                    };
                    (ticket, outcome)
                });
            }

            match in_flight.join_next().await {
                Some(Ok((ticket, Ok(data)))) => {
                    self.succeed(&ticket, data);
                }
                Some(Ok((ticket, Err(raw)))) => {
                    self.fail(&ticket, &raw);
                }
                Some(Err(e)) => warn!("request supervisor task failed: {}", e),
                None => break,
            }
        }

        if !self.queue.is_empty() {
            warn!(
                pending = self.queue.len(),
                "queue stalled behind requests started outside the coordinator"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorCode;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn coordinator(max: usize) -> RequestCoordinator<u32> {
        RequestCoordinator::new(max, Arc::new(ManualClock::default()))
    }

    #[test]
    fn test_aggregates() {
        let mut c = coordinator(3);
        assert!(!c.is_all_success());
        assert!(!c.is_any_loading());

        let a = c.start("a", None);
        let b = c.start("b", None);
        assert!(c.is_any_loading());
        assert_eq!(c.loading_count(), 2);

        c.succeed(&a, 1);
        assert!(!c.is_all_success());
        c.succeed(&b, 2);
        assert!(c.is_all_success());
        assert!(!c.has_any_error());

        let a = c.start("a", None);
        c.fail(&a, &RawError::Transport {
            message: "reset".to_string(),
            timed_out: false,
        });
        assert!(c.has_any_error());
        assert!(!c.is_all_success());
        assert_eq!(c.errors()[0].code, ErrorCode::NetworkError);
        assert_eq!(c.errors()[0].request_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_cancelled_ticket_is_ignored() {
        let mut c = coordinator(3);
        let ticket = c.start("hint", None);
        assert!(c.cancel("hint"));

        assert!(!c.succeed(&ticket, 7));
        assert!(c.state("hint").is_none());

        let stale = c.start("chat", None);
        let fresh = c.start("chat", None);
        assert!(!c.succeed(&stale, 1));
        assert!(c.succeed(&fresh, 2));
        assert_eq!(c.state("chat").unwrap().data(), Some(&2));
    }

    #[test]
    fn test_retry_through_coordinator() {
        let mut c = coordinator(3);
        let t = c.start("a", None);
        c.fail(&t, &RawError::Http {
            status: 503,
            retry_after: None,
            body: None,
            message: "down".to_string(),
        });
        let t = c.retry("a").unwrap();
        assert_eq!(c.state("a").unwrap().retry_count, 1);
        assert!(c.succeed(&t, 5));

        let t = c.start("b", None);
        c.fail(&t, &RawError::Http {
            status: 401,
            retry_after: None,
            body: None,
            message: "nope".to_string(),
        });
        assert!(c.retry("b").is_err());
    }

    #[test]
    fn test_admission_order_and_limit() {
        let mut c = coordinator(2);
        for (id, priority) in [
            ("low", Priority::Low),
            ("normal-1", Priority::Normal),
            ("high", Priority::High),
            ("normal-2", Priority::Normal),
        ] {
            c.enqueue(id, priority, || async { Ok(0) }).unwrap();
        }

        let first: Vec<String> = c.admit().into_iter().map(|(t, _)| t.id).collect();
        assert_eq!(first, vec!["high", "normal-1"]);
        assert_eq!(c.pending_count(), 2);
        assert!(c.admit().is_empty());

        let t = Ticket {
            id: "high".to_string(),
            generation: 1,
        };
        c.succeed(&t, 1);
        let next: Vec<String> = c.admit().into_iter().map(|(t, _)| t.id).collect();
        assert_eq!(next, vec!["normal-2"]);
        assert_eq!(c.state("normal-2").unwrap().metadata.as_ref().unwrap().priority, Priority::Normal);
    }

    #[test]
    fn test_duplicate_id_waits_for_running_request() {
        let mut c = coordinator(2);
        c.enqueue("a", Priority::Normal, || async { Ok(1) }).unwrap();
        c.enqueue("a", Priority::Normal, || async { Ok(2) }).unwrap();
        c.enqueue("b", Priority::Normal, || async { Ok(3) }).unwrap();

        let first: Vec<Ticket> = c.admit().into_iter().map(|(t, _)| t).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, "a");
        assert_eq!(first[1].id, "b");
        assert_eq!(c.loading_count(), 2);
        assert_eq!(c.pending_count(), 1);

        assert!(c.succeed(&first[0], 1));
        let next: Vec<Ticket> = c.admit().into_iter().map(|(t, _)| t).collect();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, "a");
        assert_eq!(c.pending_count(), 0);
        assert!(c.succeed(&next[0], 2));
        assert_eq!(c.state("a").unwrap().data(), Some(&2));
    }

    #[test]
    fn test_queue_is_bounded() {
        let mut c = coordinator(1).with_queue_limit(1);
        c.enqueue("a", Priority::Normal, || async { Ok(1) }).unwrap();
        assert_eq!(
            c.enqueue("b", Priority::High, || async { Ok(2) }),
            Err(CoordinatorError::QueueFull { limit: 1 })
        );
    }

    #[tokio::test]
    async fn test_drain_respects_max_concurrent() {
        let mut c = coordinator(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(Mutex::new(0usize));

        for i in 0..6u32 {
            let active = active.clone();
            let peak = peak.clone();
            c.enqueue(&format!("req-{}", i), Priority::Normal, move || async move {
                let now = active.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                {
                    let mut p = peak.lock().unwrap();
                    *p = (*p).max(now);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, AtomicOrdering::SeqCst);
                if i == 3 { Err(RawError::from("bad")) } else { Ok(i) }
            })
            .unwrap();
        }

        c.drain().await;

        assert!(*peak.lock().unwrap() <= 2);
        assert_eq!(c.pending_count(), 0);
        assert!(!c.is_any_loading());
        assert!(c.has_any_error());
        assert_eq!(c.state("req-5").unwrap().data(), Some(&5));
        assert_eq!(c.state("req-3").unwrap().error.as_ref().unwrap().code, ErrorCode::Unknown);
    }

    #[tokio::test]
    async fn test_drain_with_duplicate_ids_stays_within_limit() {
        let mut c = coordinator(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for id in ["a", "a", "b", "a", "c"] {
            let active = active.clone();
            let peak = peak.clone();
            c.enqueue(id, Priority::Normal, move || async move {
                let now = active.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                peak.fetch_max(now, AtomicOrdering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, AtomicOrdering::SeqCst);
                Ok(now as u32)
            })
            .unwrap();
        }

        c.drain().await;

        assert!(peak.load(AtomicOrdering::SeqCst) <= 2);
        assert_eq!(c.pending_count(), 0);
        assert!(c.is_all_success());
        assert_eq!(c.len(), 3);
    }

    #[tokio::test]
    async fn test_drain_records_panicked_request_as_error() {
        let mut c = coordinator(1);
        c.enqueue("boom", Priority::Normal, || async {
            if true {
                panic!("fetcher panicked");
            }
            Ok(0)
        })
        .unwrap();

        c.drain().await;
        assert!(c.state("boom").unwrap().is_error());
    }
}
