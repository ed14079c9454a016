//! Event bus for real-time crawl progress
//!
//! Every component publishes structured events here. Consumers are the
//! (external) WebSocket layer via attached live streams, registered
//! callbacks, and the per-job ring-buffer history served to API reads.
//!
//! Publish order is fixed: history first, then per-job subscribers, then
//! global subscribers, then live streams (dead streams are pruned when a
//! send fails).

mod log;

pub use log::EventLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Ring buffer size for per-type event history
const PER_TYPE_HISTORY_LIMIT: usize = 100;

/// Types of crawl events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // State events
    StateChange,
    SubstateChange,

    // Progress events
    ProgressUpdate,
    MilestoneReached,

    // Document events
    DocumentFound,
    DocumentDownloaded,
    DocumentProcessed,

    // Page events
    PageCrawled,
    PageFailed,

    // Error events
    Error,
    Warning,

    // System events
    MetricsUpdate,
}

/// One crawl event, immutable once published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlEvent {
    pub event_id: Uuid,
    pub crawl_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CrawlEvent {
    pub fn new(
        crawl_id: impl Into<String>,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            crawl_id: crawl_id.into(),
            event_type,
            timestamp: Utc::now(),
            data,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Serializes the event as a single JSON line
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Capped event history for one job
struct EventHistory {
    limit: usize,
    events: VecDeque<CrawlEvent>,
    by_type: HashMap<EventType, VecDeque<CrawlEvent>>,
}

impl EventHistory {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            events: VecDeque::new(),
            by_type: HashMap::new(),
        }
    }

    fn add(&mut self, event: CrawlEvent) {
        if self.events.len() == self.limit {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());

        let typed = self.by_type.entry(event.event_type).or_default();
        if typed.len() == PER_TYPE_HISTORY_LIMIT {
            typed.pop_front();
        }
        typed.push_back(event);
    }

    fn recent(&self, limit: usize) -> Vec<CrawlEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    fn by_type(&self, event_type: EventType, limit: usize) -> Vec<CrawlEvent> {
        match self.by_type.get(&event_type) {
            Some(events) => {
                let skip = events.len().saturating_sub(limit);
                events.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    fn since(&self, timestamp: DateTime<Utc>) -> Vec<CrawlEvent> {
        self.events
            .iter()
            .filter(|e| e.timestamp >= timestamp)
            .cloned()
            .collect()
    }
}

/// Subscriber callback; failures are logged and isolated from other
/// subscribers
pub type EventCallback = Arc<dyn Fn(&CrawlEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by subscribe calls, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct BusInner {
    histories: HashMap<String, EventHistory>,
    job_subscribers: HashMap<String, Vec<(SubscriptionId, EventCallback)>>,
    global_subscribers: Vec<(SubscriptionId, EventCallback)>,
    streams: HashMap<String, Vec<mpsc::UnboundedSender<CrawlEvent>>>,
    next_subscription: u64,
}

/// In-process publish/subscribe bus keyed by crawl id
pub struct EventBus {
    history_limit: usize,
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit,
            inner: Mutex::new(BusInner {
                histories: HashMap::new(),
                job_subscribers: HashMap::new(),
                global_subscribers: Vec::new(),
                streams: HashMap::new(),
                next_subscription: 0,
            }),
        }
    }

    /// Publishes an event: history, job subscribers, global subscribers,
    /// live streams, in that order
    pub fn publish(&self, event: CrawlEvent) {
        // Snapshot subscribers/streams under the lock, invoke outside it so
        // a callback can safely call back into the bus.
        let (job_subs, global_subs, streams) = {
            let mut inner = self.inner.lock().expect("event bus lock poisoned");

            inner
                .histories
                .entry(event.crawl_id.clone())
                .or_insert_with(|| EventHistory::new(self.history_limit))
                .add(event.clone());

            let job_subs: Vec<EventCallback> = inner
                .job_subscribers
                .get(&event.crawl_id)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default();
            let global_subs: Vec<EventCallback> = inner
                .global_subscribers
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect();
            let streams: Vec<mpsc::UnboundedSender<CrawlEvent>> = inner
                .streams
                .get(&event.crawl_id)
                .cloned()
                .unwrap_or_default();

            (job_subs, global_subs, streams)
        };

        for callback in job_subs.iter().chain(global_subs.iter()) {
            if let Err(e) = callback(&event) {
                tracing::warn!("Event subscriber failed for {}: {}", event.crawl_id, e);
            }
        }

        let mut any_dead = false;
        for stream in &streams {
            if stream.send(event.clone()).is_err() {
                any_dead = true;
            }
        }

        if any_dead {
            let mut inner = self.inner.lock().expect("event bus lock poisoned");
            if let Some(senders) = inner.streams.get_mut(&event.crawl_id) {
                senders.retain(|s| !s.is_closed());
            }
        }
    }

    /// Subscribes to events for one crawl
    pub fn subscribe(&self, crawl_id: impl Into<String>, callback: EventCallback) -> SubscriptionId {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        inner
            .job_subscribers
            .entry(crawl_id.into())
            .or_default()
            .push((id, callback));
        id
    }

    /// Subscribes to all events
    pub fn subscribe_global(&self, callback: EventCallback) -> SubscriptionId {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        inner.global_subscribers.push((id, callback));
        id
    }

    /// Removes a subscription by handle
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.global_subscribers.retain(|(sub_id, _)| *sub_id != id);
        for subs in inner.job_subscribers.values_mut() {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Attaches a live stream for one crawl (the WebSocket boundary)
    ///
    /// Dropped receivers are pruned on the next publish to that crawl.
    pub fn attach_stream(&self, crawl_id: impl Into<String>) -> mpsc::UnboundedReceiver<CrawlEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.streams.entry(crawl_id.into()).or_default().push(tx);
        rx
    }

    /// Most recent events for a crawl
    pub fn get_history(&self, crawl_id: &str, limit: usize) -> Vec<CrawlEvent> {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        inner
            .histories
            .get(crawl_id)
            .map(|h| h.recent(limit))
            .unwrap_or_default()
    }

    /// Most recent events of one type for a crawl
    pub fn get_by_type(
        &self,
        crawl_id: &str,
        event_type: EventType,
        limit: usize,
    ) -> Vec<CrawlEvent> {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        inner
            .histories
            .get(crawl_id)
            .map(|h| h.by_type(event_type, limit))
            .unwrap_or_default()
    }

    /// Events at or after a timestamp
    pub fn get_since(&self, crawl_id: &str, timestamp: DateTime<Utc>) -> Vec<CrawlEvent> {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        inner
            .histories
            .get(crawl_id)
            .map(|h| h.since(timestamp))
            .unwrap_or_default()
    }

    /// Drops all history, subscriptions, and streams for a finished crawl
    pub fn cleanup(&self, crawl_id: &str) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.histories.remove(crawl_id);
        inner.job_subscribers.remove(crawl_id);
        inner.streams.remove(crawl_id);
    }

    // ===== Typed publish helpers =====

    pub fn publish_state_change(
        &self,
        crawl_id: &str,
        from_state: &str,
        to_state: &str,
        metadata: serde_json::Value,
    ) {
        self.publish(
            CrawlEvent::new(
                crawl_id,
                EventType::StateChange,
                serde_json::json!({"from_state": from_state, "to_state": to_state}),
            )
            .with_metadata(metadata),
        );
    }

    pub fn publish_substate_change(&self, crawl_id: &str, substate: &str) {
        self.publish(CrawlEvent::new(
            crawl_id,
            EventType::SubstateChange,
            serde_json::json!({"substate": substate}),
        ));
    }

    pub fn publish_progress(&self, crawl_id: &str, progress: serde_json::Value) {
        self.publish(CrawlEvent::new(
            crawl_id,
            EventType::ProgressUpdate,
            progress,
        ));
    }

    pub fn publish_document_found(
        &self,
        crawl_id: &str,
        url: &str,
        document_type: &str,
        metadata: serde_json::Value,
    ) {
        self.publish(
            CrawlEvent::new(
                crawl_id,
                EventType::DocumentFound,
                serde_json::json!({"url": url, "document_type": document_type}),
            )
            .with_metadata(metadata),
        );
    }

    pub fn publish_error(&self, crawl_id: &str, error_type: &str, message: &str) {
        self.publish(CrawlEvent::new(
            crawl_id,
            EventType::Error,
            serde_json::json!({"error_type": error_type, "message": message}),
        ));
    }

    pub fn publish_metrics(&self, crawl_id: &str, metrics: serde_json::Value) {
        self.publish(CrawlEvent::new(crawl_id, EventType::MetricsUpdate, metrics));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
