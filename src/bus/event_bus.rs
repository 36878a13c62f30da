//! Event Bus - topic-based publish/subscribe
//!
//! Delivers each published event to every matching subscriber concurrently.
//! Each handler runs in its own task under a timeout, so a slow or failing
//! handler never holds up its siblings. `publish` resolves once every
//! delivery has finished or timed out, which keeps events from one publisher
//! ordered per topic.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::event::{Event, TopicPattern};
use crate::config::BusConfig;
use crate::error::{BusError, Result};

/// Subscriber callback
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> Result<()> {
        (self)(event).await
    }
}

pub type SubscriptionId = u64;

struct Subscription {
    name: String,
    pattern: TopicPattern,
    handler: Arc<dyn EventHandler>,
}

impl Subscription {
    fn should_receive(&self, event: &Event) -> bool {
        self.pattern.matches(&event.event_type)
    }
}

/// Outcome of one `publish`
#[derive(Debug, Default, Clone)]
pub struct DeliveryReport {
    pub topic: String,
    pub subscribers: usize,
    pub delivered: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errors: Vec<BusError>,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.delivered == self.subscribers
    }
}

/// Cumulative bus statistics
#[derive(Debug, Default, Clone)]
pub struct BusStats {
    pub events_published: u64,
    pub deliveries: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub events_by_topic: HashMap<String, u64>,
}

pub struct EventBus {
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
    history: Arc<RwLock<VecDeque<Event>>>,
    stats: Arc<RwLock<BusStats>>,
    next_id: AtomicU64,
    handler_timeout: Duration,
    history_limit: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}

enum Delivery {
    Delivered,
    Failed(String),
    TimedOut(Duration),
}

impl EventBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            stats: Arc::new(RwLock::new(BusStats::default())),
            next_id: AtomicU64::new(1),
            handler_timeout: Duration::from_millis(config.handler_timeout_ms),
            history_limit: config.history_limit,
        }
    }

    /// Register a handler for every event whose type matches `pattern`
    pub async fn subscribe<H>(
        &self,
        name: &str,
        pattern: &str,
        handler: H,
    ) -> std::result::Result<SubscriptionId, BusError>
    where
        H: EventHandler + 'static,
    {
        let pattern = TopicPattern::parse(pattern)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!("Subscribing {} (#{}) to {}", name, id, pattern);
        self.subscriptions.write().await.insert(
            id,
            Subscription {
                name: name.to_string(),
                pattern,
                handler: Arc::new(handler),
            },
        );
        Ok(id)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().await.remove(&id);
        if let Some(sub) = &removed {
            info!("Unsubscribed {} (#{})", sub.name, id);
        }
        removed.is_some()
    }

    /// Deliver `event` to every matching subscriber
    pub async fn publish(&self, event: Event) -> DeliveryReport {
        {
            let mut history = self.history.write().await;
            history.push_back(event.clone());
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }

        let targets: Vec<(SubscriptionId, String, Arc<dyn EventHandler>)> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(_, sub)| sub.should_receive(&event))
            .map(|(id, sub)| (*id, sub.name.clone(), Arc::clone(&sub.handler)))
            .collect();

        debug!(
            "Publishing {} from {} to {} subscribers",
            event.event_type,
            event.source,
            targets.len()
        );

        let budget = self.handler_timeout;
        let deliveries = targets.iter().map(|(_, _, handler)| {
            let handler = Arc::clone(handler);
            let event = event.clone();
            async move {
                let started = Instant::now();
                let task = tokio::spawn(async move {
                    tokio::time::timeout(budget, handler.handle(event)).await
                });
                match task.await {
                    Ok(Ok(Ok(()))) => Delivery::Delivered,
                    Ok(Ok(Err(e))) => Delivery::Failed(e.to_string()),
                    Ok(Err(_)) => Delivery::TimedOut(started.elapsed()),
                    Err(join_err) => Delivery::Failed(format!("handler panicked: {join_err}")),
                }
            }
        });
        let outcomes = join_all(deliveries).await;

        let mut report = DeliveryReport {
            topic: event.event_type.clone(),
            subscribers: targets.len(),
            ..Default::default()
        };
        for ((id, name, _), outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Failed(reason) => {
                    warn!("Handler {} failed on {}: {}", name, event.event_type, reason);
                    report.failed += 1;
                    report.errors.push(BusError::HandlerFailed {
                        subscription: *id,
                        topic: event.event_type.clone(),
                        reason,
                    });
                }
                Delivery::TimedOut(elapsed) => {
                    warn!(
                        "Handler {} timed out on {} after {:?}",
                        name, event.event_type, elapsed
                    );
                    report.timed_out += 1;
                    report.errors.push(BusError::HandlerTimeout {
                        subscription: *id,
                        topic: event.event_type.clone(),
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                }
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.events_published += 1;
            stats.deliveries += report.delivered as u64;
            stats.failures += report.failed as u64;
            stats.timeouts += report.timed_out as u64;
            *stats
                .events_by_topic
                .entry(event.event_type.clone())
                .or_insert(0) += 1;
        }

        report
    }

    // ==================== Queries ====================

    /// Most recent events, oldest first, optionally filtered by pattern
    pub async fn history(&self, pattern: Option<&str>, limit: usize) -> Vec<Event> {
        let filter = match pattern.map(TopicPattern::parse) {
            Some(Ok(p)) => Some(p),
            Some(Err(e)) => {
                warn!("Ignoring history query: {}", e);
                return Vec::new();
            }
            None => None,
        };
        let history = self.history.read().await;
        let mut matched: Vec<Event> = history
            .iter()
            .rev()
            .filter(|e| filter.as_ref().map_or(true, |p| p.matches(&e.event_type)))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn stats(&self) -> BusStats {
        self.stats.read().await.clone()
    }
}
