use crate::error::TransportError;
use crate::transport::{Acknowledger, Delivery, Envelope, Publisher, Subscriber, Subscription};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEAD_LETTER_REASON_KEY: &str = "dead_letter_reason";
pub const DELIVERY_COUNT_KEY: &str = "delivery_count";

/// Redelivery policy of the in-process broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Deliveries after which a rejected envelope is dead-lettered.
    pub max_deliveries: u32,
    /// How long a delivery may stay unsettled before it is handed out again.
    pub visibility_timeout: Duration,
    pub dead_letter_suffix: String,
    /// Acknowledged ids kept per topic for [`InMemoryBroker::acknowledged`];
    /// older ids are dropped once the log is full.
    pub ack_log_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            visibility_timeout: Duration::from_secs(30),
            dead_letter_suffix: ".dead_letter".to_string(),
            ack_log_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub ready: usize,
    pub in_flight: usize,
    pub acked: usize,
    pub dead_lettered: usize,
}

struct Queued {
    envelope: Envelope,
    deliveries: u32,
}

struct InFlight {
    envelope: Envelope,
    deliveries: u32,
    delivered_at: Instant,
}

#[derive(Default)]
struct TopicQueue {
    ready: VecDeque<Queued>,
    in_flight: HashMap<u64, InFlight>,
    acked: usize,
    ack_log: VecDeque<String>,
    dead_lettered: usize,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicQueue>,
    next_tag: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    config: BrokerConfig,
}

/// A thread-safe, in-process durable queue broker.
///
/// Each topic is a queue shared by its subscribers (competing consumers).
/// Rejected or timed-out deliveries go back to the tail of the queue until
/// `max_deliveries` is reached, after which they are moved to the topic's
/// dead-letter queue. `Clone` shares the underlying state, so one instance can
/// serve as both publisher and subscriber for every binding in the process.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    pub fn dead_letter_topic(&self, topic: &str) -> String {
        format!("{topic}{}", self.shared.config.dead_letter_suffix)
    }

    pub async fn stats(&self, topic: &str) -> TopicStats {
        let state = self.shared.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|q| TopicStats {
                ready: q.ready.len(),
                in_flight: q.in_flight.len(),
                acked: q.acked,
                dead_lettered: q.dead_lettered,
            })
            .unwrap_or_default()
    }

    /// Ids of the most recently acknowledged envelopes on `topic`, in
    /// settlement order. At most `ack_log_capacity` ids are retained.
    pub async fn acknowledged(&self, topic: &str) -> Vec<String> {
        let state = self.shared.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|q| q.ack_log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Envelopes waiting on `topic`, in delivery order, without consuming them.
    pub async fn peek(&self, topic: &str) -> Vec<Envelope> {
        let state = self.shared.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|q| q.ready.iter().map(|m| m.envelope.clone()).collect())
            .unwrap_or_default()
    }

    /// Envelopes parked in the dead-letter queue of `topic`.
    pub async fn dead_letters(&self, topic: &str) -> Vec<Envelope> {
        self.peek(&self.dead_letter_topic(topic)).await
    }

    async fn next_delivery(&self, topic: &str) -> Option<Delivery> {
        loop {
            // Registered before inspecting the queue so a publish racing with
            // the check still wakes this consumer.
            let notified = self.shared.notify.notified();
            {
                let mut guard = self.shared.state.lock().await;
                let state = &mut *guard;
                if state.closed {
                    return None;
                }
                self.requeue_expired(state, topic);

                let tag = state.next_tag;
                let queue = state.topics.entry(topic.to_string()).or_default();
                if let Some(Queued {
                    envelope,
                    deliveries,
                }) = queue.ready.pop_front()
                {
                    let deliveries = deliveries + 1;
                    queue.in_flight.insert(
                        tag,
                        InFlight {
                            envelope: envelope.clone(),
                            deliveries,
                            delivered_at: Instant::now(),
                        },
                    );
                    state.next_tag += 1;
                    debug!(
                        topic,
                        envelope_id = envelope.id(),
                        delivery_tag = tag,
                        deliveries,
                        "delivering envelope"
                    );
                    let acker: Arc<dyn Acknowledger> = Arc::new(self.clone());
                    return Some(Delivery::new(topic, envelope, tag, deliveries, acker));
                }
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.shared.config.visibility_timeout) => {}
            }
        }
    }

    fn requeue_expired(&self, state: &mut BrokerState, topic: &str) {
        let timeout = self.shared.config.visibility_timeout;
        let now = Instant::now();
        let expired: Vec<(u64, InFlight)> = match state.topics.get_mut(topic) {
            Some(queue) => {
                let tags: Vec<u64> = queue
                    .in_flight
                    .iter()
                    .filter(|(_, f)| now.duration_since(f.delivered_at) >= timeout)
                    .map(|(tag, _)| *tag)
                    .collect();
                tags.into_iter()
                    .filter_map(|tag| queue.in_flight.remove(&tag).map(|f| (tag, f)))
                    .collect()
            }
            None => return,
        };

        for (tag, in_flight) in expired {
            warn!(
                topic,
                envelope_id = in_flight.envelope.id(),
                delivery_tag = tag,
                "visibility timeout expired, returning envelope to queue"
            );
            self.settle_failed(state, topic, in_flight, "visibility timeout expired");
        }
    }

    /// Puts a failed delivery back on its queue, or dead-letters it once the
    /// delivery budget is spent.
    fn settle_failed(&self, state: &mut BrokerState, topic: &str, failed: InFlight, reason: &str) {
        let max_deliveries = self.shared.config.max_deliveries;
        if failed.deliveries >= max_deliveries {
            let mut envelope = failed.envelope;
            envelope
                .metadata_mut()
                .set(DEAD_LETTER_REASON_KEY, reason.to_string());
            envelope
                .metadata_mut()
                .set(DELIVERY_COUNT_KEY, failed.deliveries.to_string());
            warn!(
                topic,
                envelope_id = envelope.id(),
                deliveries = failed.deliveries,
                reason,
                "delivery budget exhausted, dead-lettering envelope"
            );

            let dead_letter_topic = self.dead_letter_topic(topic);
            state.topics.entry(topic.to_string()).or_default().dead_lettered += 1;
            state
                .topics
                .entry(dead_letter_topic)
                .or_default()
                .ready
                .push_back(Queued {
                    envelope,
                    deliveries: 0,
                });
        } else {
            state
                .topics
                .entry(topic.to_string())
                .or_default()
                .ready
                .push_back(Queued {
                    envelope: failed.envelope,
                    deliveries: failed.deliveries,
                });
        }
        self.shared.notify.notify_waiters();
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return Err(TransportError::Closed);
        }
        debug!(topic, envelope_id = envelope.id(), "publishing envelope");
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .ready
            .push_back(Queued {
                envelope,
                deliveries: 0,
            });
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Subscriber::close(self).await
    }
}

#[async_trait]
impl Subscriber for InMemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        if self.shared.state.lock().await.closed {
            return Err(TransportError::Closed);
        }
        let broker = self.clone();
        let deliveries = futures::stream::unfold(
            (broker, topic.to_string()),
            |(broker, topic)| async move {
                let delivery = broker.next_delivery(&topic).await?;
                Some((delivery, (broker, topic)))
            },
        );
        Ok(Subscription::new(topic, Box::pin(deliveries)))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().await;
        if !state.closed {
            debug!("closing in-memory broker");
            state.closed = true;
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for InMemoryBroker {
    async fn ack(
        &self,
        topic: &str,
        envelope_id: &str,
        delivery_tag: u64,
    ) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().await;
        let Some(queue) = state.topics.get_mut(topic) else {
            return Err(stale(topic, envelope_id, delivery_tag));
        };
        if take_in_flight(queue, envelope_id, delivery_tag).is_none() {
            return Err(stale(topic, envelope_id, delivery_tag));
        }
        queue.acked += 1;
        let capacity = self.shared.config.ack_log_capacity;
        if capacity > 0 {
            if queue.ack_log.len() == capacity {
                queue.ack_log.pop_front();
            }
            queue.ack_log.push_back(envelope_id.to_string());
        }
        Ok(())
    }

    async fn reject(
        &self,
        topic: &str,
        envelope_id: &str,
        delivery_tag: u64,
        reason: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().await;
        let failed = state
            .topics
            .get_mut(topic)
            .and_then(|q| take_in_flight(q, envelope_id, delivery_tag))
            .ok_or_else(|| stale(topic, envelope_id, delivery_tag))?;
        self.settle_failed(&mut state, topic, failed, reason);
        Ok(())
    }

    async fn release(
        &self,
        topic: &str,
        envelope_id: &str,
        delivery_tag: u64,
    ) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().await;
        let queue = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| stale(topic, envelope_id, delivery_tag))?;
        let released = take_in_flight(queue, envelope_id, delivery_tag)
            .ok_or_else(|| stale(topic, envelope_id, delivery_tag))?;
        debug!(
            topic,
            envelope_id,
            delivery_tag,
            "delivery released, returning envelope uncharged"
        );
        // Back to the head so the envelope keeps its place in line.
        queue.ready.push_front(Queued {
            envelope: released.envelope,
            deliveries: released.deliveries.saturating_sub(1),
        });
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

fn take_in_flight(queue: &mut TopicQueue, envelope_id: &str, delivery_tag: u64) -> Option<InFlight> {
    match queue.in_flight.get(&delivery_tag) {
        Some(f) if f.envelope.id() == envelope_id => queue.in_flight.remove(&delivery_tag),
        _ => None,
    }
}

fn stale(topic: &str, envelope_id: &str, delivery_tag: u64) -> TransportError {
    TransportError::StaleDelivery {
        topic: topic.to_string(),
        envelope_id: envelope_id.to_string(),
        delivery_tag,
    }
}
