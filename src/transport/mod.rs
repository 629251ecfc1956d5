//! Durable publish/subscribe contract.
//!
//! Delivery is at-least-once: every [`Delivery`] must be settled exactly once
//! with [`Delivery::ack`], [`Delivery::reject`] or [`Delivery::release`]. Each
//! consumes the delivery, so a settled envelope cannot be settled again by the
//! same consumer. An unsettled delivery is handed out again by the broker once
//! its visibility timeout lapses.

mod envelope;

pub use envelope::{CORRELATION_ID_KEY, Envelope, Metadata, RETRY_COUNT_KEY};

use crate::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes an envelope; `Ok` means the broker has taken ownership of it.
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Broker-side settlement of a single delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(
        &self,
        topic: &str,
        envelope_id: &str,
        delivery_tag: u64,
    ) -> Result<(), TransportError>;

    async fn reject(
        &self,
        topic: &str,
        envelope_id: &str,
        delivery_tag: u64,
        reason: &str,
    ) -> Result<(), TransportError>;

    /// Hands the envelope back without charging the delivery against the
    /// redelivery budget. Used when the consumer stops before it could finish.
    async fn release(
        &self,
        topic: &str,
        envelope_id: &str,
        delivery_tag: u64,
    ) -> Result<(), TransportError>;
}

pub type PublisherBox = Arc<dyn Publisher>;
pub type SubscriberBox = Arc<dyn Subscriber>;

/// One envelope handed to one consumer, awaiting settlement.
pub struct Delivery {
    topic: String,
    envelope: Envelope,
    delivery_tag: u64,
    delivery_count: u32,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        topic: impl Into<String>,
        envelope: Envelope,
        delivery_tag: u64,
        delivery_count: u32,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            topic: topic.into(),
            envelope,
            delivery_tag,
            delivery_count,
            acker,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// How many times the broker has handed out this envelope, this delivery
    /// included.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub async fn ack(self) -> Result<(), TransportError> {
        self.acker
            .ack(&self.topic, self.envelope.id(), self.delivery_tag)
            .await
    }

    pub async fn reject(self, reason: &str) -> Result<(), TransportError> {
        self.acker
            .reject(&self.topic, self.envelope.id(), self.delivery_tag, reason)
            .await
    }

    pub async fn release(self) -> Result<(), TransportError> {
        self.acker
            .release(&self.topic, self.envelope.id(), self.delivery_tag)
            .await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("envelope_id", &self.envelope.id())
            .field("delivery_tag", &self.delivery_tag)
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}

/// Lazy sequence of deliveries from one topic. Ends when the transport closes.
pub struct Subscription {
    topic: String,
    deliveries: BoxStream<'static, Delivery>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, deliveries: BoxStream<'static, Delivery>) -> Self {
        Self {
            topic: topic.into(),
            deliveries,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn next(&mut self) -> Option<Delivery> {
        self.deliveries.next().await
    }
}
