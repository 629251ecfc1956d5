#![allow(dead_code)]

use async_trait::async_trait;
use payclaim::codec;
use payclaim::domain::claim::{Card, CardNumber, Claim, Currency, ExpirationDate, MonetaryAmount};
use payclaim::domain::outcome::Outcome;
use payclaim::domain::ports::Processor;
use payclaim::error::{ProcessorError, TransportError};
use payclaim::transport::{Envelope, Publisher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

pub fn sample_claim(id: &str) -> Claim {
    Claim {
        id: id.to_string(),
        payee: "payee-1".to_string(),
        amount: MonetaryAmount::new(Currency::new("GBP").unwrap(), 4_200),
        payer: Card {
            number: CardNumber::new("4111111111111111"),
            expires_at: ExpirationDate::new(2030, 6).unwrap(),
        },
    }
}

pub fn claim_envelope(id: &str) -> Envelope {
    Envelope::new(codec::encode_claim(&sample_claim(id)).unwrap())
}

/// Fails the first `failures` calls with a transient error, then approves.
pub struct ScriptedProcessor {
    failures: usize,
    calls: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for ScriptedProcessor {
    async fn process(&self, claim: &Claim) -> Result<Outcome, ProcessorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(ProcessorError::Unavailable(format!("scripted failure {}", call + 1)))
        } else {
            Ok(Outcome::approved(format!("ref-{}", claim.id)))
        }
    }
}

/// Takes a while to answer, so cancellation can land mid-invocation.
pub struct SlowProcessor {
    pub delay: Duration,
}

#[async_trait]
impl Processor for SlowProcessor {
    async fn process(&self, claim: &Claim) -> Result<Outcome, ProcessorError> {
        tokio::time::sleep(self.delay).await;
        Ok(Outcome::approved(format!("slow-{}", claim.id)))
    }
}

/// Publisher that refuses every publish to `failing_topic` and records the rest.
#[derive(Default)]
pub struct RecordingPublisher {
    failing_topic: Option<String>,
    published: Mutex<Vec<(String, Envelope)>>,
}

impl RecordingPublisher {
    pub fn failing_on(topic: &str) -> Self {
        Self {
            failing_topic: Some(topic.to_string()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub async fn published(&self) -> Vec<(String, Envelope)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), TransportError> {
        if self.failing_topic.as_deref() == Some(topic) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "broker unreachable".to_string(),
            });
        }
        self.published
            .lock()
            .await
            .push((topic.to_string(), envelope));
        Ok(())
    }
}

/// Polls `check` until it holds, advancing in small sleeps.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
