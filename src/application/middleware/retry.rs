use super::HandlerFuture;
use crate::error::HandlerError;
use crate::transport::{Envelope, RETRY_COUNT_KEY};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

/// Bounded exponential backoff.
///
/// Retry `n` (1-based) waits `initial_interval * multiplier^(n-1)`, capped at
/// `max_interval` when one is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first attempt.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_interval {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner,
            policy: self.policy.clone(),
        }
    }
}

/// Re-invokes the inner handler on retryable errors, up to
/// `max_retries` times. Each re-invocation sees a copy of the input with
/// `retry_count` set to the attempt number.
#[derive(Clone, Debug)]
pub struct Retry<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Service<Envelope> for Retry<S>
where
    S: Service<Envelope, Response = Vec<Envelope>, Error = HandlerError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Vec<Envelope>;
    type Error = HandlerError;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, envelope: Envelope) -> Self::Future {
        let mut inner = self.inner.clone();
        let policy = self.policy.clone();

        Box::pin(async move {
            let mut retries: u32 = 0;
            loop {
                let mut attempt = envelope.clone();
                if retries > 0 {
                    attempt
                        .metadata_mut()
                        .set(RETRY_COUNT_KEY, retries.to_string());
                }

                let err = match inner.ready().await?.call(attempt).await {
                    Ok(outputs) => return Ok(outputs),
                    Err(err) => err,
                };

                if !err.is_retryable() {
                    debug!(envelope_id = %envelope.id(), error = %err, "error is not retryable");
                    return Err(err);
                }
                if retries >= policy.max_retries {
                    warn!(
                        envelope_id = %envelope.id(),
                        retries,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                }

                retries += 1;
                let delay = policy.delay_for(retries);
                warn!(
                    envelope_id = %envelope.id(),
                    attempt = retries,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "handler failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        })
    }
}
