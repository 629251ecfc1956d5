//! Cross-cutting decorators around message handlers.
//!
//! Every handler bound to the router is wrapped in the same fixed order,
//! outermost first:
//!
//! 1. [`Correlation`] propagates the correlation id onto outputs,
//! 2. [`Retry`] re-invokes on retryable errors with exponential backoff,
//! 3. [`FaultIsolation`] converts panics into [`HandlerError::Fault`],
//! 4. [`RateLimit`] bounds handler starts per time window.
//!
//! Because the rate limiter sits inside the retry loop, every retry attempt
//! consumes a slot of the window. Each wrapped handler gets its own window.

mod correlation;
mod fault_isolation;
mod rate_limit;
mod retry;

pub use correlation::{Correlation, CorrelationLayer};
pub use fault_isolation::{FaultIsolation, FaultIsolationLayer};
pub use rate_limit::{RateLimit, RateLimitLayer};
pub use retry::{Retry, RetryLayer, RetryPolicy};

use crate::error::HandlerError;
use crate::transport::Envelope;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder};

pub type HandlerResult = Result<Vec<Envelope>, HandlerError>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A handler after middleware wrapping, as stored by the router.
pub type BoxHandler = BoxCloneService<Envelope, Vec<Envelope>, HandlerError>;

/// Ordered composition of the standard decorators.
///
/// The builder only chooses parameters; the nesting order is fixed by
/// [`MiddlewareChain::wrap`].
#[derive(Clone, Debug)]
pub struct MiddlewareChain {
    retry: RetryPolicy,
    rate_limit: Option<(usize, Duration)>,
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            rate_limit: None,
        }
    }
}

impl MiddlewareChain {
    pub fn builder() -> MiddlewareChainBuilder {
        MiddlewareChainBuilder::default()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn wrap<S>(&self, handler: S) -> BoxHandler
    where
        S: Service<Envelope, Response = Vec<Envelope>, Error = HandlerError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let rate_limit = match self.rate_limit {
            Some((max_invocations, window)) => RateLimitLayer::new(max_invocations, window),
            None => RateLimitLayer::unlimited(),
        };
        let service = ServiceBuilder::new()
            .layer(CorrelationLayer::new())
            .layer(RetryLayer::new(self.retry.clone()))
            .layer(FaultIsolationLayer::new())
            .layer(rate_limit)
            .service(handler);
        BoxCloneService::new(service)
    }
}

#[derive(Debug, Default)]
pub struct MiddlewareChainBuilder {
    chain: MiddlewareChain,
}

impl MiddlewareChainBuilder {
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.chain.retry = policy;
        self
    }

    /// At most `max_invocations` starts of one handler in any `window`.
    pub fn rate_limit(mut self, max_invocations: usize, window: Duration) -> Self {
        self.chain.rate_limit = Some((max_invocations, window));
        self
    }

    pub fn build(self) -> MiddlewareChain {
        self.chain
    }
}
