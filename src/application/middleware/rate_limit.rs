use super::HandlerFuture;
use crate::error::HandlerError;
use crate::transport::Envelope;
use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};
use tracing::trace;

/// Sliding-window log of recent invocation starts.
///
/// Waiters queue on the mutex in arrival order, so a caller held back by the
/// limit keeps its place while it sleeps.
#[derive(Debug)]
struct Window {
    max_invocations: usize,
    length: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl Window {
    async fn acquire(&self) {
        let mut starts = self.starts.lock().await;
        loop {
            let now = Instant::now();
            while starts
                .front()
                .is_some_and(|start| now.duration_since(*start) >= self.length)
            {
                starts.pop_front();
            }

            if starts.len() < self.max_invocations {
                starts.push_back(now);
                return;
            }

            match starts.front() {
                Some(oldest) => {
                    let resume_at = *oldest + self.length;
                    trace!(wait_ms = (resume_at - now).as_millis() as u64, "rate limited");
                    tokio::time::sleep_until(resume_at).await;
                }
                None => {
                    starts.push_back(now);
                    return;
                }
            }
        }
    }
}

/// Admits at most `max_invocations` handler starts in any window of the
/// configured length. Services built from one layer share the window.
#[derive(Clone, Debug)]
pub struct RateLimitLayer {
    window: Option<Arc<Window>>,
}

impl RateLimitLayer {
    /// A `max_invocations` of zero is treated as one.
    pub fn new(max_invocations: usize, window: Duration) -> Self {
        Self {
            window: Some(Arc::new(Window {
                max_invocations: max_invocations.max(1),
                length: window,
                starts: Mutex::new(VecDeque::new()),
            })),
        }
    }

    pub fn unlimited() -> Self {
        Self { window: None }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimit {
            inner,
            window: self.window.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimit<S> {
    inner: S,
    window: Option<Arc<Window>>,
}

impl<S> Service<Envelope> for RateLimit<S>
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
        let window = self.window.clone();

        Box::pin(async move {
            if let Some(window) = window {
                window.acquire().await;
            }
            inner.ready().await?.call(envelope).await
        })
    }
}
