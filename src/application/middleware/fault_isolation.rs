use super::HandlerFuture;
use crate::error::HandlerError;
use crate::transport::Envelope;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};
use tower::{Layer, Service, ServiceExt};
use tracing::error;

/// Turns a panic raised while invoking the inner handler into a
/// [`HandlerError::Fault`], so one poisoned input cannot take down the
/// dispatch loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaultIsolationLayer;

impl FaultIsolationLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for FaultIsolationLayer {
    type Service = FaultIsolation<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FaultIsolation { inner }
    }
}

#[derive(Clone, Debug)]
pub struct FaultIsolation<S> {
    inner: S,
}

impl<S> Service<Envelope> for FaultIsolation<S>
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
        let envelope_id = envelope.id().to_string();
        let mut inner = self.inner.clone();

        // The inner call happens inside the guarded future, so a panic in
        // `call` itself is caught as well as one raised while polling.
        let guarded = AssertUnwindSafe(async move { inner.ready().await?.call(envelope).await });

        Box::pin(async move {
            match guarded.catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(envelope_id = %envelope_id, panic = %message, "handler panicked");
                    Err(HandlerError::Fault(message))
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}
