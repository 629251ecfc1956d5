use super::HandlerFuture;
use crate::error::HandlerError;
use crate::transport::Envelope;
use std::task::{Context, Poll};
use tower::{Layer, Service, ServiceExt};
use tracing::debug;
use uuid::Uuid;

/// Carries the inbound correlation id onto every envelope the handler emits,
/// minting one when the inbound envelope has none.
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationLayer;

impl CorrelationLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = Correlation<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Correlation { inner }
    }
}

#[derive(Clone, Debug)]
pub struct Correlation<S> {
    inner: S,
}

impl<S> Service<Envelope> for Correlation<S>
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

    fn call(&mut self, mut envelope: Envelope) -> Self::Future {
        let correlation_id = match envelope.correlation_id() {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                debug!(envelope_id = %envelope.id(), correlation_id = %id, "minted correlation id");
                envelope.set_correlation_id(id.clone());
                id
            }
        };
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut outputs = inner.ready().await?.call(envelope).await?;
            for output in &mut outputs {
                output.set_correlation_id(correlation_id.clone());
            }
            Ok(outputs)
        })
    }
}
