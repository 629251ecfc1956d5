use super::claim_handler::CLAIM_ID_KEY;
use super::middleware::HandlerFuture;
use crate::codec;
use crate::error::HandlerError;
use crate::transport::Envelope;
use serde::Serialize;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tower::Service;
use tracing::{info, warn};

/// An outcome event as seen by the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedOutcome {
    pub claim_id: Option<String>,
    #[serde(skip_serializing)]
    pub correlation_id: Option<String>,
    pub vendor_reference: String,
    pub success: bool,
}

/// Terminal consumer of outcome events, bound without an output topic.
///
/// Logs every outcome and, when built with [`OutcomeLogger::with_sink`],
/// forwards it to a channel. A dropped receiver is not an error.
#[derive(Clone, Default)]
pub struct OutcomeLogger {
    sink: Option<mpsc::Sender<ObservedOutcome>>,
}

impl OutcomeLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: mpsc::Sender<ObservedOutcome>) -> Self {
        Self { sink: Some(sink) }
    }

    pub async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        let outcome = codec::decode_outcome(envelope.payload()).map_err(HandlerError::Malformed)?;
        let observed = ObservedOutcome {
            claim_id: envelope.metadata().get(CLAIM_ID_KEY).map(str::to_string),
            correlation_id: envelope.correlation_id().map(str::to_string),
            vendor_reference: outcome.vendor_reference,
            success: outcome.success,
        };

        info!(
            claim_id = observed.claim_id.as_deref().unwrap_or("-"),
            correlation_id = observed.correlation_id.as_deref().unwrap_or("-"),
            vendor_reference = %observed.vendor_reference,
            success = observed.success,
            "payment outcome"
        );

        if let Some(sink) = &self.sink
            && sink.send(observed).await.is_err()
        {
            warn!("outcome receiver dropped");
        }
        Ok(Vec::new())
    }
}

impl Service<Envelope> for OutcomeLogger {
    type Response = Vec<Envelope>;
    type Error = HandlerError;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, envelope: Envelope) -> Self::Future {
        let logger = self.clone();
        Box::pin(async move { logger.handle(&envelope).await })
    }
}
