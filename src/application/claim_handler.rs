use super::middleware::HandlerFuture;
use crate::codec;
use crate::domain::ports::ProcessorBox;
use crate::error::HandlerError;
use crate::transport::Envelope;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, info};

/// Metadata key naming the claim an outcome envelope answers.
pub const CLAIM_ID_KEY: &str = "claim_id";

/// Turns one claim command into exactly one outcome event.
///
/// Failures are classified for the router: an undecodable payload is
/// [`HandlerError::Malformed`] and never retried, a processor failure is
/// [`HandlerError::Processor`] and retried by the middleware chain. A
/// declined payment is a successful invocation whose outcome says so.
#[derive(Clone)]
pub struct ClaimHandler {
    processor: ProcessorBox,
}

impl ClaimHandler {
    pub fn new(processor: ProcessorBox) -> Self {
        Self { processor }
    }

    pub async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        let claim = codec::decode_claim(envelope.payload()).map_err(HandlerError::Malformed)?;
        debug!(
            envelope_id = %envelope.id(),
            claim_id = %claim.id,
            retry_count = envelope.retry_count(),
            "processing claim"
        );

        let outcome =
            self.processor
                .process(&claim)
                .await
                .map_err(|source| HandlerError::Processor {
                    claim_id: claim.id.clone(),
                    source,
                })?;

        info!(
            claim_id = %claim.id,
            vendor_reference = %outcome.vendor_reference,
            success = outcome.success,
            "claim processed"
        );

        let payload = codec::encode_outcome(&outcome).map_err(HandlerError::Encode)?;
        Ok(vec![
            Envelope::new(payload).with_metadata(CLAIM_ID_KEY, claim.id),
        ])
    }
}

impl Service<Envelope> for ClaimHandler {
    type Response = Vec<Envelope>;
    type Error = HandlerError;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, envelope: Envelope) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { handler.handle(&envelope).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::{Card, CardNumber, Claim, Currency, ExpirationDate, MonetaryAmount};
    use crate::domain::outcome::Outcome;
    use crate::domain::ports::Processor;
    use crate::error::ProcessorError;
    use crate::infrastructure::stub_processor::StubProcessor;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct DownProcessor;

    #[async_trait]
    impl Processor for DownProcessor {
        async fn process(&self, _claim: &Claim) -> Result<Outcome, ProcessorError> {
            Err(ProcessorError::Unavailable("maintenance".to_string()))
        }
    }

    fn claim_envelope(id: &str) -> Envelope {
        let claim = Claim {
            id: id.to_string(),
            payee: "p1".to_string(),
            amount: MonetaryAmount::new(Currency::new("USD").unwrap(), 1999),
            payer: Card {
                number: CardNumber::new("4111111111111111"),
                expires_at: ExpirationDate::new(2030, 9).unwrap(),
            },
        };
        Envelope::new(codec::encode_claim(&claim).unwrap())
    }

    #[tokio::test]
    async fn test_emits_one_outcome_tagged_with_claim_id() {
        let handler = ClaimHandler::new(Arc::new(StubProcessor::new()));
        let outputs = handler.handle(&claim_envelope("claim-7")).await.unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].metadata().get(CLAIM_ID_KEY), Some("claim-7"));
        let outcome = codec::decode_outcome(outputs[0].payload()).unwrap();
        assert_eq!(outcome, Outcome::approved("stub-claim-7"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_not_retryable() {
        let handler = ClaimHandler::new(Arc::new(StubProcessor::new()));
        let err = handler
            .handle(&Envelope::new(&b"definitely not a claim"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Malformed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_processor_failure_is_retryable() {
        let handler = ClaimHandler::new(Arc::new(DownProcessor));
        let err = handler.handle(&claim_envelope("c-9")).await.unwrap_err();
        assert!(matches!(err, HandlerError::Processor { ref claim_id, .. } if claim_id == "c-9"));
        assert!(err.is_retryable());
    }
}
