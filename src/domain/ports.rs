use super::claim::Claim;
use super::outcome::Outcome;
use crate::error::ProcessorError;
use async_trait::async_trait;
use std::sync::Arc;

/// Capability of a payment service provider to settle a claim.
///
/// Retries may present the same claim more than once, so implementations
/// must be idempotent on `claim.id` or rely on provider-side deduplication.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, claim: &Claim) -> Result<Outcome, ProcessorError>;
}

pub type ProcessorBox = Arc<dyn Processor>;
