use crate::domain::claim::Claim;
use crate::domain::outcome::Outcome;
use crate::domain::ports::Processor;
use crate::error::ProcessorError;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

/// Deterministic sandbox provider.
///
/// Declines cards found in its decline list and approves everything else,
/// answering with `stub-<claim id>` as vendor reference. Because the answer
/// depends only on the claim, presenting the same claim twice is harmless.
#[derive(Debug, Clone, Default)]
pub struct StubProcessor {
    decline_cards: HashSet<String>,
}

impl StubProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_declined_cards<I, S>(cards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            decline_cards: cards.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Processor for StubProcessor {
    async fn process(&self, claim: &Claim) -> Result<Outcome, ProcessorError> {
        let reference = format!("stub-{}", claim.id);
        if self.decline_cards.contains(claim.payer.number.expose()) {
            debug!(claim_id = %claim.id, "stub processor declining claim");
            Ok(Outcome::declined(reference))
        } else {
            debug!(claim_id = %claim.id, "stub processor approving claim");
            Ok(Outcome::approved(reference))
        }
    }
}
