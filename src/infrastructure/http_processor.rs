use crate::domain::claim::Claim;
use crate::domain::outcome::Outcome;
use crate::domain::ports::Processor;
use crate::error::ProcessorError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Serialize)]
struct ChargeAmount<'a> {
    currency: &'a str,
    value: u64,
}

#[derive(Serialize)]
struct ChargeRequest<'a> {
    claim_id: &'a str,
    payee_id: &'a str,
    amount: ChargeAmount<'a>,
    card_number: &'a str,
    expiry_year: u32,
    expiry_month: u32,
}

#[derive(Deserialize)]
struct ChargeResponse {
    reference: String,
    success: bool,
}

/// Processor talking to a payment service provider's charge endpoint over
/// HTTP.
///
/// The claim id is sent as the `Idempotency-Key` header so the provider can
/// deduplicate charges presented again after a retry or redelivery.
#[derive(Clone)]
pub struct HttpProcessor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProcessor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessorError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Processor for HttpProcessor {
    async fn process(&self, claim: &Claim) -> Result<Outcome, ProcessorError> {
        let body = ChargeRequest {
            claim_id: &claim.id,
            payee_id: &claim.payee,
            amount: ChargeAmount {
                currency: claim.amount.currency.as_str(),
                value: claim.amount.value,
            },
            card_number: claim.payer.number.expose(),
            expiry_year: claim.payer.expires_at.year,
            expiry_month: claim.payer.expires_at.month,
        };

        debug!(claim_id = %claim.id, endpoint = %self.endpoint, "submitting charge");
        let response = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_KEY_HEADER, &claim.id)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ProcessorError::Rejected {
                status: status.as_u16(),
            });
        }

        let charge: ChargeResponse = response
            .json()
            .await
            .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))?;

        Ok(Outcome {
            vendor_reference: charge.reference,
            success: charge.success,
        })
    }
}
