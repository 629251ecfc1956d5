use crate::codec;
use crate::domain::claim::{Card, CardNumber, Claim, Currency, ExpirationDate, MonetaryAmount};
use crate::error::{BridgeError, ValidationError};
use crate::transport::{Envelope, PublisherBox};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Inbound payment request as accepted at `POST /pay`.
///
/// String fields default to empty so that a missing field is reported by
/// validation rather than by the JSON extractor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub idempotency_token: String,
    #[serde(default)]
    pub payee_id: String,
    pub amount: AmountRequest,
    pub card: CardRequest,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AmountRequest {
    #[serde(default)]
    pub currency: String,
    pub value: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CardRequest {
    pub number: CardNumber,
    pub expiry: ExpiryRequest,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpiryRequest {
    pub year: ExpiryPart,
    pub month: ExpiryPart,
}

/// An expiry year or month, sent either as a JSON number or as a numeric
/// string such as `"06"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExpiryPart {
    Number(u32),
    Text(String),
}

impl ExpiryPart {
    fn parse(&self, field: &'static str) -> Result<u32, ValidationError> {
        match self {
            ExpiryPart::Number(n) => Ok(*n),
            ExpiryPart::Text(text) => {
                text.trim()
                    .parse()
                    .map_err(|_| ValidationError::InvalidExpiry {
                        field,
                        value: text.clone(),
                    })
            }
        }
    }
}


impl TryFrom<ClaimRequest> for Claim {
    type Error = ValidationError;

    fn try_from(request: ClaimRequest) -> Result<Self, Self::Error> {
        if request.idempotency_token.is_empty() {
            return Err(ValidationError::MissingField("idempotency_token"));
        }
        if request.payee_id.is_empty() {
            return Err(ValidationError::MissingField("payee_id"));
        }
        if request.card.number.expose().is_empty() {
            return Err(ValidationError::MissingField("card.number"));
        }
        let currency = Currency::new(request.amount.currency)?;
        let value = u64::try_from(request.amount.value)
            .map_err(|_| ValidationError::NegativeAmount(request.amount.value))?;
        let year = request.card.expiry.year.parse("card.expiry.year")?;
        let month = request.card.expiry.month.parse("card.expiry.month")?;
        let expires_at = ExpirationDate::new(year, month)?;

        Ok(Claim {
            id: request.idempotency_token,
            payee: request.payee_id,
            amount: MonetaryAmount::new(currency, value),
            payer: Card {
                number: request.card.number,
                expires_at,
            },
        })
    }
}

/// Acknowledgement returned once the claim command is durably published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub claim_id: String,
    pub correlation_id: String,
    pub envelope_id: String,
}

/// Turns inbound claim requests into claim commands.
pub struct Bridge {
    publisher: PublisherBox,
    command_topic: String,
}

impl Bridge {
    pub fn new(publisher: PublisherBox, command_topic: impl Into<String>) -> Self {
        Self {
            publisher,
            command_topic: command_topic.into(),
        }
    }

    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    /// Validates, encodes and publishes a claim. Returns once the broker has
    /// accepted the command; the payment itself settles asynchronously.
    pub async fn submit(
        &self,
        request: ClaimRequest,
        correlation_id: Option<String>,
    ) -> Result<Receipt, BridgeError> {
        let claim = Claim::try_from(request)?;
        let payload = codec::encode_claim(&claim)?;
        let correlation_id = correlation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut envelope = Envelope::new(payload);
        envelope.set_correlation_id(correlation_id.clone());
        let envelope_id = envelope.id().to_string();

        self.publisher
            .publish(&self.command_topic, envelope)
            .await?;

        info!(
            claim_id = %claim.id,
            correlation_id = %correlation_id,
            envelope_id = %envelope_id,
            topic = %self.command_topic,
            "claim command published"
        );

        Ok(Receipt {
            claim_id: claim.id,
            correlation_id,
            envelope_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ClaimRequest {
        ClaimRequest {
            idempotency_token: "tok-1".to_string(),
            payee_id: "merchant-9".to_string(),
            amount: AmountRequest {
                currency: "EUR".to_string(),
                value: 1250,
            },
            card: CardRequest {
                number: CardNumber::new("4242424242424242"),
                expiry: ExpiryRequest {
                    year: ExpiryPart::Number(2031),
                    month: ExpiryPart::Number(4),
                },
            },
        }
    }

    #[test]
    fn test_maps_token_to_claim_id() {
        let claim = Claim::try_from(request()).unwrap();
        assert_eq!(claim.id, "tok-1");
        assert_eq!(claim.payee, "merchant-9");
        assert_eq!(claim.amount.value, 1250);
    }

    #[test]
    fn test_rejects_missing_fields() {
        let mut missing_token = request();
        missing_token.idempotency_token.clear();
        assert_eq!(
            Claim::try_from(missing_token).unwrap_err(),
            ValidationError::MissingField("idempotency_token")
        );

        let mut missing_card = request();
        missing_card.card.number = CardNumber::new("");
        assert_eq!(
            Claim::try_from(missing_card).unwrap_err(),
            ValidationError::MissingField("card.number")
        );
    }

    #[test]
    fn test_rejects_negative_amounts_and_bad_months() {
        let mut negative = request();
        negative.amount.value = -1;
        assert_eq!(
            Claim::try_from(negative).unwrap_err(),
            ValidationError::NegativeAmount(-1)
        );

        let mut bad_month = request();
        bad_month.card.expiry.month = ExpiryPart::Number(13);
        assert_eq!(
            Claim::try_from(bad_month).unwrap_err(),
            ValidationError::InvalidMonth(13)
        );
    }

    #[test]
    fn test_expiry_accepts_numeric_strings() {
        let request: ClaimRequest = serde_json::from_value(serde_json::json!({
            "idempotency_token": "tok-2",
            "payee_id": "merchant-9",
            "amount": { "currency": "EUR", "value": 10 },
            "card": { "number": "4242", "expiry": { "year": "2030", "month": "06" } }
        }))
        .unwrap();
        let claim = Claim::try_from(request).unwrap();
        assert_eq!(claim.payer.expires_at, ExpirationDate::new(2030, 6).unwrap());

        let mut garbled = request_with_text_month("June");
        assert_eq!(
            Claim::try_from(garbled.clone()).unwrap_err(),
            ValidationError::InvalidExpiry {
                field: "card.expiry.month",
                value: "June".to_string(),
            }
        );
        garbled.card.expiry.month = ExpiryPart::Text("13".to_string());
        assert_eq!(
            Claim::try_from(garbled).unwrap_err(),
            ValidationError::InvalidMonth(13)
        );
    }

    fn request_with_text_month(month: &str) -> ClaimRequest {
        let mut request = request();
        request.card.expiry.month = ExpiryPart::Text(month.to_string());
        request
    }

    #[test]
    fn test_request_debug_hides_card_number() {
        assert!(!format!("{:?}", request()).contains("4242424242424242"));
    }
}
