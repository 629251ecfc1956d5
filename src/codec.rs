//! Payload encoding for the command and event topics.
//!
//! Claims and outcomes travel as JSON documents. Decoding never panics: a
//! payload that does not parse is reported as [`CodecError::Decode`], which the
//! claim handler classifies as a non-retryable malformed input.

use crate::domain::claim::Claim;
use crate::domain::outcome::Outcome;
use crate::error::CodecError;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

fn encode<T: Serialize>(kind: &'static str, value: &T) -> Result<Bytes, CodecError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| CodecError::Encode { kind, source })
}

fn decode<T: DeserializeOwned>(kind: &'static str, payload: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(payload).map_err(|source| CodecError::Decode { kind, source })
}

pub fn encode_claim(claim: &Claim) -> Result<Bytes, CodecError> {
    encode("claim", claim)
}

pub fn decode_claim(payload: &[u8]) -> Result<Claim, CodecError> {
    decode("claim", payload)
}

pub fn encode_outcome(outcome: &Outcome) -> Result<Bytes, CodecError> {
    encode("outcome", outcome)
}

pub fn decode_outcome(payload: &[u8]) -> Result<Outcome, CodecError> {
    decode("outcome", payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::{Card, CardNumber, Currency, ExpirationDate, MonetaryAmount};
    use rand::Rng;
    use rand::distributions::{Alphanumeric, DistString};

    #[test]
    fn test_claim_round_trip() {
        let claim = Claim {
            id: "abc-1".to_string(),
            payee: "p1".to_string(),
            amount: MonetaryAmount::new(Currency::new("GBP").unwrap(), 10_000),
            payer: Card {
                number: CardNumber::new("4111111111111111"),
                expires_at: ExpirationDate::new(2030, 6).unwrap(),
            },
        };

        let bytes = encode_claim(&claim).unwrap();
        assert_eq!(decode_claim(&bytes).unwrap(), claim);
    }

    const AWKWARD_TEXT: [&str; 6] = [
        "4111 1111 1111 1111",
        "\"quoted\"",
        "back\\slash",
        "tab\tand\nnewline",
        "ünïcødé €",
        "😀\u{0}",
    ];

    fn random_text(rng: &mut impl Rng) -> String {
        let len = rng.gen_range(0..24);
        let mut text = Alphanumeric.sample_string(rng, len);
        if rng.gen_bool(0.5) {
            text.push_str(AWKWARD_TEXT[rng.gen_range(0..AWKWARD_TEXT.len())]);
        }
        text
    }

    fn random_claim(rng: &mut impl Rng) -> Claim {
        let currency: String = (0..3).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect();
        let value = match rng.gen_range(0..4) {
            0 => u64::MAX,
            1 => 0,
            _ => rng.gen_range(0..=u64::MAX),
        };
        Claim {
            id: random_text(rng),
            payee: random_text(rng),
            amount: MonetaryAmount::new(Currency::new(currency).unwrap(), value),
            payer: Card {
                number: CardNumber::new(random_text(rng)),
                expires_at: ExpirationDate::new(rng.gen_range(1970..=2100), rng.gen_range(1..=12))
                    .unwrap(),
            },
        }
    }

    #[test]
    fn test_generated_claims_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let claim = random_claim(&mut rng);
            let bytes = encode_claim(&claim).unwrap();
            assert_eq!(decode_claim(&bytes).unwrap(), claim);
        }
    }

    #[test]
    fn test_zero_amount_round_trip() {
        let claim = Claim {
            id: "zero".to_string(),
            payee: "p".to_string(),
            amount: MonetaryAmount::new(Currency::new("JPY").unwrap(), 0),
            payer: Card {
                number: CardNumber::new(""),
                expires_at: ExpirationDate::new(1999, 12).unwrap(),
            },
        };
        assert_eq!(decode_claim(&encode_claim(&claim).unwrap()).unwrap(), claim);
    }

    #[test]
    fn test_outcome_wire_format() {
        let bytes = encode_outcome(&Outcome::approved("ch_123")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["vendor_reference"], "ch_123");
        assert_eq!(value["success"], true);
    }

    #[test]
    fn test_decode_garbage_is_an_error() {
        let err = decode_claim(b"\x00not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode { kind: "claim", .. }));
    }

    #[test]
    fn test_decode_negative_amount_is_an_error() {
        let json = br#"{"id":"c","payee":"p","amount":{"currency":"GBP","value":-5},
            "payer":{"number":"4111","expires_at":{"year":2030,"month":1}}}"#;
        assert!(decode_claim(json).is_err());
    }
}
