use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid currency code {0:?}: expected three uppercase ISO-4217 letters")]
    InvalidCurrency(String),
    #[error("amount must not be negative, got {0}")]
    NegativeAmount(i64),
    #[error("expiry month must be within 1..=12, got {0}")]
    InvalidMonth(u32),
    #[error("{field} must be a number, got {value:?}")]
    InvalidExpiry { field: &'static str, value: String },
    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("no in-flight delivery {delivery_tag} for envelope {envelope_id} on {topic}")]
    StaleDelivery {
        topic: String,
        envelope_id: String,
        delivery_tag: u64,
    },
    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("payload is not a valid {kind}: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("payment provider unreachable: {0}")]
    Transport(String),
    #[error("payment provider refused the claim with status {status}")]
    Rejected { status: u16 },
    #[error("payment provider returned an unreadable response: {0}")]
    InvalidResponse(String),
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),
}

/// Failure of one handler invocation, classified for the retry and
/// disposition decisions taken by the middleware chain and the router.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("malformed payload: {0}")]
    Malformed(#[source] CodecError),
    #[error("error when processing claim {claim_id}: {source}")]
    Processor {
        claim_id: String,
        #[source]
        source: ProcessorError,
    },
    #[error("handler fault: {0}")]
    Fault(String),
    #[error("failed to encode output: {0}")]
    Encode(#[source] CodecError),
}

impl HandlerError {
    /// Whether retrying the same input could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Processor { .. } | HandlerError::Fault(_) => true,
            HandlerError::Malformed(_) | HandlerError::Encode(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid claim request: {0}")]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Encode(#[from] CodecError),
    #[error("failed to publish claim command: {0}")]
    Publish(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("router has no handlers bound")]
    NoHandlers,
    #[error("handler {0:?} is bound more than once")]
    DuplicateHandler(String),
    #[error("failed to subscribe handler {handler}: {source}")]
    Subscribe {
        handler: String,
        #[source]
        source: TransportError,
    },
    #[error("dispatch loop for handler {0} terminated abnormally")]
    DispatchLoop(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to build payment processor: {0}")]
    Processor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let processor = HandlerError::Processor {
            claim_id: "c-1".to_string(),
            source: ProcessorError::Rejected { status: 502 },
        };
        assert!(processor.is_retryable());
        assert!(HandlerError::Fault("boom".to_string()).is_retryable());

        let decode = serde_json::from_slice::<u8>(b"nope").unwrap_err();
        let malformed = HandlerError::Malformed(CodecError::Decode {
            kind: "claim",
            source: decode,
        });
        assert!(!malformed.is_retryable());
    }

    #[test]
    fn test_processor_error_message_names_claim() {
        let err = HandlerError::Processor {
            claim_id: "c-9".to_string(),
            source: ProcessorError::Transport("connection refused".to_string()),
        };
        assert!(err.to_string().contains("c-9"));
        assert!(err.to_string().contains("connection refused"));
    }
}
