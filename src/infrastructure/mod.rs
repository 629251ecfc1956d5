//! Adapters behind the domain ports and the transport contract.

pub mod http_processor;
pub mod in_memory;
pub mod stub_processor;

use crate::config::ProcessorConfig;
use crate::domain::ports::ProcessorBox;
use crate::error::ConfigError;
use http_processor::HttpProcessor;
use std::sync::Arc;
use std::time::Duration;
use stub_processor::StubProcessor;

/// Builds the processor variant selected by configuration.
pub fn build_processor(config: &ProcessorConfig) -> Result<ProcessorBox, ConfigError> {
    match config {
        ProcessorConfig::Http {
            endpoint,
            timeout_ms,
        } => {
            let processor = HttpProcessor::new(endpoint.clone(), Duration::from_millis(*timeout_ms))
                .map_err(|e| ConfigError::Processor(e.to_string()))?;
            Ok(Arc::new(processor))
        }
        ProcessorConfig::Stub { decline_cards } => Ok(Arc::new(
            StubProcessor::with_declined_cards(decline_cards.iter().cloned()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_each_processor_variant() {
        assert!(build_processor(&ProcessorConfig::default()).is_ok());
        assert!(
            build_processor(&ProcessorConfig::Http {
                endpoint: "http://127.0.0.1:9/charge".to_string(),
                timeout_ms: 100,
            })
            .is_ok()
        );
    }
}
