use serde::{Deserialize, Serialize};

/// Terminal result of presenting a claim to a payment processor.
///
/// A definitive decline is still an `Outcome` (with `success == false`);
/// only failures that may succeed on retry are reported as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub vendor_reference: String,
    pub success: bool,
}

impl Outcome {
    pub fn approved(vendor_reference: impl Into<String>) -> Self {
        Self {
            vendor_reference: vendor_reference.into(),
            success: true,
        }
    }

    pub fn declined(vendor_reference: impl Into<String>) -> Self {
        Self {
            vendor_reference: vendor_reference.into(),
            success: false,
        }
    }
}
