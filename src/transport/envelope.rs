use bytes::Bytes;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metadata key carrying the identifier shared by every envelope derived from
/// one originating request.
pub const CORRELATION_ID_KEY: &str = "correlation_id";
/// Metadata key carrying the number of local retries already attempted.
pub const RETRY_COUNT_KEY: &str = "retry_count";

/// String key/value headers travelling with an envelope, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Transport-level wrapper around a serialized claim or outcome.
///
/// The id and payload are fixed at construction; handlers produce new
/// envelopes rather than editing the one they received. Only the metadata is
/// mutable.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    id: String,
    payload: Bytes,
    metadata: Metadata,
}

impl Envelope {
    /// Creates an envelope with a freshly minted id.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    pub fn with_id(id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insertion.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID_KEY)
    }

    pub fn set_correlation_id(&mut self, correlation_id: impl Into<String>) {
        self.metadata.set(CORRELATION_ID_KEY, correlation_id);
    }

    /// Number of local retries recorded on this envelope, zero when absent or
    /// unparsable.
    pub fn retry_count(&self) -> u32 {
        self.metadata
            .get(RETRY_COUNT_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_envelopes_get_distinct_ids() {
        let a = Envelope::new(Bytes::from_static(b"{}"));
        let b = Envelope::new(Bytes::from_static(b"{}"));
        assert_ne!(a.id(), b.id());
        assert!(Uuid::parse_str(a.id()).is_ok());
    }

    #[test]
    fn test_metadata_is_ordered_and_mutable() {
        let mut envelope = Envelope::with_id("e-1", b"payload".to_vec())
            .with_metadata("b", "2")
            .with_metadata("a", "1");
        envelope.metadata_mut().set("b", "3");

        let pairs: Vec<_> = envelope.metadata().iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "3")]);
        assert_eq!(envelope.payload().as_ref(), b"payload");
    }

    #[test]
    fn test_retry_count_defaults_to_zero() {
        let mut envelope = Envelope::with_id("e-1", Bytes::new());
        assert_eq!(envelope.retry_count(), 0);
        envelope.metadata_mut().set(RETRY_COUNT_KEY, "2");
        assert_eq!(envelope.retry_count(), 2);
        envelope.metadata_mut().set(RETRY_COUNT_KEY, "many");
        assert_eq!(envelope.retry_count(), 0);
    }
}
