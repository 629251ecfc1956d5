//! Application layer: the handlers, the middleware that wraps them, and the
//! router that binds them to topics.
//!
//! The [`router::Router`] owns the dispatch loops. Handlers are plain tower
//! services from an [`crate::transport::Envelope`] to the envelopes they emit,
//! so they can be exercised without a broker.

pub mod claim_handler;
pub mod middleware;
pub mod outcome_logger;
pub mod router;
