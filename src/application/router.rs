//! Binds handlers to topics and drives their dispatch loops.
//!
//! For each delivery the router invokes the wrapped handler and settles the
//! delivery according to the result:
//!
//! - success: every output is published to the binding's output topic, then
//!   the input is acknowledged. If any publish fails the input is rejected,
//!   so the broker redelivers it and no acknowledged input ever lacks its
//!   outputs.
//! - non-retryable error: the input is copied to `<topic><poison_suffix>`
//!   with the failure recorded in its metadata, then acknowledged.
//! - retryable error (retries exhausted): the input is rejected and the
//!   broker's redelivery and dead-letter policy takes over.
//!
//! Cancelling the run token stops every loop from taking new deliveries.
//! Invocations already in flight run to completion, but their input is only
//! acknowledged when the handler finished before cancellation was requested.
//! Otherwise the delivery is released back to the broker uncharged, so a
//! shutdown never spends an envelope's redelivery budget.

use super::middleware::{BoxHandler, MiddlewareChain};
use crate::error::{HandlerError, RouterError};
use crate::transport::{Delivery, Envelope, PublisherBox, SubscriberBox, Subscription};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Metadata key holding the error that sent an envelope to the poison topic.
pub const POISON_REASON_KEY: &str = "poison_reason";
/// Metadata key holding the name of the handler that poisoned an envelope.
pub const POISONED_BY_KEY: &str = "poisoned_by";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum concurrent invocations per binding.
    pub parallelism: usize,
    pub poison_suffix: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            poison_suffix: ".poison".to_string(),
        }
    }
}

struct Binding {
    name: String,
    subscribe_topic: String,
    publish_topic: Option<String>,
    handler: BoxHandler,
}

pub struct Router {
    publisher: PublisherBox,
    subscriber: SubscriberBox,
    middleware: MiddlewareChain,
    config: RouterConfig,
    bindings: Vec<Binding>,
}

impl Router {
    pub fn new(
        publisher: PublisherBox,
        subscriber: SubscriberBox,
        middleware: MiddlewareChain,
        config: RouterConfig,
    ) -> Self {
        Self {
            publisher,
            subscriber,
            middleware,
            config,
            bindings: Vec::new(),
        }
    }

    /// Binds `handler` to `subscribe_topic`, publishing its outputs to
    /// `publish_topic`.
    pub fn add_handler<S>(
        &mut self,
        name: impl Into<String>,
        subscribe_topic: impl Into<String>,
        publish_topic: impl Into<String>,
        handler: S,
    ) -> &mut Self
    where
        S: tower::Service<Envelope, Response = Vec<Envelope>, Error = HandlerError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let handler = self.middleware.wrap(handler);
        self.bindings.push(Binding {
            name: name.into(),
            subscribe_topic: subscribe_topic.into(),
            publish_topic: Some(publish_topic.into()),
            handler,
        });
        self
    }

    /// Binds a terminal handler that never publishes; any outputs it returns
    /// are discarded.
    pub fn add_no_publisher_handler<S>(
        &mut self,
        name: impl Into<String>,
        subscribe_topic: impl Into<String>,
        handler: S,
    ) -> &mut Self
    where
        S: tower::Service<Envelope, Response = Vec<Envelope>, Error = HandlerError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let handler = self.middleware.wrap(handler);
        self.bindings.push(Binding {
            name: name.into(),
            subscribe_topic: subscribe_topic.into(),
            publish_topic: None,
            handler,
        });
        self
    }

    /// Runs every binding until `ctx` is cancelled or the transport closes,
    /// then closes the transport.
    ///
    /// A router that fails to start cancels `ctx`, so tasks sharing the token
    /// (the HTTP bridge in particular) do not keep running without consumers.
    pub async fn run(self, ctx: CancellationToken) -> Result<(), RouterError> {
        if self.bindings.is_empty() {
            ctx.cancel();
            return Err(RouterError::NoHandlers);
        }
        let mut names = HashSet::new();
        for binding in &self.bindings {
            if !names.insert(binding.name.as_str()) {
                ctx.cancel();
                return Err(RouterError::DuplicateHandler(binding.name.clone()));
            }
        }

        // Handlers are not `Sync`, so no borrow of a binding may live across
        // the subscribe awaits below.
        let topics: Vec<(String, String)> = self
            .bindings
            .iter()
            .map(|b| (b.name.clone(), b.subscribe_topic.clone()))
            .collect();
        drop(names);

        let mut subscriptions = Vec::with_capacity(topics.len());
        for (name, topic) in topics {
            match self.subscriber.subscribe(&topic).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(source) => {
                    error!(handler = %name, topic = %topic, error = %source, "subscribe failed");
                    ctx.cancel();
                    return Err(RouterError::Subscribe {
                        handler: name,
                        source,
                    });
                }
            }
        }

        let parallelism = self.config.parallelism.max(1);
        let mut loops = JoinSet::new();
        for (binding, subscription) in self.bindings.into_iter().zip(subscriptions) {
            let poison_topic = format!("{}{}", binding.subscribe_topic, self.config.poison_suffix);
            info!(
                handler = %binding.name,
                subscribe_topic = %binding.subscribe_topic,
                publish_topic = binding.publish_topic.as_deref().unwrap_or("-"),
                parallelism,
                "starting dispatch loop"
            );
            let dispatcher = Dispatcher {
                target: Arc::new(DispatchTarget {
                    name: binding.name,
                    publish_topic: binding.publish_topic,
                    poison_topic,
                    publisher: self.publisher.clone(),
                }),
                handler: binding.handler,
                parallelism,
            };
            loops.spawn(dispatcher.run(subscription, ctx.clone()));
        }

        let mut failure = None;
        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "dispatch loop terminated abnormally");
                ctx.cancel();
                failure.get_or_insert(e.to_string());
            }
        }

        if let Err(e) = self.subscriber.close().await {
            warn!(error = %e, "failed to close subscriber");
        }
        if let Err(e) = self.publisher.close().await {
            warn!(error = %e, "failed to close publisher");
        }
        info!("router stopped");

        match failure {
            Some(reason) => Err(RouterError::DispatchLoop(reason)),
            None => Ok(()),
        }
    }
}

/// Binding data shared by all in-flight invocations of one handler.
struct DispatchTarget {
    name: String,
    publish_topic: Option<String>,
    poison_topic: String,
    publisher: PublisherBox,
}

struct Dispatcher {
    target: Arc<DispatchTarget>,
    handler: BoxHandler,
    parallelism: usize,
}

impl Dispatcher {
    async fn run(self, mut subscription: Subscription, ctx: CancellationToken) {
        let Dispatcher {
            target,
            handler,
            parallelism,
        } = self;
        let permits = Arc::new(Semaphore::new(parallelism));

        loop {
            let permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let delivery = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                delivery = subscription.next() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        debug!(handler = %target.name, "subscription ended");
                        break;
                    }
                },
            };

            let span = info_span!(
                "dispatch",
                handler = %target.name,
                topic = %delivery.topic(),
                envelope_id = %delivery.envelope().id(),
                delivery = delivery.delivery_count(),
            );
            let target = target.clone();
            let handler = handler.clone();
            let ctx = ctx.clone();
            tokio::spawn(
                async move {
                    target.dispatch(handler, delivery, &ctx).await;
                    drop(permit);
                }
                .instrument(span),
            );
        }

        // Every permit back means every in-flight invocation has settled.
        let all = u32::try_from(parallelism).unwrap_or(u32::MAX);
        if permits.acquire_many(all).await.is_ok() {
            debug!(handler = %target.name, "dispatch loop drained");
        }
    }
}

impl DispatchTarget {
    async fn dispatch(&self, handler: BoxHandler, delivery: Delivery, ctx: &CancellationToken) {
        let result = handler.oneshot(delivery.envelope().clone()).await;

        if ctx.is_cancelled() {
            info!("shutdown requested during invocation, releasing envelope for redelivery");
            settle(delivery.release().await);
            return;
        }

        match result {
            Ok(outputs) => self.publish_outputs(delivery, outputs).await,
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "handler failed, rejecting envelope");
                settle(delivery.reject(&err.to_string()).await);
            }
            Err(err) => self.poison(delivery, &err).await,
        }
    }

    async fn publish_outputs(&self, delivery: Delivery, outputs: Vec<Envelope>) {
        let Some(topic) = &self.publish_topic else {
            if !outputs.is_empty() {
                warn!(
                    discarded = outputs.len(),
                    "terminal handler produced outputs, discarding"
                );
            }
            settle(delivery.ack().await);
            return;
        };

        let count = outputs.len();
        for output in outputs {
            let output_id = output.id().to_string();
            if let Err(e) = self.publisher.publish(topic, output).await {
                error!(
                    output_topic = %topic,
                    output_id = %output_id,
                    error = %e,
                    "failed to publish output, rejecting envelope"
                );
                settle(delivery.reject(&e.to_string()).await);
                return;
            }
        }

        debug!(output_topic = %topic, outputs = count, "outputs published");
        settle(delivery.ack().await);
    }

    async fn poison(&self, delivery: Delivery, err: &HandlerError) {
        error!(
            error = %err,
            poison_topic = %self.poison_topic,
            "non-retryable failure, moving envelope to poison topic"
        );

        let mut poisoned = delivery.envelope().clone();
        poisoned
            .metadata_mut()
            .set(POISON_REASON_KEY, err.to_string());
        poisoned.metadata_mut().set(POISONED_BY_KEY, self.name.clone());

        match self.publisher.publish(&self.poison_topic, poisoned).await {
            Ok(()) => settle(delivery.ack().await),
            Err(e) => {
                error!(error = %e, "failed to publish to poison topic, rejecting envelope");
                settle(delivery.reject(&e.to_string()).await);
            }
        }
    }
}

fn settle(result: Result<(), crate::error::TransportError>) {
    if let Err(e) = result {
        warn!(error = %e, "failed to settle delivery");
    }
}
