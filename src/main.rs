use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use payclaim::application::claim_handler::ClaimHandler;
use payclaim::application::outcome_logger::{ObservedOutcome, OutcomeLogger};
use payclaim::application::router::Router;
use payclaim::config::AppConfig;
use payclaim::domain::claim::CardNumber;
use payclaim::domain::ports::ProcessorBox;
use payclaim::infrastructure::build_processor;
use payclaim::infrastructure::in_memory::InMemoryBroker;
use payclaim::infrastructure::stub_processor::StubProcessor;
use payclaim::interfaces::http::{
    self, AmountRequest, Bridge, CardRequest, ClaimRequest, ExpiryPart, ExpiryRequest,
};
use payclaim::telemetry;
use payclaim::transport::{PublisherBox, SubscriberBox};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const APPROVED_TEST_CARD: &str = "4111111111111111";
const DECLINED_TEST_CARD: &str = "4000000000000002";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); PAYCLAIM__* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP bridge and the claim pipeline until interrupted
    Serve,
    /// Push generated claims through the pipeline and print their outcomes
    Simulate {
        /// Number of claims to submit
        #[arg(long, default_value_t = 10)]
        count: usize,

        /// Pay every K-th claim with a card the stub processor declines
        #[arg(long)]
        decline_every: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).into_diagnostic()?;
    telemetry::init_tracing(&config.logging);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Simulate {
            count,
            decline_every,
        } => simulate(config, count, decline_every).await,
    }
}

/// Wires the claim binding and the outcome sink onto one broker.
fn pipeline(
    config: &AppConfig,
    broker: &InMemoryBroker,
    processor: ProcessorBox,
    outcomes: OutcomeLogger,
) -> Router {
    let publisher: PublisherBox = Arc::new(broker.clone());
    let subscriber: SubscriberBox = Arc::new(broker.clone());
    let mut router = Router::new(
        publisher,
        subscriber,
        config.middleware_chain(),
        config.router_config(),
    );
    router
        .add_handler(
            "claim-processor",
            &config.topics.commands,
            &config.topics.events,
            ClaimHandler::new(processor),
        )
        .add_no_publisher_handler("outcome-logger", &config.topics.events, outcomes);
    router
}

async fn serve(config: AppConfig) -> Result<()> {
    let broker = InMemoryBroker::new(config.broker_config());
    let processor = build_processor(&config.processor).into_diagnostic()?;
    let router = pipeline(&config, &broker, processor, OutcomeLogger::new());
    let bridge = Arc::new(Bridge::new(
        Arc::new(broker.clone()),
        config.topics.commands.clone(),
    ));
    let listener = tokio::net::TcpListener::bind(&config.http.bind_addr)
        .await
        .into_diagnostic()?;

    let ctx = CancellationToken::new();
    spawn_signal_handler(ctx.clone());

    let router_task = tokio::spawn(router.run(ctx.clone()));
    let http_result = http::serve(bridge, listener, ctx.clone()).await;
    ctx.cancel();

    let router_result = router_task.await.into_diagnostic()?;
    http_result.into_diagnostic()?;
    router_result.into_diagnostic()?;
    info!("shutdown complete");
    Ok(())
}

async fn simulate(config: AppConfig, count: usize, decline_every: Option<usize>) -> Result<()> {
    let broker = InMemoryBroker::new(config.broker_config());
    let processor: ProcessorBox = Arc::new(StubProcessor::with_declined_cards([
        DECLINED_TEST_CARD,
    ]));
    let (tx, mut rx) = mpsc::channel::<ObservedOutcome>(count.max(1));
    let router = pipeline(&config, &broker, processor, OutcomeLogger::with_sink(tx));
    let bridge = Bridge::new(Arc::new(broker.clone()), config.topics.commands.clone());

    let ctx = CancellationToken::new();
    spawn_signal_handler(ctx.clone());
    let router_task = tokio::spawn(router.run(ctx.clone()));

    for n in 1..=count {
        let declined = decline_every.is_some_and(|k| k > 0 && n % k == 0);
        bridge
            .submit(simulated_request(n, declined), None)
            .await
            .into_diagnostic()?;
    }

    let mut received = 0;
    while received < count {
        tokio::select! {
            _ = ctx.cancelled() => break,
            outcome = rx.recv() => match outcome {
                Some(outcome) => {
                    println!("{}", serde_json::to_string(&outcome).into_diagnostic()?);
                    received += 1;
                }
                None => break,
            },
        }
    }

    ctx.cancel();
    router_task.await.into_diagnostic()?.into_diagnostic()?;
    if received < count {
        error!(received, expected = count, "simulation interrupted");
        return Err(miette::miette!(
            "received {received} of {count} outcomes before shutdown"
        ));
    }
    Ok(())
}

fn simulated_request(n: usize, declined: bool) -> ClaimRequest {
    let card = if declined {
        DECLINED_TEST_CARD
    } else {
        APPROVED_TEST_CARD
    };
    ClaimRequest {
        idempotency_token: format!("sim-{n}"),
        payee_id: "simulated-payee".to_string(),
        amount: AmountRequest {
            currency: "GBP".to_string(),
            value: i64::try_from(n * 100).unwrap_or(i64::MAX),
        },
        card: CardRequest {
            number: CardNumber::new(card),
            expiry: ExpiryRequest {
                year: ExpiryPart::Number(2030),
                month: ExpiryPart::Number(12),
            },
        },
    }
}

fn spawn_signal_handler(ctx: CancellationToken) {
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received shutdown signal");
                interrupt.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM");
                ctx.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for SIGTERM"),
        }
    });
}
