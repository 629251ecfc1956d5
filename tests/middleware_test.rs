use payclaim::application::middleware::{
    CorrelationLayer, FaultIsolationLayer, MiddlewareChain, RateLimitLayer, RetryLayer, RetryPolicy,
};
use payclaim::error::{CodecError, HandlerError, ProcessorError};
use payclaim::transport::{Envelope, RETRY_COUNT_KEY};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower::{Layer, ServiceExt, service_fn};

fn transient() -> HandlerError {
    HandlerError::Processor {
        claim_id: "c".to_string(),
        source: ProcessorError::Unavailable("down".to_string()),
    }
}

fn malformed() -> HandlerError {
    let source = serde_json::from_str::<u8>("x").unwrap_err();
    HandlerError::Malformed(CodecError::Decode {
        kind: "claim",
        source,
    })
}

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_interval: Duration::from_millis(100),
        multiplier: 2.0,
        max_interval: None,
    }
}

#[tokio::test]
async fn test_correlation_is_minted_and_propagated() {
    let service = CorrelationLayer::new().layer(service_fn(|input: Envelope| async move {
        Ok::<_, HandlerError>(vec![
            Envelope::new(input.payload().clone()),
            Envelope::new(input.payload().clone()),
        ])
    }));

    let outputs = service
        .clone()
        .oneshot(Envelope::new(&b"in"[..]))
        .await
        .unwrap();
    let minted = outputs[0].correlation_id().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&minted).is_ok());
    assert_eq!(outputs[1].correlation_id(), Some(minted.as_str()));

    let mut input = Envelope::new(&b"in"[..]);
    input.set_correlation_id("upstream-7");
    let outputs = service.oneshot(input).await.unwrap();
    assert!(outputs.iter().all(|o| o.correlation_id() == Some("upstream-7")));
}

#[tokio::test(start_paused = true)]
async fn test_retry_is_bounded_and_backs_off() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let service = RetryLayer::new(policy(2)).layer(service_fn(move |input: Envelope| {
        let recorder = recorder.clone();
        async move {
            recorder.lock().await.push(input.retry_count());
            Err::<Vec<Envelope>, _>(transient())
        }
    }));

    let started = Instant::now();
    let err = service.oneshot(Envelope::new(&b"x"[..])).await.unwrap_err();

    assert!(matches!(err, HandlerError::Processor { .. }));
    assert_eq!(*seen.lock().await, vec![0, 1, 2]);
    // 100ms then 200ms
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn test_retry_skips_non_retryable_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let service = RetryLayer::new(policy(5)).layer(service_fn(move |_input: Envelope| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<Vec<Envelope>, _>(malformed()) }
    }));

    let err = service.oneshot(Envelope::new(&b"x"[..])).await.unwrap_err();
    assert!(matches!(err, HandlerError::Malformed(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_marks_attempts_on_a_copy() {
    let service = RetryLayer::new(RetryPolicy {
        initial_interval: Duration::from_millis(1),
        ..policy(3)
    })
    .layer(service_fn(|input: Envelope| async move {
        if input.retry_count() < 1 {
            Err(transient())
        } else {
            Ok(vec![input])
        }
    }));

    let outputs = service.oneshot(Envelope::with_id("e-1", &b"x"[..])).await.unwrap();
    assert_eq!(outputs[0].id(), "e-1");
    assert_eq!(outputs[0].metadata().get(RETRY_COUNT_KEY), Some("1"));
}

#[tokio::test]
async fn test_fault_isolation_converts_panics() {
    let service = FaultIsolationLayer::new().layer(service_fn(|input: Envelope| async move {
        if input.payload().as_ref() == b"boom" {
            panic!("handler exploded");
        }
        Ok::<_, HandlerError>(vec![input])
    }));

    let err = service
        .clone()
        .oneshot(Envelope::new(&b"boom"[..]))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    match err {
        HandlerError::Fault(message) => assert!(message.contains("handler exploded")),
        other => panic!("expected a fault, got {other:?}"),
    }

    // The same service keeps working after a panic.
    let outputs = service.oneshot(Envelope::new(&b"fine"[..])).await.unwrap();
    assert_eq!(outputs.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_bounds_starts_per_window() {
    const LIMIT: usize = 3;
    const WINDOW: Duration = Duration::from_millis(1000);

    let starts = Arc::new(Mutex::new(Vec::new()));
    let recorder = starts.clone();
    let service = RateLimitLayer::new(LIMIT, WINDOW).layer(service_fn(move |_input: Envelope| {
        let recorder = recorder.clone();
        async move {
            recorder.lock().await.push(Instant::now());
            Ok::<_, HandlerError>(Vec::new())
        }
    }));

    let offsets: Vec<u64> = {
        let mut rng = rand::thread_rng();
        (0..12).map(|_| rng.gen_range(0..1500)).collect()
    };

    let mut tasks = Vec::new();
    for offset in offsets {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(offset)).await;
            service.oneshot(Envelope::new(&b"x"[..])).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut starts = starts.lock().await.clone();
    starts.sort();
    assert_eq!(starts.len(), 12);
    for (i, first) in starts.iter().enumerate() {
        let in_window = starts[i..]
            .iter()
            .take_while(|s| s.duration_since(*first) < WINDOW)
            .count();
        assert!(in_window <= LIMIT, "{in_window} starts within one window");
    }
}

#[tokio::test(start_paused = true)]
async fn test_chain_retries_a_panicking_handler_and_keeps_correlation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let chain = MiddlewareChain::builder()
        .retry(policy(2))
        .rate_limit(10, Duration::from_secs(1))
        .build();
    let handler = chain.wrap(service_fn(move |input: Envelope| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if call == 0 {
                panic!("first attempt fails hard");
            }
            Ok::<_, HandlerError>(vec![Envelope::new(input.payload().clone())])
        }
    }));

    let mut input = Envelope::new(&b"x"[..]);
    input.set_correlation_id("corr-42");
    let outputs = handler.oneshot(input).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outputs[0].correlation_id(), Some("corr-42"));
}
