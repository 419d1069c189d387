mod common;

use common::test_helpers::{scripted_client, url, Reply, ScriptedTransport};
use std::sync::Arc;
use std::time::Duration;
use steadyhttp::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, ClientBuilder, ClientConfig,
    ClientError, HttpRequest, InstantSleeper, InstrumentationEvent, Jitter, ManualClock,
    MemoryInstrumentation, RetryConfig,
};

fn breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        error_percent_threshold: 60,
        max_concurrent_requests: 10,
        request_volume_threshold: 4,
        sleep_window: Duration::from_secs(5),
        ..CircuitBreakerConfig::default()
    }
}

#[tokio::test]
async fn open_circuit_rejects_without_touching_the_transport() {
    let transport = ScriptedTransport::new(std::iter::repeat(Reply::Status(500)).take(4));
    let (client, memory) =
        scripted_client(ClientConfig::new("inventory").with_circuit_breaker(breaker_config()), transport.clone());

    for _ in 0..4 {
        let resp = client.execute(HttpRequest::get(url("/stock"))).await.unwrap();
        assert_eq!(resp.status().as_u16(), 500);
    }
    assert_eq!(client.breaker().unwrap().state(), CircuitState::Open);

    let err = client.execute(HttpRequest::get(url("/stock"))).await.unwrap_err();

    assert!(matches!(err, ClientError::CircuitOpen { ref name, .. } if name == "inventory"));
    assert_eq!(transport.calls(), 4);
    assert_eq!(memory.count(|e| matches!(e, InstrumentationEvent::CircuitOpen { .. })), 1);
    assert_eq!(memory.count(|e| matches!(e, InstrumentationEvent::CircuitTrackedStatus { .. })), 4);
}

#[tokio::test]
async fn untracked_client_errors_do_not_trip_the_breaker() {
    let transport = ScriptedTransport::new(std::iter::repeat(Reply::Status(404)).take(10));
    let (client, _) =
        scripted_client(ClientConfig::new("lookup").with_circuit_breaker(breaker_config()), transport.clone());

    for _ in 0..10 {
        client.execute(HttpRequest::get(url("/missing"))).await.unwrap();
    }

    assert_eq!(client.breaker().unwrap().state(), CircuitState::Closed);
    assert_eq!(client.breaker().unwrap().counts().failures, 0);
}

#[tokio::test]
async fn breaker_counts_a_whole_retry_sequence_as_one_outcome() {
    let transport = ScriptedTransport::new([Reply::Status(503), Reply::Status(503), Reply::Status(200)]);
    let (client, _) = scripted_client(
        ClientConfig::new("quotes")
            .with_circuit_breaker(breaker_config())
            .with_retries(RetryConfig { max_attempts: 3, ..RetryConfig::default() }),
        transport.clone(),
    );

    client.execute(HttpRequest::get(url("/quote"))).await.unwrap();

    let counts = client.breaker().unwrap().counts();
    assert_eq!(transport.calls(), 3);
    assert_eq!(counts.total, 1);
    assert_eq!(counts.failures, 0);
}

#[tokio::test]
async fn concurrency_limit_rejects_excess_calls() {
    let transport = ScriptedTransport::new([Reply::Hang]);
    let (client, memory) = scripted_client(
        ClientConfig::new("narrow")
            .with_circuit_breaker(CircuitBreakerConfig { max_concurrent_requests: 1, ..breaker_config() }),
        transport.clone(),
    );

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.execute(HttpRequest::get(url("/hang"))).await }
    });
    while transport.calls() == 0 {
        tokio::task::yield_now().await;
    }

    let err = client.execute(HttpRequest::get(url("/hang"))).await.unwrap_err();

    assert!(matches!(err, ClientError::ConcurrencyLimit { max: 1 }));
    assert!(err.is_concurrency_limit());
    assert_eq!(transport.calls(), 1);
    assert_eq!(
        memory.count(|e| matches!(
            e,
            InstrumentationEvent::BaseDoErr { reason, endpoint, .. }
                if reason == "concurrency_limit" && endpoint == "GET::/hang"
        )),
        1
    );
    assert_eq!(memory.count(|e| matches!(e, InstrumentationEvent::CircuitOpen { .. })), 0);
    first.abort();
}

#[tokio::test]
async fn circuit_recovers_after_a_successful_trial() {
    let clock = ManualClock::new();
    let transport = ScriptedTransport::new(std::iter::repeat(Reply::Status(503)).take(4));
    let client = ClientBuilder::new(ClientConfig::new("billing").with_circuit_breaker(breaker_config()))
        .instrumentation(MemoryInstrumentation::new())
        .registry(CircuitBreakerRegistry::with_clock(Arc::new(clock.clone())))
        .shared_transport(transport.clone())
        .sleeper(InstantSleeper)
        .jitter(Jitter::None)
        .build()
        .unwrap();

    for _ in 0..4 {
        client.execute(HttpRequest::get(url("/invoice"))).await.unwrap();
    }
    assert!(client.execute(HttpRequest::get(url("/invoice"))).await.unwrap_err().is_circuit_open());

    clock.advance(Duration::from_secs(5));
    let resp = client.execute(HttpRequest::get(url("/invoice"))).await.unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(client.breaker().unwrap().state(), CircuitState::Closed);
    assert_eq!(client.breaker().unwrap().counts().total, 0);
    assert_eq!(transport.calls(), 5);
}

#[tokio::test]
async fn failed_trial_reopens_the_circuit() {
    let clock = ManualClock::new();
    let transport = ScriptedTransport::new(std::iter::repeat(Reply::Status(500)).take(5));
    let client = ClientBuilder::new(ClientConfig::new("ledger").with_circuit_breaker(breaker_config()))
        .registry(CircuitBreakerRegistry::with_clock(Arc::new(clock.clone())))
        .shared_transport(transport.clone())
        .build()
        .unwrap();

    for _ in 0..4 {
        client.execute(HttpRequest::get(url("/entries"))).await.unwrap();
    }
    clock.advance(Duration::from_secs(6));
    let trial = client.execute(HttpRequest::get(url("/entries"))).await.unwrap();

    assert_eq!(trial.status().as_u16(), 500);
    assert_eq!(client.breaker().unwrap().state(), CircuitState::Open);
    assert!(client.execute(HttpRequest::get(url("/entries"))).await.unwrap_err().is_circuit_open());
}

#[tokio::test]
async fn clients_sharing_a_name_share_a_breaker() {
    let registry = CircuitBreakerRegistry::new();
    let transport = ScriptedTransport::new(std::iter::repeat(Reply::Status(502)).take(4));
    let build = || {
        ClientBuilder::new(ClientConfig::new("shared").with_circuit_breaker(breaker_config()))
            .registry(registry.clone())
            .shared_transport(transport.clone())
            .build()
            .unwrap()
    };
    let a = build();
    let b = build();

    for _ in 0..4 {
        a.execute(HttpRequest::get(url("/x"))).await.unwrap();
    }

    assert!(Arc::ptr_eq(a.breaker().unwrap(), b.breaker().unwrap()));
    assert!(b.execute(HttpRequest::get(url("/x"))).await.unwrap_err().is_circuit_open());
    assert_eq!(registry.len(), 1);
}
