mod common;

use common::test_helpers::{scripted_client, url, Reply, ScriptedTransport};
use http::StatusCode;
use std::time::Duration;
use steadyhttp::{
    ClientBuilder, ClientConfig, ClientError, HttpRequest, InstrumentationEvent, Jitter,
    RetryConfig, TrackingSleeper,
};

fn retrying(max_attempts: usize) -> ClientConfig {
    ClientConfig::new("orders").with_retries(RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
    })
}

#[tokio::test]
async fn non_retriable_statuses_get_exactly_one_attempt() {
    for code in [400, 401, 404, 409, 422, 429, 501, 502, 505, 511] {
        let transport = ScriptedTransport::new([Reply::Status(code), Reply::Status(200)]);
        let (client, memory) = scripted_client(retrying(3), transport.clone());

        let resp = client.execute(HttpRequest::get(url("/orders/1"))).await.unwrap();

        assert_eq!(resp.status().as_u16(), code);
        assert_eq!(transport.calls(), 1, "status {code}");
        assert_eq!(memory.count(|e| matches!(e, InstrumentationEvent::RetryNonRetriable { .. })), 1);
    }
}

#[tokio::test]
async fn retriable_responses_then_success_use_n_plus_one_attempts_with_identical_bodies() {
    let transport = ScriptedTransport::new([Reply::Status(503), Reply::Status(408), Reply::Status(504), Reply::Status(201)]);
    let (client, memory) = scripted_client(retrying(5), transport.clone());

    let resp = client
        .execute(HttpRequest::post(url("/orders")).with_body(r#"{"sku":"A-1","qty":2}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(transport.calls(), 4);
    for seen in transport.seen() {
        assert_eq!(seen.body.as_ref(), br#"{"sku":"A-1","qty":2}"#);
    }
    assert_eq!(memory.count(|e| matches!(e, InstrumentationEvent::RetryRetriable { .. })), 3);
    assert_eq!(memory.count(|e| matches!(e, InstrumentationEvent::BaseDoDuration { .. })), 4);
    assert_eq!(memory.count(|e| matches!(e, InstrumentationEvent::DoDuration { .. })), 1);
}

#[tokio::test]
async fn exhausted_retries_return_the_last_response_without_an_error() {
    let transport = ScriptedTransport::new([Reply::Status(500), Reply::Status(503), Reply::Status(503)]);
    let (client, _) = scripted_client(retrying(3), transport.clone());

    let resp = client.execute(HttpRequest::get(url("/orders"))).await.unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.text(), "status 503 call 3");
}

#[tokio::test]
async fn post_with_connect_timeout_fails_once_without_retry() {
    let transport = ScriptedTransport::new([Reply::ConnectTimeout, Reply::Status(200)]);
    let (client, memory) = scripted_client(retrying(3), transport.clone());

    let err = client
        .execute(HttpRequest::post(url("/payments")).with_body("charge"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::ConnectTimeout));
    assert!(err.is_connect());
    assert_eq!(transport.calls(), 1);
    assert_eq!(
        memory.count(|e| matches!(e, InstrumentationEvent::BaseDoErr { reason, .. } if reason == "connect_timeout")),
        1
    );
}

#[tokio::test]
async fn mid_request_timeouts_are_retried() {
    let transport = ScriptedTransport::new([Reply::Timeout, Reply::Status(200)]);
    let (client, _) = scripted_client(retrying(3), transport.clone());

    let resp = client.execute(HttpRequest::get(url("/slow"))).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn backoff_delays_never_decrease_and_stay_under_the_cap() {
    let transport = ScriptedTransport::new(std::iter::repeat(Reply::Status(503)).take(8));
    let sleeper = TrackingSleeper::new();
    let client = ClientBuilder::new(ClientConfig::new("backoff").with_retries(RetryConfig {
        max_attempts: 8,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(200),
    }))
    .shared_transport(transport.clone())
    .sleeper(sleeper.clone())
    .jitter(Jitter::Equal)
    .build()
    .unwrap();

    client.execute(HttpRequest::get(url("/busy"))).await.unwrap();

    let delays = sleeper.calls();
    assert_eq!(delays.len(), 7);
    assert!(delays.windows(2).all(|w| w[1] >= w[0]), "{delays:?}");
    assert!(delays.iter().all(|d| *d <= Duration::from_millis(200)), "{delays:?}");
    assert!(delays[0] >= Duration::from_millis(5) && delays[0] <= Duration::from_millis(10));
    assert!(delays[6] >= Duration::from_millis(100), "{delays:?}");
}

#[tokio::test]
async fn without_a_retry_section_requests_are_sent_once() {
    let transport = ScriptedTransport::new([Reply::Status(503)]);
    let (client, _) = scripted_client(ClientConfig::new("plain"), transport.clone());

    let resp = client.execute(HttpRequest::get(url("/busy"))).await.unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(transport.calls(), 1);
}
