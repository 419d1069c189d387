mod common;

use common::test_helpers::{scripted_client, Reply, ScriptedTransport};
use std::collections::HashMap;
use std::time::Duration;
use steadyhttp::{ClientConfig, InstrumentationEvent, MemoryInstrumentation};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> =
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key: &str| vars.get(key).cloned()
}

fn warnings(memory: &MemoryInstrumentation) -> Vec<String> {
    memory
        .events()
        .into_iter()
        .filter_map(|e| match e {
            InstrumentationEvent::InitWarning { message } => Some(message),
            _ => None,
        })
        .collect()
}

#[test]
fn environment_builds_the_full_pipeline() {
    let config = ClientConfig::from_lookup(
        "PAYMENTS",
        lookup(&[
            ("PAYMENTS_NAME", "payments"),
            ("PAYMENTS_TIMEOUT_MS", "2000"),
            ("PAYMENTS_CONNECT_TIMEOUT_MS", "250"),
            ("PAYMENTS_RETRY_MAX_ATTEMPTS", "4"),
            ("PAYMENTS_RETRY_BASE_DELAY_MS", "20"),
            ("PAYMENTS_RETRY_MAX_DELAY_MS", "500"),
            ("PAYMENTS_CB_ERROR_PERCENT", "75"),
            ("PAYMENTS_CB_MAX_CONCURRENT", "32"),
            ("PAYMENTS_CB_REQUEST_VOLUME", "40"),
            ("PAYMENTS_CB_SLEEP_WINDOW_MS", "3000"),
            ("PAYMENTS_COALESCING", "true"),
        ]),
    );

    let (client, memory) = scripted_client(config, ScriptedTransport::new(Vec::<Reply>::new()));

    assert_eq!(client.name(), "payments");
    assert_eq!(client.stage_names(), vec!["coalesce", "circuit_breaker", "retry"]);
    let settings = client.breaker().unwrap().settings();
    assert_eq!(settings.error_percent_threshold(), 75);
    assert_eq!(settings.max_concurrent_requests(), 32);
    assert_eq!(settings.request_volume_threshold(), 40);
    assert_eq!(settings.sleep_window(), Duration::from_secs(3));
    assert!(
        !warnings(&memory).iter().any(|w| w.contains("no circuit breaker") || w.contains("coalescing")),
        "{:?}",
        warnings(&memory)
    );
    assert_eq!(memory.count(|e| matches!(e, InstrumentationEvent::Init { name } if name == "payments")), 1);
}

#[test]
fn empty_environment_builds_a_bare_client_and_says_so() {
    let config = ClientConfig::from_lookup("NOTHING", lookup(&[]));

    let (client, memory) = scripted_client(config, ScriptedTransport::new(Vec::<Reply>::new()));

    assert!(client.stage_names().is_empty());
    assert!(client.breaker().is_none());
    let warnings = warnings(&memory);
    assert!(warnings.iter().any(|w| w.starts_with("name was not supplied")));
    assert!(warnings.iter().any(|w| w.starts_with("no circuit breaker has been configured")));
    assert!(warnings.iter().any(|w| w.starts_with("no request coalescing has been configured")));
}

#[test]
fn invalid_values_fall_back_to_defaults() {
    let config = ClientConfig::from_lookup(
        "SVC",
        lookup(&[("SVC_NAME", "svc"), ("SVC_CB_ERROR_PERCENT", "40"), ("SVC_TIMEOUT_MS", "soon")]),
    );

    let (client, memory) = scripted_client(config, ScriptedTransport::new(Vec::<Reply>::new()));

    assert_eq!(client.breaker().unwrap().settings().error_percent_threshold(), 80);
    let warnings = warnings(&memory);
    assert!(warnings.iter().any(|w| w.contains("'error percent threshold' of 40")));
    assert!(warnings.iter().any(|w| w == "using default 'timeout' setting"));
}
