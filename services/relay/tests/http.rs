//! Serves the real router on an ephemeral port with a fake upstream and calls it over HTTP.

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use survey_core::{
    llm_client::{UpstreamCall, UpstreamClient, UpstreamError},
    retry::Sleeper,
    scenario::ScenarioTable,
};
use survey_relay::{config::Config, handlers::SAFE_ERROR_MESSAGE, router::create_router, state::AppState};

const SCENARIOS: &str = r#"{"scenarios": [
    {"id": "a-consumerism-efl", "credential": "EFL_KEY_A", "model": "gpt-4o-mini"},
    {"id": "a-consumerism-std", "credential": "STD_KEY_A", "model": "gpt-3.5-turbo-instruct", "endpoint": "text"},
    {"id": "b-consumerism-efl", "credential": "EFL_KEY_B", "model": "gpt-4o-mini"}
]}"#;

/// Replies "hello" in the shape of whichever endpoint is called, or always 429s.
struct FakeUpstream {
    rate_limited: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn send(&self, call: &UpstreamCall<'_>) -> Result<Value, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.rate_limited {
            return Err(UpstreamError::RateLimited);
        }
        if call.url.ends_with("/chat/completions") {
            Ok(json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]}))
        } else {
            Ok(json!({"choices": [{"text": " hello\n"}]}))
        }
    }

    async fn check_credential(&self, _: &str, _: &SecretString) -> Result<(), UpstreamError> {
        Ok(())
    }
}

struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _: Duration) {}
}

struct Relay {
    base: String,
    upstream: Arc<FakeUpstream>,
    http: reqwest::Client,
}

async fn spawn_relay(rate_limited: bool, expose_error_details: bool) -> Relay {
    let config = Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        log_level: tracing::Level::INFO,
        scenarios_path: "./scenarios.json".into(),
        upstream_base_url: "http://upstream.invalid/v1".to_string(),
        upstream_timeout: Duration::from_secs(5),
        retry_max_attempts: 3,
        retry_base_delay: Duration::from_millis(10),
        expose_error_details,
    };
    let scenarios = ScenarioTable::from_json(SCENARIOS, |name| {
        (name != "EFL_KEY_B").then(|| format!("secret-{}", name))
    })
    .unwrap();
    let upstream = Arc::new(FakeUpstream {
        rate_limited,
        calls: AtomicUsize::new(0),
    });
    let state = Arc::new(AppState {
        config: Arc::new(config),
        scenarios: Arc::new(scenarios),
        upstream: upstream.clone(),
        sleeper: Arc::new(NoSleep),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });

    Relay {
        base: format!("http://{}", addr),
        upstream,
        http: reqwest::Client::new(),
    }
}

fn turn_body(scenario_id: &str) -> Value {
    json!({
        "messages": [{"role": "user", "content": "What is this?"}],
        "scenario_id": scenario_id,
        "temperature": 0.9
    })
}

#[tokio::test]
async fn test_chat_returns_canonical_reply() {
    let relay = spawn_relay(false, false).await;

    let response = relay
        .http
        .post(format!("{}/chat", relay.base))
        .json(&turn_body("a-consumerism-efl"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]})
    );
}

#[tokio::test]
async fn test_text_scenario_has_same_response_shape() {
    let relay = spawn_relay(false, false).await;

    let body: Value = relay
        .http
        .post(format!("{}/chat", relay.base))
        .json(&turn_body("a-consumerism-std"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        body,
        json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]})
    );
}

#[tokio::test]
async fn test_non_post_is_rejected() {
    let relay = spawn_relay(false, false).await;

    let response = relay
        .http
        .get(format!("{}/chat", relay.base))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 405);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Method Not Allowed");
    assert_eq!(relay.upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let relay = spawn_relay(false, false).await;

    let response = relay
        .http
        .post(format!("{}/chat", relay.base))
        .header("content-type", "application/json")
        .body(r#"{"messages": "not a list"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["details"].is_string());
    assert_eq!(relay.upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unmapped_scenario_is_server_error_without_upstream_call() {
    let relay = spawn_relay(false, false).await;

    let response = relay
        .http
        .post(format!("{}/chat", relay.base))
        .json(&turn_body("c-unknown-efl"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": SAFE_ERROR_MESSAGE}));
    assert_eq!(relay.upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_credential_is_server_error() {
    let relay = spawn_relay(false, true).await;

    let response = relay
        .http
        .post(format!("{}/chat", relay.base))
        .json(&turn_body("b-consumerism-efl"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], SAFE_ERROR_MESSAGE);
    assert!(body["details"].as_str().unwrap().contains("EFL_KEY_B"));
    assert_eq!(relay.upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rate_limit_exhaustion_is_server_error() {
    let relay = spawn_relay(true, false).await;

    let response = relay
        .http
        .post(format!("{}/chat", relay.base))
        .json(&turn_body("a-consumerism-efl"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], SAFE_ERROR_MESSAGE);
    assert!(body.get("details").is_none());
    assert_eq!(relay.upstream.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_credentials_endpoint_lists_every_variable() {
    let relay = spawn_relay(false, false).await;

    let body: Value = relay
        .http
        .get(format!("{}/credentials", relay.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        body,
        json!({"results": [
            {"name": "EFL_KEY_A", "base_url": "http://upstream.invalid/v1", "status": "VALID"},
            {"name": "EFL_KEY_B", "base_url": "http://upstream.invalid/v1", "status": "MISSING"},
            {"name": "STD_KEY_A", "base_url": "http://upstream.invalid/v1", "status": "VALID"}
        ]})
    );
}
