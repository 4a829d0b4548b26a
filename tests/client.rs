use relay::config::BatchDefaults;
use relay::{BatchConfig, ChatClient, ChatMessage, Dispatcher, GenerateOptions, OllamaClient, RelayError, Role, Settings};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, api_key: Option<&str>) -> OllamaClient {
    let settings = Settings {
        base_url: server.uri(),
        api_key: api_key.map(str::to_string),
        model: Some("llama3".to_string()),
        batch: BatchDefaults::default(),
    };
    OllamaClient::new(&settings, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn lists_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "llama3:latest", "size": 4661224676u64, "modified_at": "2024-05-01T10:00:00Z"},
                {"name": "mistral:7b", "size": 4109865159u64, "modified_at": "2024-04-01T10:00:00Z"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let models = client_for(&server, Some("secret")).list_models().await.unwrap();

    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "llama3:latest");
    assert!(models[0].matches("llama3"));
    assert_eq!(models[1].size, 4109865159);
}

#[tokio::test]
async fn list_models_auth_failure_is_connectivity_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let err = client_for(&server, None).list_models().await.unwrap_err();
    assert!(matches!(err, RelayError::Connectivity(_)));
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn complete_posts_generate_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "model": "llama3",
            "system": "be brief",
            "prompt": "Why is the sky blue?",
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "response": "Rayleigh scattering.",
            "done": true,
            "total_duration": 2_500_000_000u64
        })))
        .expect(1)
        .mount(&server)
        .await;

    let options = GenerateOptions::new("llama3").with_system_prompt(Some("be brief".into()));
    let completion = client_for(&server, Some("secret"))
        .complete("Why is the sky blue?", &options)
        .await
        .unwrap();

    assert_eq!(completion.response, "Rayleigh scattering.");
    assert_eq!(completion.server_duration(), Some(Duration::from_millis(2500)));
    assert_eq!(completion.raw["done"], true);
}

#[tokio::test]
async fn non_success_status_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(2000)))
        .mount(&server)
        .await;

    let err = client_for(&server, None)
        .complete("hi", &GenerateOptions::new("llama3"))
        .await
        .unwrap_err();

    match err {
        RelayError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message.len(), 503);
            assert!(message.ends_with("..."));
        }
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_response_field_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"model": "llama3"})))
        .mount(&server)
        .await;

    let err = client_for(&server, None)
        .complete("hi", &GenerateOptions::new("llama3"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InvalidResponse { .. }));
}

#[tokio::test]
async fn chat_sends_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3",
            "stream": false,
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "hi there"},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hello")];
    let reply = client_for(&server, None)
        .chat(&messages, &GenerateOptions::new("llama3"))
        .await
        .unwrap();

    assert_eq!(reply.message.role, Role::Assistant);
    assert_eq!(reply.message.content, "hi there");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_over_http_keeps_order_and_captures_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3:latest", "size": 1}]
        })))
        .mount(&server)
        .await;
    for prompt in ["A", "C"] {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "prompt": prompt })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "response": format!("ok-{}", prompt) }))
                    .set_delay(Duration::from_millis(if prompt == "A" { 100 } else { 0 })),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "prompt": "B" })))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client: Arc<dyn ChatClient> = Arc::new(client_for(&server, None));
    let config = BatchConfig::new("llama3")
        .with_max_concurrency(3)
        .with_continue_on_error(true);
    let outcome = Dispatcher::new(client, config)
        .unwrap()
        .run(&["A".to_string(), "B".to_string(), "C".to_string()])
        .await
        .unwrap();

    let responses: Vec<Option<&str>> = outcome.results.iter().map(|r| r.response()).collect();
    assert_eq!(responses, vec![Some("ok-A"), None, Some("ok-C")]);
    assert_eq!(
        outcome.results[1].error(),
        Some("API returned status 503: overloaded")
    );
}
