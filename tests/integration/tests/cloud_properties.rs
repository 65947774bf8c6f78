use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use httpmock::prelude::*;
use relay_ai::{LlmClient, OpenAiClient, OpenAiConfig, RetryPolicy, ToolDefinition};
use relay_orchestrator::Orchestrator;
use relay_provider::{
    AccessTokenCache, AsyncBridge, CloudBackend, ConversationSettings, DirectCloudProvider,
    ErrorClass, OAuthClientCredentials, ProviderConfig, ProviderSelection,
};
use relay_session::ProviderKind;
use relay_tools::{CalculateTool, LocalTool, ToolDispatcher};
use serde_json::{json, Value};

fn no_retries() -> RetryPolicy {
    RetryPolicy {
        max_retries: 0,
        retry_budget_ms: 0,
        jitter: false,
    }
}

fn credentials() -> OAuthClientCredentials {
    OAuthClientCredentials {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        refresh_token: "refresh-token".to_string(),
    }
}

fn openai_text(text: &str) -> Value {
    json!({
        "choices": [{ "message": { "content": text }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8 }
    })
}

struct CountingCalculate {
    calls: Arc<AtomicUsize>,
}

impl LocalTool for CountingCalculate {
    fn definition(&self) -> ToolDefinition {
        CalculateTool.definition()
    }

    fn execute(&self, arguments: &Value) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        CalculateTool.execute(arguments)
    }
}

#[tokio::test]
async fn integration_access_token_is_reused_until_near_expiry() {
    let server = MockServer::start();
    let token = server.mock(|when, then| {
        when.method(POST)
            .path("/token")
            .body_includes("grant_type=refresh_token");
        then.status(200)
            .json_body(json!({ "access_token": "tok-1", "expires_in": 120 }));
    });

    let now = Arc::new(AtomicU64::new(1_000_000));
    let clock = {
        let now = Arc::clone(&now);
        Arc::new(move || now.load(Ordering::SeqCst))
    };
    let cache = AccessTokenCache::with_clock(server.url("/token"), 5_000, clock).expect("cache");

    for _ in 0..3 {
        assert_eq!(cache.get_token(&credentials()).await.expect("token"), "tok-1");
    }
    assert_eq!(token.hits(), 1);

    // 120 s lifetime minus the 60 s safety margin.
    now.fetch_add(59_000, Ordering::SeqCst);
    cache.get_token(&credentials()).await.expect("token");
    assert_eq!(token.hits(), 1);

    now.fetch_add(2_000, Ordering::SeqCst);
    cache.get_token(&credentials()).await.expect("token");
    assert_eq!(token.hits(), 2);
}

#[test]
fn integration_oauth_conversation_shares_one_token() {
    let server = MockServer::start();
    let token = server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .json_body(json!({ "access_token": "tok-1", "expires_in": 3600 }));
    });
    let generate = server.mock(|when, then| {
        when.method(POST)
            .path("/v1beta/models/gemini-test:generateContent")
            .header("authorization", "Bearer tok-1");
        then.status(200).json_body(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "proxied answer" }] },
                "finishReason": "STOP"
            }]
        }));
    });

    let orchestrator = Orchestrator::new(&ProviderConfig {
        selection: ProviderSelection::OAuthProxied {
            credentials: Some(credentials()),
            token_url: server.url("/token"),
            endpoint: server.url("/v1beta"),
            model: "gemini-test".to_string(),
        },
        retry: no_retries(),
        ..ProviderConfig::default()
    });

    assert_eq!(orchestrator.handle("a", "first", None), "proxied answer");
    assert_eq!(orchestrator.handle("b", "second", None), "proxied answer");
    assert_eq!(orchestrator.handle("a", "third", None), "proxied answer");
    assert_eq!(token.hits(), 1);
    assert_eq!(generate.hits(), 3);
    orchestrator.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_handle_works_from_inside_a_runtime() {
    let server = MockServer::start();
    let token = server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .json_body(json!({ "access_token": "tok-1", "expires_in": 3600 }));
    });
    let generate = server.mock(|when, then| {
        when.method(POST)
            .path("/v1beta/models/gemini-test:generateContent")
            .header("authorization", "Bearer tok-1");
        then.status(200).json_body(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "proxied answer" }] },
                "finishReason": "STOP"
            }]
        }));
    });
    let completions = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200).json_body(openai_text("direct answer"));
    });

    let proxied = Orchestrator::new(&ProviderConfig {
        selection: ProviderSelection::OAuthProxied {
            credentials: Some(credentials()),
            token_url: server.url("/token"),
            endpoint: server.url("/v1beta"),
            model: "gemini-test".to_string(),
        },
        retry: no_retries(),
        ..ProviderConfig::default()
    });
    let direct = Orchestrator::new(&ProviderConfig {
        selection: ProviderSelection::DirectCloud {
            backend: CloudBackend::OpenAi,
            api_base: server.url("/v1"),
            api_key: Some("test-key".to_string()),
            model: "gpt-4o".to_string(),
        },
        retry: no_retries(),
        ..ProviderConfig::default()
    });

    for prompt in ["first", "second"] {
        let outcome = proxied.handle_detailed("chat", prompt, None);
        assert_eq!(outcome.text, "proxied answer");
        assert_eq!(outcome.failure, None);
        let outcome = direct.handle_detailed("chat", prompt, None);
        assert_eq!(outcome.text, "direct answer");
        assert_eq!(outcome.failure, None);
    }
    assert_eq!(token.hits(), 1);
    assert_eq!(generate.hits(), 2);
    assert_eq!(completions.hits(), 2);
    assert_eq!(proxied.history("chat").len(), 4);
    assert_eq!(direct.history("chat").len(), 4);
    proxied.shutdown();
    direct.shutdown();
}

#[test]
fn integration_tool_call_round_trips_through_dispatcher() {
    let server = MockServer::start();
    let request_tool = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .body_includes("\"name\":\"calculate\"")
            .body_excludes("\"role\":\"tool\"");
        then.status(200).json_body(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "calculate",
                            "arguments": "{\"expression\":\"(2 + 3) * 4\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }));
    });
    let finalize = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .body_includes("\"role\":\"tool\"")
            .body_includes("(2 + 3) * 4 = 20");
        then.status(200).json_body(openai_text("The result is 20."));
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let tools = ToolDispatcher::builder()
        .register(CountingCalculate {
            calls: Arc::clone(&calls),
        })
        .build();
    let client: Arc<dyn LlmClient> = Arc::new(
        OpenAiClient::new(OpenAiConfig {
            api_base: server.url("/v1"),
            api_key: "test-key".to_string(),
            request_timeout_ms: 5_000,
            retry: no_retries(),
        })
        .expect("client"),
    );
    let provider = DirectCloudProvider::new(
        "openai",
        Ok(client),
        ConversationSettings {
            model: "gpt-4o".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            max_tokens: 256,
            tools: tools.definitions(),
        },
        Arc::new(AsyncBridge::new(1)),
        5_000,
    );
    let orchestrator = Orchestrator::with_provider(Box::new(provider), tools, 20);

    let outcome = orchestrator.handle_detailed("chat", "what is (2 + 3) * 4?", None);
    assert_eq!(outcome.text, "The result is 20.");
    assert_eq!(outcome.answered_by, ProviderKind::DirectCloud);
    assert_eq!(outcome.failure, None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(request_tool.hits(), 1);
    assert_eq!(finalize.hits(), 1);

    let history = orchestrator.history("chat");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text, "The result is 20.");
}

#[test]
fn integration_slow_endpoint_times_out_and_chat_recovers() {
    let server = MockServer::start();
    let mut slow = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200)
            .delay(Duration::from_secs(5))
            .json_body(openai_text("too late"));
    });

    let orchestrator = Orchestrator::new(&ProviderConfig {
        selection: ProviderSelection::DirectCloud {
            backend: CloudBackend::OpenAi,
            api_base: server.url("/v1"),
            api_key: Some("test-key".to_string()),
            model: "gpt-4o".to_string(),
        },
        request_timeout_ms: 300,
        retry: no_retries(),
        ..ProviderConfig::default()
    });

    let started = Instant::now();
    let outcome = orchestrator.handle_detailed("chat", "hello", None);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(outcome.text.starts_with("[timeout]"), "{}", outcome.text);
    assert_eq!(outcome.failure, Some(ErrorClass::Timeout));
    assert!(orchestrator.history("chat").is_empty());

    slow.delete();
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200).json_body(openai_text("back again"));
    });
    assert_eq!(orchestrator.handle("chat", "hello", None), "back again");
    assert_eq!(orchestrator.history("chat").len(), 2);
    orchestrator.shutdown();
}

#[test]
fn integration_upstream_errors_are_rendered_not_masked() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(500).body("boom");
    });
    let orchestrator = Orchestrator::new(&ProviderConfig {
        selection: ProviderSelection::DirectCloud {
            backend: CloudBackend::OpenAi,
            api_base: server.url("/v1"),
            api_key: Some("test-key".to_string()),
            model: "gpt-4o".to_string(),
        },
        retry: no_retries(),
        ..ProviderConfig::default()
    });
    let outcome = orchestrator.handle_detailed("chat", "sqrt(16)", None);
    assert!(outcome.text.starts_with("[upstream_error]"), "{}", outcome.text);
    assert_eq!(outcome.answered_by, ProviderKind::DirectCloud);
    assert!(orchestrator.history("chat").is_empty());
}
