use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    http::{post_json_with_retry, RetryPolicy},
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, MediaSource, Message,
    MessageRole, RelayAiError, ToolChoice, ToolDefinition,
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// How requests to a generateContent endpoint are authorized.
pub enum GoogleAuth {
    /// Static key sent as the `key` query parameter.
    ApiKey(String),
    /// Short-lived bearer token supplied per call via [`GoogleClient::complete_with_bearer`].
    Bearer,
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// Either an API root (`.../v1beta`) or a full URL containing `:generateContent`,
    /// optionally with a `{model}` placeholder.
    pub api_base: String,
    pub auth: GoogleAuth,
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct GoogleClient {
    client: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleClient {
    pub fn new(config: GoogleConfig) -> Result<Self, RelayAiError> {
        if let GoogleAuth::ApiKey(key) = &config.auth {
            if key.trim().is_empty() {
                return Err(RelayAiError::MissingApiKey);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    /// Client for an endpoint that only accepts OAuth bearer tokens.
    pub fn for_bearer_auth(
        api_base: impl Into<String>,
        request_timeout_ms: u64,
        retry: RetryPolicy,
    ) -> Result<Self, RelayAiError> {
        Self::new(GoogleConfig {
            api_base: api_base.into(),
            auth: GoogleAuth::Bearer,
            request_timeout_ms,
            retry,
        })
    }

    fn generate_content_url(&self, model: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.contains(":generateContent") {
            return base.replace("{model}", model);
        }
        format!("{base}/models/{model}:generateContent")
    }

    /// Sends `request` authorized with `access_token` instead of the configured key.
    pub async fn complete_with_bearer(
        &self,
        request: ChatRequest,
        access_token: &str,
    ) -> Result<ChatResponse, RelayAiError> {
        if access_token.trim().is_empty() {
            return Err(RelayAiError::MissingApiKey);
        }
        let bearer = format!("Bearer {}", access_token.trim());
        self.send(&request, |builder| {
            builder.header(reqwest::header::AUTHORIZATION, bearer.as_str())
        })
        .await
    }

    async fn send<F>(&self, request: &ChatRequest, decorate: F) -> Result<ChatResponse, RelayAiError>
    where
        F: Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    {
        let body = build_generate_content_body(request);
        let url = self.generate_content_url(&request.model);
        tracing::debug!(model = %request.model, messages = request.messages.len(), "google generateContent request");
        let raw = post_json_with_retry(&self.client, &url, &body, self.config.retry, decorate).await?;
        parse_generate_content_response(&raw)
    }
}

#[async_trait]
impl LlmClient for GoogleClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, RelayAiError> {
        match &self.config.auth {
            GoogleAuth::ApiKey(key) => {
                let key = key.trim().to_string();
                self.send(&request, |builder| builder.query(&[("key", key.as_str())]))
                    .await
            }
            GoogleAuth::Bearer => Err(RelayAiError::MissingApiKey),
        }
    }
}

fn build_generate_content_body(request: &ChatRequest) -> Value {
    let system = extract_system_text(&request.messages);
    let mut body = json!({
        "contents": to_google_contents(&request.messages),
    });

    if !system.is_empty() {
        body["systemInstruction"] = json!({
            "parts": [{ "text": system }],
        });
    }

    if !request.tools.is_empty() {
        body["tools"] = json!([{
            "functionDeclarations": request.tools.iter().map(to_google_function_declaration).collect::<Vec<_>>()
        }]);
        if let Some(tool_choice) = request.tool_choice.as_ref() {
            body["toolConfig"] = json!({
                "functionCallingConfig": to_google_function_calling_config(tool_choice),
            });
        }
    }

    if let Some(max_tokens) = request.max_tokens {
        body["generationConfig"] = json!({ "maxOutputTokens": max_tokens });
    }

    body
}

fn extract_system_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|message| message.role == MessageRole::System)
        .map(Message::text_content)
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn to_google_function_declaration(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": strip_additional_properties(&tool.parameters),
    })
}

// generateContent rejects JSON-schema keywords outside its OpenAPI subset.
fn strip_additional_properties(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "additionalProperties")
                .map(|(key, nested)| (key.clone(), strip_additional_properties(nested)))
                .collect(),
        ),
        Value::Array(values) => {
            Value::Array(values.iter().map(strip_additional_properties).collect())
        }
        _ => value.clone(),
    }
}

fn to_google_function_calling_config(tool_choice: &ToolChoice) -> Value {
    match tool_choice {
        ToolChoice::Auto => json!({ "mode": "AUTO" }),
        ToolChoice::None => json!({ "mode": "NONE" }),
    }
}

fn to_google_contents(messages: &[Message]) -> Value {
    Value::Array(
        messages
            .iter()
            .filter_map(|message| match message.role {
                MessageRole::System => None,
                MessageRole::User | MessageRole::Assistant => {
                    let parts = to_google_parts(message);
                    if parts.is_empty() {
                        return None;
                    }
                    let role = if message.role == MessageRole::User {
                        "user"
                    } else {
                        "model"
                    };
                    Some(json!({ "role": role, "parts": parts }))
                }
                MessageRole::Tool => Some(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": message.tool_name.as_deref().unwrap_or("unknown_tool"),
                            "response": {
                                "content": message.text_content(),
                                "is_error": message.is_error,
                            }
                        }
                    }]
                })),
            })
            .collect(),
    )
}

fn to_google_parts(message: &Message) -> Vec<Value> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if !text.trim().is_empty() => Some(json!({ "text": text })),
            ContentBlock::Text { .. } => None,
            ContentBlock::ToolCall {
                name, arguments, ..
            } if message.role == MessageRole::Assistant => Some(json!({
                "functionCall": {
                    "name": name,
                    "args": arguments,
                }
            })),
            ContentBlock::ToolCall { .. } => None,
            ContentBlock::Image {
                source: MediaSource::Base64 { mime_type, data },
            } => Some(json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": data,
                }
            })),
        })
        .collect()
}

fn parse_generate_content_response(raw: &str) -> Result<ChatResponse, RelayAiError> {
    let parsed: GenerateContentResponse = serde_json::from_str(raw)?;
    let candidate = parsed
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .ok_or_else(|| {
            RelayAiError::InvalidResponse("response contained no candidates".to_string())
        })?;

    let parts = candidate
        .content
        .and_then(|content| content.parts)
        .unwrap_or_default();
    let mut blocks = Vec::new();
    for (index, part) in parts.into_iter().enumerate() {
        if let Some(text) = part.text {
            if !text.trim().is_empty() {
                blocks.push(ContentBlock::Text { text });
            }
        }
        if let Some(function_call) = part.function_call {
            blocks.push(ContentBlock::ToolCall {
                id: format!("google_call_{}", index + 1),
                name: function_call.name,
                arguments: function_call.args.unwrap_or_else(|| json!({})),
            });
        }
    }

    let usage = parsed
        .usage_metadata
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            total_tokens: usage.total_token_count.unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        message: Message::assistant_blocks(blocks),
        finish_reason: candidate.finish_reason,
        usage,
    })
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<GenerateContentCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GenerateContentUsage>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentCandidate {
    content: Option<GenerateContentContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentContent {
    parts: Option<Vec<GenerateContentPart>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentPart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<GenerateContentFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentFunctionCall {
    name: String,
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}
