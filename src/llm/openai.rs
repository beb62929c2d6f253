//! OpenAI-compatible Chat Completions client (function tools, bearer auth).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{
    ChatMessage, FinishReason, LanguageModel, Role, ToolCall, ToolCompletionRequest,
    ToolCompletionResponse, status_error,
};
use crate::errors::LlmError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatModel {
    client: Client,
    provider: String,
    token: SecretString,
    model: String,
    base_url: String,
    account_id: Option<String>,
}

impl OpenAiChatModel {
    pub fn new(
        provider: impl Into<String>,
        token: SecretString,
        model: impl Into<String>,
        base_url: Option<String>,
    ) -> Result<Self, LlmError> {
        let provider = provider.into();
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: provider.clone(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            provider,
            token,
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            account_id: None,
        })
    }

    /// Send `chatgpt-account-id` with every request.
    pub fn with_account_id(mut self, account_id: Option<String>) -> Self {
        self.account_id = account_id;
        self
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn to_wire_messages(system: &str, messages: &[ChatMessage]) -> Vec<WireMessage> {
    let mut out = vec![WireMessage {
        role: "system".to_string(),
        content: Some(system.to_string()),
        tool_call_id: None,
        tool_calls: None,
    }];
    for msg in messages {
        let wire = match msg.role {
            Role::User => WireMessage {
                role: "user".to_string(),
                content: Some(msg.content.clone()),
                tool_call_id: None,
                tool_calls: None,
            },
            Role::Assistant => WireMessage {
                role: "assistant".to_string(),
                content: (!msg.content.is_empty()).then(|| msg.content.clone()),
                tool_call_id: None,
                tool_calls: (!msg.tool_calls.is_empty()).then(|| {
                    msg.tool_calls
                        .iter()
                        .map(|c| WireToolCall {
                            id: c.id.clone(),
                            call_type: function_type(),
                            function: WireFunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.to_string(),
                            },
                        })
                        .collect()
                }),
            },
            Role::Tool => WireMessage {
                role: "tool".to_string(),
                content: Some(msg.content.clone()),
                tool_call_id: msg.tool_call_id.clone(),
                tool_calls: None,
            },
        };
        out.push(wire);
    }
    out
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: to_wire_messages(&request.system, &request.messages),
            max_completion_tokens: request.max_tokens,
            tools: request
                .tools
                .into_iter()
                .map(|t| WireTool {
                    tool_type: "function",
                    function: WireFunction {
                        name: t.name,
                        description: t.description,
                        parameters: t.parameters,
                    },
                })
                .collect(),
        };

        let url = self.url();
        tracing::debug!(url = %url, provider = %self.provider, model = %self.model, "Sending chat completion request");

        let mut builder = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.token.expose_secret()),
            )
            .header("Content-Type", "application/json");
        if let Some(account_id) = &self.account_id {
            builder = builder.header("chatgpt-account-id", account_id);
        }

        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider.clone(),
            reason: format!("Failed to read response body: {}", e),
        })?;
        tracing::debug!(status = %status, provider = %self.provider, "Chat completion response");

        if !status.is_success() {
            return Err(status_error(&self.provider, status.as_u16(), &text));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: format!("JSON parse error: {}", e),
            })?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: "No choices in response".to_string(),
            })?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments));
                ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("tool_calls") => FinishReason::ToolUse,
            Some("length") => FinishReason::Length,
            _ if !tool_calls.is_empty() => FinishReason::ToolUse,
            _ => FinishReason::Unknown,
        };
        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(ToolCompletionResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason,
            input_tokens,
            output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn request() -> ToolCompletionRequest {
        ToolCompletionRequest {
            system: "system prompt".into(),
            messages: vec![
                ChatMessage::user("hello"),
                ChatMessage::assistant(
                    None,
                    vec![ToolCall {
                        id: "call_1".into(),
                        name: "bash".into(),
                        arguments: json!({"command": "ls"}),
                    }],
                ),
                ChatMessage::tool_result("call_1", "README.md", false),
            ],
            tools: Vec::new(),
            max_tokens: 256,
        }
    }

    #[test]
    fn test_wire_messages_start_with_system_and_encode_arguments() {
        let wire = to_wire_messages("sys", &request().messages);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[2].role, "assistant");
        assert!(wire[2].content.is_none());
        let calls = wire[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"command":"ls"}"#);
        assert_eq!(wire[3].role, "tool");
        assert_eq!(wire[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_complete_with_tools_sends_bearer_and_account_id() {
        let seen: Arc<Mutex<Option<(HeaderMap, Value)>>> = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let app = Router::new().route(
            "/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some((headers, body));
                    Json(json!({
                        "choices": [{
                            "message": {
                                "role": "assistant",
                                "content": null,
                                "tool_calls": [{
                                    "id": "call_9",
                                    "type": "function",
                                    "function": {"name": "read", "arguments": "{\"path\":\"a.rs\"}"}
                                }]
                            },
                            "finish_reason": "tool_calls"
                        }],
                        "usage": {"prompt_tokens": 30, "completion_tokens": 5}
                    }))
                }
            }),
        );
        let base = serve(app).await;
        let model = OpenAiChatModel::new("codex", SecretString::from("at-123"), "gpt-test", Some(base))
            .unwrap()
            .with_account_id(Some("acct-7".into()));

        let response = model.complete_with_tools(request()).await.unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.finish_reason, FinishReason::ToolUse);
        assert_eq!(response.tool_calls[0].id, "call_9");
        assert_eq!(response.tool_calls[0].arguments["path"], "a.rs");
        assert_eq!(response.input_tokens, 30);
        assert_eq!(response.output_tokens, 5);

        let (headers, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(headers["authorization"], "Bearer at-123");
        assert_eq!(headers["chatgpt-account-id"], "acct-7");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["model"], "gpt-test");
    }

    #[tokio::test]
    async fn test_complete_with_tools_surfaces_api_message() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": {"message": "Unknown model"}})),
                )
            }),
        );
        let base = serve(app).await;
        let model =
            OpenAiChatModel::new("openai", SecretString::from("k"), "nope", Some(base)).unwrap();
        match model.complete_with_tools(request()).await.unwrap_err() {
            LlmError::Api {
                status, message, ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Unknown model");
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }
}
