//! Local-model client speaking the Ollama HTTP API: `/api/chat` for
//! generations (with tool schemas and the `think` flag) and `/api/embed` for
//! vectors.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ChatRequest, ChatResponse, LlmProvider, ProviderError, Role, ToolCall};

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    embed_model: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, embed_model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            embed_model: embed_model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_chat_body(req);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %req.model, tools = req.tools.len(), think = req.think, "chat request");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(connection_error)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_chat_response(api_resp))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({
            "model": self.embed_model,
            "input": texts,
        });

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(connection_error)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiEmbedResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if api_resp.embeddings.len() != texts.len() {
            return Err(ProviderError::Parse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                api_resp.embeddings.len()
            )));
        }
        Ok(api_resp.embeddings)
    }
}

/// Surface connection errors as Unavailable so callers can fall back.
fn connection_error(e: reqwest::Error) -> ProviderError {
    if e.is_connect() || e.is_timeout() {
        ProviderError::Unavailable(e.to_string())
    } else {
        ProviderError::Http(e)
    }
}

fn build_chat_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
                Role::Tool => "tool",
            };
            serde_json::json!({ "role": role, "content": m.content })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": false,
        "think": req.think,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    },
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

fn parse_chat_response(resp: ApiChatResponse) -> ChatResponse {
    let tool_calls = resp
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall {
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();

    ChatResponse {
        text: resp.message.content,
        tool_calls,
        model: resp.model,
        input_tokens: resp.prompt_eval_count.unwrap_or(0),
        output_tokens: resp.eval_count.unwrap_or(0),
        total_duration_ms: resp.total_duration.unwrap_or(0) / 1_000_000,
    }
}

// API response types (private - deserialization only)

#[derive(Deserialize)]
struct ApiChatResponse {
    model: String,
    message: ApiMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    /// Nanoseconds.
    total_duration: Option<u64>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: String,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiFunctionCall,
}

#[derive(Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct ApiEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, ToolDefinition};

    #[test]
    fn chat_body_includes_tools_in_function_format() {
        let req = ChatRequest::new("qwen3:14b", vec![Message::user("hi")]).with_tools(vec![
            ToolDefinition {
                name: "fetch_url".into(),
                description: "Fetch a URL".into(),
                input_schema: serde_json::json!({"type": "object"}),
            },
        ]);
        let body = build_chat_body(&req);
        assert_eq!(body["tools"][0]["function"]["name"], "fetch_url");
        assert_eq!(body["think"], false);
    }

    #[test]
    fn chat_body_omits_tools_key_when_empty() {
        let req = ChatRequest::new("m", vec![Message::user("hi")]).with_think(true);
        let body = build_chat_body(&req);
        assert!(body.get("tools").is_none());
        assert_eq!(body["think"], true);
    }

    #[test]
    fn response_parse_extracts_tool_calls_and_usage() {
        let raw = serde_json::json!({
            "model": "qwen3:14b",
            "message": {
                "content": "",
                "tool_calls": [
                    {"function": {"name": "fetch_url", "arguments": {"url": "https://example.com"}}}
                ]
            },
            "prompt_eval_count": 120,
            "eval_count": 30,
            "total_duration": 2_500_000_000u64,
        });
        let api: ApiChatResponse = serde_json::from_value(raw).unwrap();
        let resp = parse_chat_response(api);
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "fetch_url");
        assert_eq!(resp.input_tokens, 120);
        assert_eq!(resp.total_duration_ms, 2500);
        assert!(!resp.is_final_text());
    }
}
