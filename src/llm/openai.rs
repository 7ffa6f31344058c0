//! OpenAI 兼容 API 客户端
//!
//! 直接用 reqwest 调用 `{base_url}/chat/completions`，适配 OpenAI、DeepSeek 及任意兼容代理。
//! 非 2xx 响应记日志后按「空输出」处理；连接失败、超时等传输层错误返回 LlmError。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{
    AssistantTurn, CompletionOptions, LlmClient, LlmError, Message, Role, ToolCallRequest,
    ToolSpec,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 HTTP Client、端点、默认模型与采样参数
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: 8192,
            usage: TokenUsage::new(),
        })
    }

    /// DeepSeek 走同一套兼容协议，仅端点与 Key 来源不同
    pub fn deepseek(model: Option<&str>, timeout_secs: u64) -> Result<Self, LlmError> {
        let api_key = std::env::var("DEEPSEEK_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        Self::new(
            Some(DEEPSEEK_BASE_URL),
            model.unwrap_or(DEEPSEEK_CHAT),
            api_key.as_deref(),
            timeout_secs,
        )
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolSpec], options: &CompletionOptions) -> Value {
        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "messages": messages.iter().map(to_wire_message).collect::<Vec<_>>(),
            "temperature": options.temperature.unwrap_or(self.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
        });
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        body
    }

    /// 发送请求；HTTP 非 2xx 返回 Ok(None)，传输错误返回 Err
    async fn send(&self, body: &Value, options: &CompletionOptions) -> Result<Option<Value>, LlmError> {
        let key = options.api_key.as_deref().unwrap_or(&self.api_key);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %preview(&text), "LLM request rejected");
            return Ok(None);
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if let Some(usage) = value.get("usage") {
            self.usage.add(
                usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
            );
        }
        Ok(Some(value))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Option<String>, LlmError> {
        let body = self.request_body(messages, &[], options);
        let Some(value) = self.send(&body, options).await? else {
            return Ok(None);
        };
        Ok(parse_turn(&value).content)
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        options: &CompletionOptions,
    ) -> Result<AssistantTurn, LlmError> {
        let body = self.request_body(messages, tools, options);
        match self.send(&body, options).await? {
            Some(value) => Ok(parse_turn(&value)),
            None => Ok(AssistantTurn::default()),
        }
    }
}

fn to_wire_message(m: &Message) -> Value {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut msg = json!({ "role": role, "content": m.content });
    if !m.tool_calls.is_empty() {
        msg["tool_calls"] = m
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments.to_string() },
                })
            })
            .collect();
    }
    if let Some(id) = &m.tool_call_id {
        msg["tool_call_id"] = json!(id);
    }
    msg
}

/// 取首个 choice 的 content 与 tool_calls；arguments 是 JSON 字符串，解析失败时当作空对象
fn parse_turn(value: &Value) -> AssistantTurn {
    let message = &value["choices"][0]["message"];
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from);
    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .map(|c| ToolCallRequest {
                    id: c["id"].as_str().unwrap_or_default().to_string(),
                    name: c["function"]["name"].as_str().unwrap_or_default().to_string(),
                    arguments: c["function"]["arguments"]
                        .as_str()
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or_else(|| json!({})),
                })
                .collect()
        })
        .unwrap_or_default();
    AssistantTurn { content, tool_calls }
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_turn_with_tool_calls() {
        let value = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "read_file", "arguments": "{\"path\":\"main.tex\"}" }
                    }]
                }
            }]
        });
        let turn = parse_turn(&value);
        assert!(turn.content.is_none());
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "read_file");
        assert_eq!(turn.tool_calls[0].arguments["path"], "main.tex");
    }

    #[test]
    fn test_parse_turn_bad_arguments_become_empty_object() {
        let value = json!({
            "choices": [{ "message": { "content": "hi", "tool_calls": [{
                "id": "c", "function": { "name": "list_files", "arguments": "not json" }
            }]}}]
        });
        let turn = parse_turn(&value);
        assert_eq!(turn.content.as_deref(), Some("hi"));
        assert_eq!(turn.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn test_wire_message_tool_result() {
        let msg = to_wire_message(&Message::tool("call_9", "ok"));
        assert_eq!(msg["role"], "tool");
        assert_eq!(msg["tool_call_id"], "call_9");
    }

    #[test]
    fn test_request_body_uses_option_overrides() {
        let client = OpenAiClient::new(None, "base-model", Some("k"), 5).unwrap();
        let opts = CompletionOptions::default().with_model(Some("override".into()));
        let body = client.request_body(&[Message::user("x")], &[], &opts);
        assert_eq!(body["model"], "override");
        assert!(body.get("tools").is_none());
    }
}
