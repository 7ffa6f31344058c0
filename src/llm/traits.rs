//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：
//! - complete：单轮补全，返回文本或空（HTTP 层失败视为空输出，只有传输层错误才返回 Err）
//! - chat_with_tools：单轮带工具的对话，返回助手文本与工具调用请求
//! - complete_with_tools：默认实现的有界工具循环，模型请求工具就执行并回填结果，直到不再请求或轮数耗尽

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::Message;

/// LLM 调用错误（仅传输层；业务层的空输出用 Ok(None) 表示）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// 单次调用的可选参数；None 表示使用客户端默认值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// 覆盖客户端默认 API Key（如论文专用 Key）
    pub api_key: Option<String>,
}

impl CompletionOptions {
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

/// 暴露给模型的工具定义（function calling）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: Value,
}

/// 模型发起的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// 一轮带工具对话的助手输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }
}

/// 工具执行回调：按名字分发，返回给模型看的字符串结果
pub trait ToolHandler {
    fn handle(&mut self, name: &str, arguments: &Value) -> String;
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式补全
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Option<String>, LlmError>;

    /// 单轮带工具对话
    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        options: &CompletionOptions,
    ) -> Result<AssistantTurn, LlmError>;

    /// 有界工具循环：每轮把工具结果作为 Tool 消息回填，max_rounds 耗尽后返回 None
    async fn complete_with_tools(
        &self,
        mut messages: Vec<Message>,
        tools: &[ToolSpec],
        handler: &mut (dyn ToolHandler + Send),
        max_rounds: usize,
        options: &CompletionOptions,
    ) -> Result<Option<String>, LlmError> {
        for round in 0..max_rounds {
            let turn = self.chat_with_tools(&messages, tools, options).await?;
            if turn.tool_calls.is_empty() {
                return Ok(turn.content);
            }
            tracing::debug!(round, calls = turn.tool_calls.len(), "tool round");
            messages.push(Message::assistant_tool_calls(
                turn.content.clone().unwrap_or_default(),
                turn.tool_calls.clone(),
            ));
            for call in &turn.tool_calls {
                let result = handler.handle(&call.name, &call.arguments);
                messages.push(Message::tool(call.id.clone(), result));
            }
        }
        tracing::warn!(max_rounds, "tool loop exhausted its round budget");
        Ok(None)
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
