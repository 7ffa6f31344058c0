//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, OPENAI_BASE_URL};
pub use traits::{
    AssistantTurn, CompletionOptions, LlmClient, LlmError, ToolCallRequest, ToolHandler, ToolSpec,
};

use crate::config::AppConfig;

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
///
/// 没有任何可用 Key 或 provider 为 mock 时退回 MockLlmClient，便于离线跑通流程。
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.request_timeout_secs;
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok() || cfg.llm.api_key.is_some();

    let client = match provider.as_str() {
        "mock" => None,
        "deepseek" if has_deepseek_key || has_openai_key => {
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Some(OpenAiClient::deepseek(Some(&cfg.llm.model), timeout))
        }
        _ if has_openai_key => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Some(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                cfg.llm.api_key.as_deref(),
                timeout,
            ))
        }
        _ => None,
    };

    match client {
        Some(Ok(client)) => {
            Arc::new(client.with_sampling(cfg.llm.temperature, cfg.llm.max_tokens))
        }
        Some(Err(e)) => {
            tracing::warn!("LLM client init failed ({}), using Mock LLM", e);
            Arc::new(MockLlmClient::new())
        }
        None => {
            tracing::warn!("No API key set or provider is mock, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}
