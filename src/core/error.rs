//! 论文生成错误类型
//!
//! Agent 失败、编译异常、存储失败、状态机违规等统一为 PaperError；
//! 由编排器决定是终止（FAILED）还是降级继续（持久化失败）。

use thiserror::Error;

use crate::core::PaperStatus;
use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum PaperError {
    /// Agent 内部失败（消息原样展示给调用方）
    #[error("{0}")]
    Agent(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 编译器调用本身失败（工具链缺失、超时、远程不可达），不进入修复循环
    #[error("compiler error: {0}")]
    Compile(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: PaperStatus, to: PaperStatus },

    #[error("paper not found: {0}")]
    NotFound(String),

    /// 同一会话已有运行中的生成/修订
    #[error("paper is already being processed: {0}")]
    Busy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
