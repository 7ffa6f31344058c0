//! Quill - 多 Agent 学术论文生成服务
//!
//! 模块划分：
//! - **agents**: 研究员、规划师、写手、排版师（含编译修复与用户修订）
//! - **compiler**: LaTeX 编译（本地工具链 / 远程服务）与日志错误提取
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机、会话、中间产物、归档恢复与流水线编排
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 日志初始化
//! - **storage**: 对象存储与论文记录存储
//! - **tools**: 供修复 / 修订使用的 VFS 文件工具
//! - **vfs**: 内存虚拟文件系统

pub mod agents;
pub mod compiler;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod storage;
pub mod tools;
pub mod vfs;

pub use crate::core::{PipelineBuilder, PipelineEvent, PipelineService};
