//! LaTeX 编译：统一的 Compiler 契约，本地工具链与远程编译服务两种实现
//!
//! 编译失败（success=false）进入修复循环；compile 返回 Err 表示编译器本身不可用，不再修复。

pub mod local;
pub mod log;
pub mod remote;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CompilerSection;
use crate::core::PaperError;

pub use local::LocalCompiler;
pub use log::extract_errors;
pub use remote::RemoteCompiler;

/// 单次编译结果（不持久化）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileResult {
    pub success: bool,
    pub artifact: Option<Vec<u8>>,
    pub error: Option<String>,
    pub raw_log: String,
    pub extracted_errors: String,
}

impl CompileResult {
    pub fn succeeded(artifact: Vec<u8>, raw_log: String) -> Self {
        Self {
            success: true,
            artifact: Some(artifact),
            error: None,
            raw_log,
            extracted_errors: String::new(),
        }
    }

    /// 失败结果，错误摘要由 raw_log 精简得到
    pub fn failed(error: impl Into<String>, raw_log: String) -> Self {
        let extracted_errors = extract_errors(&raw_log);
        Self {
            success: false,
            artifact: None,
            error: Some(error.into()),
            raw_log,
            extracted_errors,
        }
    }

    /// 交给修复子 Agent 的输入：优先错误摘要，没有时用完整日志
    pub fn repair_input(&self) -> &str {
        if self.extracted_errors.is_empty() {
            &self.raw_log
        } else {
            &self.extracted_errors
        }
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown")
    }
}

#[async_trait]
pub trait Compiler: Send + Sync {
    /// 编译 files（相对路径 -> 内容），entry 为入口文件
    async fn compile(
        &self,
        files: &BTreeMap<String, String>,
        entry: &str,
    ) -> Result<CompileResult, PaperError>;
}

/// 按 [compiler] 配置选择实现
pub fn create_compiler(cfg: &CompilerSection) -> Result<Arc<dyn Compiler>, PaperError> {
    match cfg.kind.to_lowercase().as_str() {
        "remote" => {
            let endpoint = cfg.remote.endpoint.clone().ok_or_else(|| {
                PaperError::Config("compiler.remote.endpoint is required for the remote compiler".into())
            })?;
            tracing::info!(%endpoint, "Using remote LaTeX compiler");
            Ok(Arc::new(RemoteCompiler::new(
                endpoint,
                cfg.remote.api_key.clone().unwrap_or_default(),
                cfg.remote.timeout_secs,
            )?))
        }
        "local" => {
            tracing::info!(engine = %cfg.engine, "Using local LaTeX toolchain");
            Ok(Arc::new(LocalCompiler::from_config(cfg)))
        }
        other => Err(PaperError::Config(format!("unknown compiler kind: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_extracts_errors() {
        let r = CompileResult::failed("xelatex pass 1 failed", "! Bad\nl.3 x".into());
        assert!(!r.success);
        assert_eq!(r.extracted_errors, "! Bad\nl.3 x");
        assert_eq!(r.repair_input(), "! Bad\nl.3 x");
        assert_eq!(r.error_message(), "xelatex pass 1 failed");
    }

    #[test]
    fn test_create_compiler_by_kind() {
        let mut cfg = CompilerSection::default();
        assert!(create_compiler(&cfg).is_ok());

        cfg.kind = "remote".into();
        assert!(matches!(create_compiler(&cfg), Err(PaperError::Config(_))));
        cfg.remote.endpoint = Some("http://localhost:9/compile".into());
        assert!(create_compiler(&cfg).is_ok());

        cfg.kind = "cloud".into();
        assert!(create_compiler(&cfg).is_err());
    }
}
