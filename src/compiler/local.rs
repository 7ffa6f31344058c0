//! 本地 LaTeX 工具链编译
//!
//! 在临时目录中展开文件后依次执行：引擎 pass 1 → 参考文献 → 引擎 pass 2 → 引擎 pass 3。
//! 每一步带超时，超时或无法启动视为编译器异常（Err），退出码非零视为编译失败。

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::compiler::{CompileResult, Compiler};
use crate::config::CompilerSection;
use crate::core::PaperError;
use crate::vfs::is_safe_path;

pub struct LocalCompiler {
    engine: String,
    bibliography: String,
    pass_timeout: Duration,
    bibliography_timeout: Duration,
}

impl LocalCompiler {
    pub fn new(
        engine: impl Into<String>,
        bibliography: impl Into<String>,
        pass_timeout_secs: u64,
        bibliography_timeout_secs: u64,
    ) -> Self {
        Self {
            engine: engine.into(),
            bibliography: bibliography.into(),
            pass_timeout: Duration::from_secs(pass_timeout_secs),
            bibliography_timeout: Duration::from_secs(bibliography_timeout_secs),
        }
    }

    pub fn from_config(cfg: &CompilerSection) -> Self {
        Self::new(
            cfg.engine.clone(),
            cfg.bibliography.clone(),
            cfg.pass_timeout_secs,
            cfg.bibliography_timeout_secs,
        )
    }

    async fn write_files(dir: &Path, files: &BTreeMap<String, String>) -> Result<(), PaperError> {
        for (path, content) in files {
            let full = dir.join(path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full, content).await?;
        }
        Ok(())
    }

    /// 执行一步并把输出追加到 log，返回退出码
    async fn run_step(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        label: &str,
        limit: Duration,
        log: &mut String,
    ) -> Result<i32, PaperError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| PaperError::Compile(format!("{label} timed out after {}s", limit.as_secs())))?
            .map_err(|e| PaperError::Compile(format!("failed to run {program}: {e}")))?;

        log.push_str(&format!("\n=== {label} ===\n"));
        log.push_str(&String::from_utf8_lossy(&output.stdout));
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            log.push_str("\n--- stderr ---\n");
            log.push_str(&stderr);
        }
        let code = output.status.code().unwrap_or(-1);
        tracing::debug!(step = label, code, "compile step finished");
        Ok(code)
    }
}

#[async_trait]
impl Compiler for LocalCompiler {
    async fn compile(
        &self,
        files: &BTreeMap<String, String>,
        entry: &str,
    ) -> Result<CompileResult, PaperError> {
        // 非法路径是内容问题，按编译失败交给修复循环
        if let Some(bad) = files.keys().find(|p| !is_safe_path(p)) {
            let log = format!("! invalid file path: {bad}\nOnly relative paths inside the project are allowed.\n");
            return Ok(CompileResult::failed(format!("invalid file path: {bad}"), log));
        }

        let dir = tempfile::Builder::new().prefix("paper_").tempdir()?;
        Self::write_files(dir.path(), files).await?;

        let stem = entry.strip_suffix(".tex").unwrap_or(entry);
        let engine_args = ["-interaction=nonstopmode", "-halt-on-error", entry];
        let mut log = String::new();

        let label = format!("{} pass 1", self.engine);
        let code = self
            .run_step(dir.path(), &self.engine, &engine_args, &label, self.pass_timeout, &mut log)
            .await?;
        if code != 0 {
            return Ok(CompileResult::failed(format!("{label} failed (exit code {code})"), log));
        }

        let bib = self.bibliography.clone();
        let code = self
            .run_step(dir.path(), &bib, &[stem], &bib, self.bibliography_timeout, &mut log)
            .await?;
        // 参考文献工具的警告退出码为 1，只有大于 1 才算失败
        if code > 1 {
            return Ok(CompileResult::failed(format!("{bib} failed (exit code {code})"), log));
        }

        for pass in [2, 3] {
            let label = format!("{} pass {pass}", self.engine);
            let code = self
                .run_step(dir.path(), &self.engine, &engine_args, &label, self.pass_timeout, &mut log)
                .await?;
            if code != 0 {
                return Ok(CompileResult::failed(format!("{label} failed (exit code {code})"), log));
            }
        }

        let pdf_path = dir.path().join(format!("{stem}.pdf"));
        match tokio::fs::read(&pdf_path).await {
            Ok(pdf) => Ok(CompileResult::succeeded(pdf, log)),
            Err(_) => Ok(CompileResult::failed("PDF file not generated", log)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        files.insert("main.tex".to_string(), "\\documentclass{article}".to_string());
        files.insert("chapters/01_a.tex".to_string(), "x".to_string());
        files
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_engine_is_a_compile_failure() {
        let compiler = LocalCompiler::new("false", "true", 10, 10);
        let result = compiler.compile(&files(), "main.tex").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("false pass 1 failed (exit code 1)"));
        assert!(result.raw_log.contains("=== false pass 1 ==="));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_all_passes_without_pdf() {
        let compiler = LocalCompiler::new("true", "true", 10, 10);
        let result = compiler.compile(&files(), "main.tex").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("PDF file not generated"));
        assert!(result.raw_log.contains("=== true pass 3 ==="));
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_an_exception() {
        let compiler = LocalCompiler::new("quill-no-such-engine", "true", 10, 10);
        let err = compiler.compile(&files(), "main.tex").await.unwrap_err();
        assert!(matches!(err, PaperError::Compile(msg) if msg.contains("failed to run")));
    }

    #[tokio::test]
    async fn test_escaping_path_is_a_repairable_failure() {
        let compiler = LocalCompiler::new("quill-no-such-engine", "true", 10, 10);
        let mut bad = files();
        bad.insert("../evil.tex".to_string(), String::new());
        let result = compiler.compile(&bad, "main.tex").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("invalid file path: ../evil.tex"));
        assert!(result.repair_input().contains("! invalid file path: ../evil.tex"));
    }
}
