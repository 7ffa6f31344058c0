//! 远程编译服务客户端
//!
//! POST {files, entry}，响应 {success, pdf_base64, error, log, errors}。
//! 非 2xx 视为编译失败；连不上或超时视为编译器异常。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::compiler::{extract_errors, CompileResult, Compiler};
use crate::core::PaperError;

pub struct RemoteCompiler {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct CompileRequest<'a> {
    files: &'a BTreeMap<String, String>,
    entry: &'a str,
}

/// 编译服务的响应体
#[derive(Debug, Default, Deserialize)]
pub struct CompileResponse {
    #[serde(default)]
    pub success: bool,
    pub pdf_base64: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub errors: String,
}

impl RemoteCompiler {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self, PaperError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PaperError::Compile(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

/// 把服务响应转换为 CompileResult；服务没给错误摘要时在本地按同一算法精简
pub fn parse_response(resp: CompileResponse) -> CompileResult {
    let artifact = match resp.pdf_base64.as_deref().filter(|s| !s.is_empty()) {
        Some(b64) => match STANDARD.decode(b64) {
            Ok(bytes) => Some(bytes),
            Err(e) => return CompileResult::failed(format!("invalid pdf_base64 in response: {e}"), resp.log),
        },
        None => None,
    };

    match (resp.success, artifact) {
        (true, Some(pdf)) => CompileResult::succeeded(pdf, resp.log),
        (true, None) => CompileResult::failed("PDF file not generated", resp.log),
        (false, _) => {
            let extracted_errors = if resp.errors.is_empty() {
                extract_errors(&resp.log)
            } else {
                resp.errors
            };
            CompileResult {
                success: false,
                artifact: None,
                error: Some(resp.error.unwrap_or_else(|| "remote compile failed".to_string())),
                raw_log: resp.log,
                extracted_errors,
            }
        }
    }
}

#[async_trait]
impl Compiler for RemoteCompiler {
    async fn compile(
        &self,
        files: &BTreeMap<String, String>,
        entry: &str,
    ) -> Result<CompileResult, PaperError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&CompileRequest { files, entry })
            .send()
            .await
            .map_err(|e| PaperError::Compile(format!("remote compiler unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "remote compile returned an error status");
            return Ok(CompileResult::failed(
                format!("Remote compile failed: HTTP {}", status.as_u16()),
                body,
            ));
        }

        let body: CompileResponse = response
            .json()
            .await
            .map_err(|e| PaperError::Compile(format!("invalid remote compiler response: {e}")))?;
        Ok(parse_response(body))
    }
}
