//! 流水线构建器：统一的 PipelineService 初始化逻辑
//!
//! CLI 与测试共用同一套装配；任何组件都可以在 build 前替换（Mock LLM、假编译器、内存存储）。

use std::sync::Arc;

use crate::agents::PipelineAgents;
use crate::compiler::{create_compiler, Compiler};
use crate::config::AppConfig;
use crate::core::{PaperArchive, PaperError, PipelineService, PipelineSettings, SessionStore};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::storage::{BlobStore, LocalBlobStore, MemoryRecordStore, PaperRecordStore, SqliteRecordStore};

/// database_url 取这个值时使用内存记录存储
const MEMORY_DATABASE: &str = "memory";

pub struct PipelineBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    compiler: Option<Arc<dyn Compiler>>,
    blobs: Option<Arc<dyn BlobStore>>,
    records: Option<Arc<dyn PaperRecordStore>>,
    agents: Option<PipelineAgents>,
    sessions: Option<SessionStore>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            compiler: None,
            blobs: None,
            records: None,
            agents: None,
            sessions: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_record_store(mut self, records: Arc<dyn PaperRecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// 整体替换 Agent（设置后 with_llm 只影响不到 Agent）
    pub fn with_agents(mut self, agents: PipelineAgents) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 构建 LLM 客户端
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        self.llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config))
    }

    /// 构建对象存储：默认落在 blob_root（或 `<data_dir>/blobs`）
    pub fn build_blob_store(&self) -> Arc<dyn BlobStore> {
        if let Some(blobs) = &self.blobs {
            return Arc::clone(blobs);
        }
        Arc::new(LocalBlobStore::new(
            self.config.blob_root(),
            self.config.storage.public_base_url.clone(),
        ))
    }

    /// 构建论文记录存储：默认 SQLite，`memory` 时用内存实现
    pub async fn build_record_store(&self) -> Result<Arc<dyn PaperRecordStore>, PaperError> {
        if let Some(records) = &self.records {
            return Ok(Arc::clone(records));
        }
        if self.config.storage.database_url.as_deref() == Some(MEMORY_DATABASE) {
            tracing::warn!("Using in-memory paper records, nothing survives a restart");
            return Ok(Arc::new(MemoryRecordStore::new()));
        }
        if self.config.storage.database_url.is_none() {
            tokio::fs::create_dir_all(&self.config.app.data_dir).await?;
        }
        let url = self.config.database_url();
        tracing::info!(database_url = %url, "Opening paper records");
        Ok(Arc::new(SqliteRecordStore::connect(&url).await?))
    }

    /// 组装完整的 PipelineService
    pub async fn build(self) -> Result<PipelineService, PaperError> {
        let compiler = match &self.compiler {
            Some(compiler) => Arc::clone(compiler),
            None => create_compiler(&self.config.compiler)?,
        };
        let agents = match &self.agents {
            Some(agents) => agents.clone(),
            None => PipelineAgents::from_config(self.build_llm(), &self.config.paper),
        };
        let archive = PaperArchive::new(self.build_blob_store(), self.build_record_store().await?);
        let sessions = self.sessions.clone().unwrap_or_default();
        let settings = PipelineSettings::from(&self.config.paper);

        Ok(PipelineService::new(agents, compiler, sessions, archive, settings))
    }
}

/// 便捷函数：加载配置（失败时用默认值）并创建 PipelineBuilder
pub fn create_pipeline_builder(config_path: Option<std::path::PathBuf>) -> PipelineBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    PipelineBuilder::new(config)
}
