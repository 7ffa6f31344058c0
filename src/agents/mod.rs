//! 内容 Agent：研究员、规划师、写手、排版师
//!
//! 每个 Agent 对 PaperSession 做一次变换，并以惰性事件流汇报进度：
//! 只在 yield 点挂起，调用方拉取下一条事件时才继续执行。
//! `AgentEvent::Result` 只在阶段边界内部使用，编排器不会转发给外部调用方。

pub mod formatter;
pub mod planner;
pub mod researcher;
pub mod writer;

use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;

use crate::config::PaperSection;
use crate::core::{FilePlan, LiteratureItem, PaperError, PaperSession, Stage};
use crate::llm::{CompletionOptions, LlmClient, LlmError, Message, ToolHandler, ToolSpec};

pub use formatter::{strip_code_fences, FormatterAgent};
pub use planner::PlannerAgent;
pub use researcher::ResearcherAgent;
pub use writer::WriterAgent;

/// Agent 事件流（借用 Agent 与会话，生命周期与两者一致）
pub type AgentStream<'a> = Pin<Box<dyn Stream<Item = Result<AgentEvent, PaperError>> + Send + 'a>>;

/// 把 try_stream! 生成的流装箱为 AgentStream（同时固定错误类型）
pub fn agent_stream<'a, S>(stream: S) -> AgentStream<'a>
where
    S: Stream<Item = Result<AgentEvent, PaperError>> + Send + 'a,
{
    Box::pin(stream)
}

/// Agent 产出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Progress { stage: Stage, detail: String },
    Result(AgentOutput),
}

impl AgentEvent {
    pub fn progress(stage: Stage, detail: impl Into<String>) -> Self {
        Self::Progress {
            stage,
            detail: detail.into(),
        }
    }
}

/// 各阶段的结果载荷
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Literature(Vec<LiteratureItem>),
    Plan(FilePlan),
    /// 已写好的章节路径
    Chapters(Vec<String>),
    /// VFS 中的文件（排版）或被改动的文件（修复 / 修订）
    Files(Vec<String>),
}

/// 流水线中的一个内容阶段
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    fn run<'a>(&'a self, session: &'a mut PaperSession) -> AgentStream<'a>;
}

/// 基于工具调用的文档修改：编译修复与用户修订共用
pub trait DocumentRepair: Send + Sync {
    /// 根据精简后的编译错误修复 VFS
    fn repair<'a>(&'a self, session: &'a mut PaperSession, error_log: &'a str) -> AgentStream<'a>;

    /// 按用户的自由文本指令修改 VFS
    fn revise<'a>(&'a self, session: &'a mut PaperSession, instruction: &'a str)
        -> AgentStream<'a>;
}

/// Agent 共用的 LLM 调用封装：自动带上该 Agent 的模型与 API Key
#[derive(Clone)]
pub struct AgentLlm {
    llm: Arc<dyn LlmClient>,
    options: CompletionOptions,
}

impl AgentLlm {
    pub fn new(llm: Arc<dyn LlmClient>, model: Option<String>, api_key: Option<String>) -> Self {
        Self {
            llm,
            options: CompletionOptions::default()
                .with_model(model)
                .with_api_key(api_key),
        }
    }

    pub fn options(&self) -> &CompletionOptions {
        &self.options
    }

    /// 单条 user 消息的补全
    pub async fn ask(&self, prompt: impl Into<String>) -> Result<Option<String>, LlmError> {
        self.llm
            .complete(&[Message::user(prompt)], &self.options)
            .await
    }

    pub async fn complete_with_tools(
        &self,
        messages: Vec<Message>,
        tools: &[ToolSpec],
        handler: &mut (dyn ToolHandler + Send),
        max_rounds: usize,
    ) -> Result<Option<String>, LlmError> {
        self.llm
            .complete_with_tools(messages, tools, handler, max_rounds, &self.options)
            .await
    }
}

/// 一条流水线所需的全部 Agent（可整体替换，便于测试注入）
#[derive(Clone)]
pub struct PipelineAgents {
    pub researcher: Arc<dyn Agent>,
    pub planner: Arc<dyn Agent>,
    pub writer: Arc<dyn Agent>,
    pub formatter: Arc<dyn Agent>,
    pub repairer: Arc<dyn DocumentRepair>,
}

impl PipelineAgents {
    /// 按 [paper] 配置为每个 Agent 绑定模型与论文专用 Key
    pub fn from_config(llm: Arc<dyn LlmClient>, paper: &PaperSection) -> Self {
        let agent_llm = |model: &Option<String>| {
            AgentLlm::new(Arc::clone(&llm), model.clone(), paper.api_key.clone())
        };
        let formatter = Arc::new(FormatterAgent::new(
            agent_llm(&paper.models.formatter),
            paper.entry.clone(),
            paper.repair_tool_rounds,
            paper.revise_tool_rounds,
        ));
        Self {
            researcher: Arc::new(ResearcherAgent::new(
                agent_llm(&paper.models.researcher),
                paper.literature_count.clone(),
            )),
            planner: Arc::new(PlannerAgent::new(agent_llm(&paper.models.planner))),
            writer: Arc::new(WriterAgent::new(
                agent_llm(&paper.models.writer),
                paper.summary_window,
            )),
            formatter: formatter.clone(),
            repairer: formatter,
        }
    }
}
