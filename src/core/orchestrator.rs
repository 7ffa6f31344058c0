//! 论文生成编排器：PipelineService
//!
//! generate：创建会话 → 研究员 → 规划师 → 写手 → 排版师 → 编译（失败则修复后重编，有上限）→ 持久化。
//! revise：从持久化恢复 → 按用户指令改 VFS → 同一编译 / 修复循环 → 更新同一条记录。
//!
//! 两者都返回事件流：首次拉取时流水线在独立的 tokio 任务上启动，事件经容量为 1 的通道转发，
//! 调用方不拉取时通道里最多积压一条事件。调用方丢弃流只会关闭接收端，任务照常跑完并落盘。
//! Agent 的 Result 事件只在阶段内部消费，对外只有 session_created / progress / completed / error。

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::agents::{Agent, AgentEvent, AgentOutput, PipelineAgents};
use crate::compiler::Compiler;
use crate::config::PaperSection;
use crate::core::{
    PaperArchive, PaperError, PaperSession, PaperStatus, SessionSnapshot, SessionStore, Stage, ABANDONED_ERROR,
};
use crate::storage::PaperRecord;

/// 对外事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    SessionCreated { session_id: String },
    Progress { stage: Stage, detail: String },
    Completed { pdf_url: Option<String>, session_id: String },
    Error { message: String, session_id: String },
}

impl PipelineEvent {
    pub fn progress(stage: Stage, detail: impl Into<String>) -> Self {
        Self::Progress {
            stage,
            detail: detail.into(),
        }
    }
}

pub type PipelineStream = Pin<Box<dyn Stream<Item = PipelineEvent> + Send>>;

/// 编译 / 修复循环的一步：转发给调用方的事件，或最终结果（PDF 或失败信息）
enum CompileStep {
    Event(PipelineEvent),
    Done(Result<Vec<u8>, String>),
}

type CompileSteps<'a> = Pin<Box<dyn Stream<Item = CompileStep> + Send + 'a>>;

/// 状态查询结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub session_id: String,
    pub topic: String,
    pub status: PaperStatus,
    pub progress_detail: Option<String>,
    pub error: Option<String>,
    pub pdf_url: Option<String>,
    pub title: Option<String>,
}

impl From<SessionSnapshot> for StatusReport {
    fn from(snap: SessionSnapshot) -> Self {
        Self {
            session_id: snap.id,
            topic: snap.topic,
            status: snap.status,
            progress_detail: Some(snap.progress_detail).filter(|d| !d.is_empty()),
            error: snap.error,
            pdf_url: snap.pdf_url,
            title: Some(snap.title).filter(|t| !t.is_empty()),
        }
    }
}

impl From<PaperRecord> for StatusReport {
    fn from(r: PaperRecord) -> Self {
        Self {
            session_id: r.id,
            topic: r.topic,
            status: r.status,
            progress_detail: None,
            error: r.error,
            pdf_url: r.pdf_url,
            title: r.title,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_repair_rounds: usize,
    pub entry: String,
}

impl From<&PaperSection> for PipelineSettings {
    fn from(paper: &PaperSection) -> Self {
        Self {
            max_repair_rounds: paper.max_repair_rounds,
            entry: paper.entry.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_repair_rounds: 3,
            entry: "main.tex".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct PipelineService {
    agents: PipelineAgents,
    compiler: Arc<dyn Compiler>,
    sessions: SessionStore,
    archive: PaperArchive,
    settings: PipelineSettings,
}

impl PipelineService {
    pub fn new(
        agents: PipelineAgents,
        compiler: Arc<dyn Compiler>,
        sessions: SessionStore,
        archive: PaperArchive,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            agents,
            compiler,
            sessions,
            archive,
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn archive(&self) -> &PaperArchive {
        &self.archive
    }

    /// 生成一篇新论文
    pub fn generate(&self, user_id: &str, topic: &str) -> PipelineStream {
        detach(self.generate_events(user_id, topic))
    }

    /// 按用户指令修订已完成的论文
    pub fn revise(&self, paper_id: &str, instruction: &str) -> PipelineStream {
        detach(self.revise_events(paper_id, instruction))
    }

    fn generate_events(&self, user_id: &str, topic: &str) -> PipelineStream {
        let this = self.clone();
        let user_id = user_id.to_string();
        let topic = topic.to_string();

        Box::pin(stream! {
            let (mut session, _run) = match this.sessions.create(&user_id, &topic).await {
                Ok(created) => created,
                Err(e) => {
                    yield PipelineEvent::Error { message: e.to_string(), session_id: String::new() };
                    return;
                }
            };
            let id = session.id.clone();
            tracing::info!(session_id = %id, user_id = %user_id, "paper generation started");
            yield PipelineEvent::SessionCreated { session_id: id.clone() };

            let stages: [(PaperStatus, Arc<dyn Agent>); 4] = [
                (PaperStatus::Researching, Arc::clone(&this.agents.researcher)),
                (PaperStatus::Planning, Arc::clone(&this.agents.planner)),
                (PaperStatus::Writing, Arc::clone(&this.agents.writer)),
                (PaperStatus::Formatting, Arc::clone(&this.agents.formatter)),
            ];

            for (status, agent) in stages {
                if let Err(e) = this.transition(&mut session, status).await {
                    yield this.fail(&mut session, e.to_string(), true).await;
                    return;
                }
                this.archive.track(&session, false).await;
                tracing::info!(session_id = %id, stage = %status, agent = agent.name(), "stage started");

                let mut failure = None;
                let mut last_detail = None;
                {
                    let mut events = agent.run(&mut session);
                    while let Some(item) = events.next().await {
                        match item {
                            Ok(AgentEvent::Progress { stage, detail }) => {
                                this.sessions.set_progress(&id, &detail).await;
                                last_detail = Some(detail.clone());
                                yield PipelineEvent::Progress { stage, detail };
                            }
                            Ok(AgentEvent::Result(_)) => {}
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                }
                if let Some(detail) = last_detail {
                    session.progress_detail = detail;
                }
                if let Some(e) = failure {
                    tracing::error!(session_id = %id, stage = %status, error = %e, "stage failed");
                    yield this.fail(&mut session, format!("{status} stage failed: {e}"), true).await;
                    return;
                }

                this.sessions.sync(&session).await;
                if status == PaperStatus::Planning {
                    this.archive.track(&session, true).await;
                }
            }

            if let Err(e) = this.transition(&mut session, PaperStatus::Compiling).await {
                yield this.fail(&mut session, e.to_string(), true).await;
                return;
            }
            this.archive.track(&session, false).await;
            yield this.note(&mut session, Stage::Compiling, "compiling PDF...").await;

            let outcome = {
                let mut outcome = None;
                let mut steps = this.compile_loop(&mut session);
                while let Some(step) = steps.next().await {
                    match step {
                        CompileStep::Event(event) => {
                            if let PipelineEvent::Progress { detail, .. } = &event {
                                this.sessions.set_progress(&id, detail).await;
                            }
                            yield event;
                        }
                        CompileStep::Done(result) => outcome = Some(result),
                    }
                }
                outcome
            };

            match outcome {
                Some(Ok(pdf)) => {
                    yield this.note(&mut session, Stage::Compiling, "saving...").await;
                    session.pdf_data = Some(pdf);
                    if let Err(e) = this.transition(&mut session, PaperStatus::Completed).await {
                        yield this.fail(&mut session, e.to_string(), true).await;
                        return;
                    }
                    this.finish(&mut session).await;
                    tracing::info!(session_id = %id, "paper generation completed");
                    yield PipelineEvent::Completed { pdf_url: session.pdf_url.clone(), session_id: id.clone() };
                }
                Some(Err(message)) => {
                    yield this.fail(&mut session, message, true).await;
                }
                None => {
                    yield this.fail(&mut session, "compile loop ended without a result".to_string(), true).await;
                }
            }
        })
    }

    fn revise_events(&self, paper_id: &str, instruction: &str) -> PipelineStream {
        let this = self.clone();
        let paper_id = paper_id.to_string();
        let instruction = instruction.to_string();

        Box::pin(stream! {
            let Some(_run) = this.sessions.try_begin_run(&paper_id) else {
                tracing::warn!(session_id = %paper_id, "revision rejected, paper is busy");
                yield PipelineEvent::Error {
                    message: "paper is already being processed".to_string(),
                    session_id: paper_id.clone(),
                };
                return;
            };

            yield PipelineEvent::progress(Stage::Revising, "restoring paper data...");
            let mut session = match this.archive.restore(&paper_id).await {
                Ok(Some(session)) => session,
                Ok(None) => {
                    yield PipelineEvent::Error {
                        message: "paper does not exist or its data was lost".to_string(),
                        session_id: paper_id.clone(),
                    };
                    return;
                }
                Err(e) => {
                    tracing::error!(session_id = %paper_id, error = %e, "restore failed");
                    yield PipelineEvent::Error {
                        message: format!("failed to restore paper: {e}"),
                        session_id: paper_id.clone(),
                    };
                    return;
                }
            };
            session.reopen_for_revision();
            this.sessions.insert(&session).await;
            tracing::info!(session_id = %paper_id, files = session.vfs.len(), "paper revision started");

            yield this.note(&mut session, Stage::Revising, "applying the requested changes...").await;

            let mut modified = Vec::new();
            let mut failure = None;
            let mut last_detail = None;
            {
                let mut events = this.agents.repairer.revise(&mut session, &instruction);
                while let Some(item) = events.next().await {
                    match item {
                        Ok(AgentEvent::Progress { stage, detail }) => {
                            this.sessions.set_progress(&paper_id, &detail).await;
                            last_detail = Some(detail.clone());
                            yield PipelineEvent::Progress { stage, detail };
                        }
                        Ok(AgentEvent::Result(AgentOutput::Files(files))) => modified = files,
                        Ok(AgentEvent::Result(_)) => {}
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
            if let Some(detail) = last_detail {
                session.progress_detail = detail;
            }
            if let Some(e) = failure {
                yield this.fail(&mut session, format!("revision failed: {e}"), false).await;
                return;
            }
            if modified.is_empty() {
                this.sessions.delete(&paper_id).await;
                yield PipelineEvent::Error {
                    message: "could not apply the revision, try a more specific instruction".to_string(),
                    session_id: paper_id.clone(),
                };
                return;
            }

            if let Err(e) = this.transition(&mut session, PaperStatus::Compiling).await {
                yield this.fail(&mut session, e.to_string(), false).await;
                return;
            }
            yield this.note(&mut session, Stage::Compiling, "recompiling PDF...").await;

            let outcome = {
                let mut outcome = None;
                let mut steps = this.compile_loop(&mut session);
                while let Some(step) = steps.next().await {
                    match step {
                        CompileStep::Event(event) => {
                            if let PipelineEvent::Progress { detail, .. } = &event {
                                this.sessions.set_progress(&paper_id, detail).await;
                            }
                            yield event;
                        }
                        CompileStep::Done(result) => outcome = Some(result),
                    }
                }
                outcome
            };

            match outcome {
                Some(Ok(pdf)) => {
                    yield this.note(&mut session, Stage::Compiling, "saving...").await;
                    session.pdf_data = Some(pdf);
                    if let Err(e) = this.transition(&mut session, PaperStatus::Completed).await {
                        yield this.fail(&mut session, e.to_string(), false).await;
                        return;
                    }
                    this.finish(&mut session).await;
                    tracing::info!(session_id = %paper_id, "paper revision completed");
                    yield PipelineEvent::Completed { pdf_url: session.pdf_url.clone(), session_id: paper_id.clone() };
                }
                Some(Err(message)) => {
                    yield this.fail(&mut session, message, false).await;
                }
                None => {
                    yield this.fail(&mut session, "compile loop ended without a result".to_string(), false).await;
                }
            }
        })
    }

    /// 查询状态：优先内存中的会话，否则读持久化记录（非终态记录按孤儿处理）
    ///
    /// 内存快照停在非终态、却没有任务在跑时，会话与记录一并置为 FAILED。
    pub async fn status(&self, id: &str) -> Result<Option<StatusReport>, PaperError> {
        if let Some(snap) = self.sessions.get(id).await {
            let snap = match self.settle_abandoned(id).await? {
                Some(fixed) => fixed,
                None => snap,
            };
            return Ok(Some(snap.into()));
        }
        let Some(record) = self.archive.record(id).await? else {
            return Ok(None);
        };
        Ok(Some(self.archive.recover_orphan(record).await.into()))
    }

    /// 某用户的论文列表（新的在前）；非终态记录没有运行任务时同样按孤儿处理
    pub async fn list_papers(&self, user_id: &str, limit: usize) -> Result<Vec<PaperRecord>, PaperError> {
        let records = self.archive.list(user_id, limit).await?;
        let mut papers = Vec::with_capacity(records.len());
        for record in records {
            if record.status.is_terminal() || self.sessions.is_running(&record.id) {
                papers.push(record);
                continue;
            }
            match self.sessions.get(&record.id).await {
                Some(snap) if snap.status.is_terminal() => papers.push(record),
                Some(_) => {
                    self.sessions.fail_abandoned(&record.id, ABANDONED_ERROR).await;
                    papers.push(self.archive.recover_abandoned(record).await);
                }
                None => papers.push(self.archive.recover_orphan(record).await),
            }
        }
        Ok(papers)
    }

    /// 论文的文件列表：内存会话优先，VFS 副本已释放或会话不在内存时从持久化快照恢复
    pub async fn paper_files(&self, id: &str) -> Result<Vec<String>, PaperError> {
        let snap = self.sessions.get(id).await;
        if let Some(files) = snap.as_ref().and_then(|s| s.files.as_ref()) {
            return Ok(files.keys().cloned().collect());
        }
        match self.archive.restore(id).await? {
            Some(session) => Ok(session.vfs.list()),
            None if snap.is_some() => Ok(Vec::new()),
            None => Err(PaperError::NotFound(id.to_string())),
        }
    }

    /// 读取论文中的单个文件；论文不存在返回 NotFound，文件不存在返回 None
    pub async fn read_paper_file(&self, id: &str, path: &str) -> Result<Option<String>, PaperError> {
        let snap = self.sessions.get(id).await;
        if let Some(files) = snap.as_ref().and_then(|s| s.files.as_ref()) {
            return Ok(files.get(path).cloned());
        }
        match self.archive.restore(id).await? {
            Some(session) => Ok(session.vfs.read(path).map(str::to_string)),
            None if snap.is_some() => Ok(None),
            None => Err(PaperError::NotFound(id.to_string())),
        }
    }

    /// 已完成论文的 PDF 地址
    pub async fn download_url(&self, id: &str) -> Result<Option<String>, PaperError> {
        if let Some(snap) = self.sessions.get(id).await {
            if snap.status == PaperStatus::Completed && snap.pdf_url.is_some() {
                return Ok(snap.pdf_url);
            }
        }
        match self.archive.record(id).await? {
            Some(record) if record.status == PaperStatus::Completed => Ok(record.pdf_url),
            Some(_) => Ok(None),
            None => Err(PaperError::NotFound(id.to_string())),
        }
    }

    /// 被遗弃的会话：快照置为 FAILED，持久化记录若仍是非终态也一并修正
    async fn settle_abandoned(&self, id: &str) -> Result<Option<SessionSnapshot>, PaperError> {
        let Some(fixed) = self.sessions.fail_abandoned(id, ABANDONED_ERROR).await else {
            return Ok(None);
        };
        if let Some(record) = self.archive.record(id).await? {
            self.archive.recover_abandoned(record).await;
        }
        Ok(Some(fixed))
    }

    /// 落盘并同步快照；VFS 快照已写入对象存储时释放内存里的副本
    async fn finish(&self, session: &mut PaperSession) {
        let persisted = self.archive.persist(session, true).await;
        self.sessions.sync(session).await;
        if persisted && session.vfs_key.is_some() {
            self.sessions.release_files(&session.id).await;
        }
    }

    /// 会话与注册表同步前进一步
    async fn transition(&self, session: &mut PaperSession, next: PaperStatus) -> Result<(), PaperError> {
        session.advance(next)?;
        self.sessions.update_status(&session.id, next, None).await;
        Ok(())
    }

    /// 记录一条编排器自身的进度
    async fn note(&self, session: &mut PaperSession, stage: Stage, detail: &str) -> PipelineEvent {
        session.progress_detail = detail.to_string();
        self.sessions.set_progress(&session.id, detail).await;
        PipelineEvent::progress(stage, detail)
    }

    /// 置为 FAILED 并生成唯一的 error 事件；track 为 true 时同步到追踪记录
    async fn fail(&self, session: &mut PaperSession, message: String, track: bool) -> PipelineEvent {
        tracing::error!(session_id = %session.id, error = %message, "paper run failed");
        session.fail(message.clone());
        self.sessions.sync(session).await;
        if track {
            self.archive.track(session, false).await;
        }
        PipelineEvent::Error {
            message,
            session_id: session.id.clone(),
        }
    }

    /// 编译，失败则交给修复子 Agent 后重编；最多 max_repair_rounds 轮修复
    fn compile_loop<'a>(&'a self, session: &'a mut PaperSession) -> CompileSteps<'a> {
        Box::pin(stream! {
            let max = self.settings.max_repair_rounds;
            let mut attempt = 0usize;
            loop {
                let files = session.vfs.snapshot();
                tracing::info!(session_id = %session.id, attempt = attempt + 1, files = files.len(), "compiling");
                let result = match self.compiler.compile(&files, &self.settings.entry).await {
                    Ok(result) => result,
                    Err(e) => {
                        yield CompileStep::Done(Err(format!("compile exception: {e}")));
                        return;
                    }
                };

                if result.success {
                    match result.artifact {
                        Some(pdf) => yield CompileStep::Done(Ok(pdf)),
                        None => yield CompileStep::Done(Err("compiler reported success without a PDF".to_string())),
                    }
                    return;
                }

                tracing::warn!(session_id = %session.id, attempt = attempt + 1, error = result.error_message(), "compile failed");
                if attempt >= max {
                    yield CompileStep::Done(Err(format!(
                        "compile failed after {max} repair rounds: {}",
                        result.error_message()
                    )));
                    return;
                }
                attempt += 1;

                let detail = format!("compile failed, repairing automatically (round {attempt}/{max})...");
                session.progress_detail = detail.clone();
                yield CompileStep::Event(PipelineEvent::progress(Stage::Compiling, detail));

                let mut failure = None;
                {
                    let mut events = self.agents.repairer.repair(session, result.repair_input());
                    while let Some(item) = events.next().await {
                        match item {
                            Ok(AgentEvent::Progress { stage, detail }) => {
                                yield CompileStep::Event(PipelineEvent::Progress { stage, detail });
                            }
                            Ok(AgentEvent::Result(_)) => {}
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                }
                if let Some(e) = failure {
                    yield CompileStep::Done(Err(format!("repair failed: {e}")));
                    return;
                }

                session.progress_detail = "recompiling...".to_string();
                yield CompileStep::Event(PipelineEvent::progress(Stage::Compiling, "recompiling..."));
            }
        })
    }
}

/// 在独立任务上驱动事件流，经通道转发给调用方
///
/// 接收端被丢弃后任务继续把流水线跑完，只是不再转发事件。
fn detach(mut events: PipelineStream) -> PipelineStream {
    Box::pin(stream! {
        let (tx, mut rx) = mpsc::channel::<PipelineEvent>(1);
        tokio::spawn(async move {
            let mut forwarding = true;
            while let Some(event) = events.next().await {
                if forwarding && tx.send(event).await.is_err() {
                    tracing::info!("event consumer disconnected, run continues in background");
                    forwarding = false;
                }
            }
        });
        while let Some(event) = rx.recv().await {
            yield event;
        }
    })
}
