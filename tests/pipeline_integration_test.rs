//! 论文流水线集成测试：Mock LLM + 假编译器 + 内存存储，覆盖生成、修复循环、阶段失败、存储降级、
//! 调用方断开、孤儿恢复与修订

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;

use quill::agents::{
    agent_stream, Agent, AgentEvent, AgentOutput, AgentStream, DocumentRepair, PipelineAgents,
};
use quill::compiler::{CompileResult, Compiler};
use quill::config::AppConfig;
use quill::core::{
    PaperError, PaperSession, PaperStatus, PipelineBuilder, PipelineEvent, PipelineService, Stage,
    ABANDONED_ERROR, ORPHAN_ERROR,
};
use quill::llm::MockLlmClient;
use quill::storage::{MemoryBlobStore, MemoryRecordStore, PaperRecord, PaperRecordStore};

/// 前 `fail_from` 次编译成功，之后一律失败（None 表示永远成功）；raise 时编译调用本身报错
struct FakeCompiler {
    calls: AtomicUsize,
    fail_from: Option<usize>,
    raise: bool,
}

impl FakeCompiler {
    fn always_ok() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail_from: None, raise: false })
    }

    fn failing_from(n: usize) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail_from: Some(n), raise: false })
    }

    fn raising() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail_from: None, raise: true })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn compile(
        &self,
        files: &BTreeMap<String, String>,
        entry: &str,
    ) -> Result<CompileResult, PaperError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.raise {
            return Err(PaperError::Compile("failed to run xelatex: not found".to_string()));
        }
        assert!(files.contains_key(entry), "entry file missing from VFS");
        match self.fail_from {
            Some(limit) if n >= limit => Ok(CompileResult::failed(
                "xelatex pass 1 failed (exit code 1)",
                "! Undefined control sequence.\nl.5 \\foo".to_string(),
            )),
            _ => Ok(CompileResult::succeeded(b"%PDF-1.5 fake".to_vec(), String::new())),
        }
    }
}

/// 记录调用次数的修复器；revise 时可选写入一个文件
struct CountingRepair {
    repairs: AtomicUsize,
    revisions: AtomicUsize,
    revise_writes: Option<(&'static str, &'static str)>,
}

impl CountingRepair {
    fn new(revise_writes: Option<(&'static str, &'static str)>) -> Arc<Self> {
        Arc::new(Self {
            repairs: AtomicUsize::new(0),
            revisions: AtomicUsize::new(0),
            revise_writes,
        })
    }
}

impl DocumentRepair for CountingRepair {
    fn repair<'a>(&'a self, _session: &'a mut PaperSession, error_log: &'a str) -> AgentStream<'a> {
        agent_stream(try_stream! {
            self.repairs.fetch_add(1, Ordering::SeqCst);
            assert!(error_log.contains("Undefined control sequence"));
            yield AgentEvent::progress(Stage::Compiling, "analyzing compile errors...");
            yield AgentEvent::Result(AgentOutput::Files(vec!["main.tex".to_string()]));
        })
    }

    fn revise<'a>(&'a self, session: &'a mut PaperSession, _instruction: &'a str) -> AgentStream<'a> {
        agent_stream(try_stream! {
            self.revisions.fetch_add(1, Ordering::SeqCst);
            let mut modified = Vec::new();
            if let Some((path, content)) = self.revise_writes {
                session.vfs.write(path, content);
                modified.push(path.to_string());
                yield AgentEvent::progress(Stage::Revising, format!("modified {path}"));
            }
            yield AgentEvent::Result(AgentOutput::Files(modified));
        })
    }
}

/// 包一层计数的 Agent
struct CountingAgent {
    inner: Arc<dyn Agent>,
    calls: Arc<AtomicUsize>,
}

impl Agent for CountingAgent {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn run<'a>(&'a self, session: &'a mut PaperSession) -> AgentStream<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(session)
    }
}

/// 先汇报一条进度，再以 "bad data" 失败
struct BrokenAgent {
    name: &'static str,
    stage: Stage,
}

impl Agent for BrokenAgent {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run<'a>(&'a self, _session: &'a mut PaperSession) -> AgentStream<'a> {
        agent_stream(try_stream! {
            yield AgentEvent::progress(self.stage, format!("{} started...", self.name));
            Err::<(), _>(PaperError::Agent("bad data".to_string()))?;
        })
    }
}

struct Harness {
    service: PipelineService,
    compiler: Arc<FakeCompiler>,
    repair: Arc<CountingRepair>,
    blobs: Arc<MemoryBlobStore>,
    records: Arc<MemoryRecordStore>,
    writer_calls: Arc<AtomicUsize>,
    formatter_calls: Arc<AtomicUsize>,
}

async fn harness(
    compiler: Arc<FakeCompiler>,
    repair: Arc<CountingRepair>,
    broken: Option<Stage>,
) -> Harness {
    let mut cfg = AppConfig::default();
    cfg.storage.database_url = Some("memory".to_string());

    let mut agents = PipelineAgents::from_config(Arc::new(MockLlmClient::new()), &cfg.paper);
    let writer_calls = Arc::new(AtomicUsize::new(0));
    let formatter_calls = Arc::new(AtomicUsize::new(0));
    agents.writer = Arc::new(CountingAgent {
        inner: agents.writer.clone(),
        calls: writer_calls.clone(),
    });
    agents.formatter = Arc::new(CountingAgent {
        inner: agents.formatter.clone(),
        calls: formatter_calls.clone(),
    });
    match broken {
        Some(stage @ Stage::Researching) => agents.researcher = Arc::new(BrokenAgent { name: "researcher", stage }),
        Some(stage @ Stage::Planning) => agents.planner = Arc::new(BrokenAgent { name: "planner", stage }),
        Some(stage @ Stage::Writing) => agents.writer = Arc::new(BrokenAgent { name: "writer", stage }),
        Some(stage @ Stage::Formatting) => agents.formatter = Arc::new(BrokenAgent { name: "formatter", stage }),
        Some(other) => panic!("no agent runs in stage {other:?}"),
        None => {}
    }
    agents.repairer = repair.clone();

    let blobs = Arc::new(MemoryBlobStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let service = PipelineBuilder::new(cfg)
        .with_agents(agents)
        .with_compiler(compiler.clone())
        .with_blob_store(blobs.clone())
        .with_record_store(records.clone())
        .build()
        .await
        .unwrap();

    Harness {
        service,
        compiler,
        repair,
        blobs,
        records,
        writer_calls,
        formatter_calls,
    }
}

fn session_id(events: &[PipelineEvent]) -> String {
    match &events[0] {
        PipelineEvent::SessionCreated { session_id } => session_id.clone(),
        other => panic!("first event should be session_created, got {other:?}"),
    }
}

fn error_count(events: &[PipelineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Error { .. }))
        .count()
}

#[tokio::test]
async fn test_generate_completes_on_first_compile() {
    let h = harness(FakeCompiler::always_ok(), CountingRepair::new(None), None).await;
    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);

    match events.last() {
        Some(PipelineEvent::Completed { pdf_url, session_id }) => {
            assert_eq!(session_id, &id);
            assert_eq!(
                pdf_url.as_deref(),
                Some(format!("memory://users/u1/papers/{id}/paper.pdf").as_str())
            );
        }
        other => panic!("expected completed, got {other:?}"),
    }
    assert_eq!(error_count(&events), 0);
    assert_eq!(h.compiler.calls(), 1);
    assert_eq!(h.repair.repairs.load(Ordering::SeqCst), 0);

    // 对外只有四种事件，agent 的 result 不会外泄
    for event in &events {
        let json = serde_json::to_value(event).unwrap();
        let kind = json["type"].as_str().unwrap().to_string();
        assert!(["session_created", "progress", "completed", "error"].contains(&kind.as_str()));
    }
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::Progress { stage: Stage::Writing, .. }
    )));

    let snap = h.service.sessions().get(&id).await.unwrap();
    assert_eq!(
        snap.history,
        vec![
            PaperStatus::Pending,
            PaperStatus::Researching,
            PaperStatus::Planning,
            PaperStatus::Writing,
            PaperStatus::Formatting,
            PaperStatus::Compiling,
            PaperStatus::Completed,
        ]
    );
    // 已落盘：内存里只留状态，文件从持久化快照读取
    assert!(snap.files.is_none());

    let report = h.service.status(&id).await.unwrap().unwrap();
    assert_eq!(report.status, PaperStatus::Completed);
    assert_eq!(report.title.as_deref(), Some("A Survey of Mock Topics"));

    let record = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, PaperStatus::Completed);
    assert!(record.completed_at.is_some());
    assert!(record.vfs_key.is_some());

    let files = h.service.paper_files(&id).await.unwrap();
    assert!(files.contains(&"main.tex".to_string()));
    assert!(files.contains(&"refs.bib".to_string()));
    assert!(files.contains(&"chapters/01_intro.tex".to_string()));
    assert!(h.service.download_url(&id).await.unwrap().is_some());

    let listed = h.service.list_papers("u1", 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
}

#[tokio::test]
async fn test_compile_always_failing_uses_three_repair_rounds() {
    let h = harness(FakeCompiler::failing_from(0), CountingRepair::new(None), None).await;
    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);

    match events.last() {
        Some(PipelineEvent::Error { message, session_id }) => {
            assert_eq!(session_id, &id);
            assert!(message.contains("compile failed after 3 repair rounds"), "{message}");
            assert!(message.contains("xelatex pass 1 failed"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(error_count(&events), 1);
    assert_eq!(h.compiler.calls(), 4);
    assert_eq!(h.repair.repairs.load(Ordering::SeqCst), 3);
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::Progress { detail, .. } if detail.contains("round 3/3")
    )));

    let report = h.service.status(&id).await.unwrap().unwrap();
    assert_eq!(report.status, PaperStatus::Failed);

    // PLANNING 之后已有追踪记录，失败也同步过去
    let record = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, PaperStatus::Failed);
    assert!(record.error.unwrap().contains("compile failed"));
    assert!(h.service.download_url(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_planner_failure_stops_later_stages() {
    let h = harness(FakeCompiler::always_ok(), CountingRepair::new(None), Some(Stage::Planning)).await;
    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);

    assert_eq!(error_count(&events), 1);
    match events.last() {
        Some(PipelineEvent::Error { message, .. }) => {
            assert!(message.contains("planning"), "{message}");
            assert!(message.contains("bad data"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::Progress { stage: Stage::Researching, .. }
    )));

    assert_eq!(h.writer_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.formatter_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.compiler.calls(), 0);
    assert!(h.service.paper_files(&id).await.unwrap().is_empty());

    let snap = h.service.sessions().get(&id).await.unwrap();
    assert_eq!(snap.status, PaperStatus::Failed);
    // 规划未完成，不创建持久化记录
    assert!(h.records.get(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_orphan_record_is_corrected_once() {
    let h = harness(FakeCompiler::always_ok(), CountingRepair::new(None), None).await;
    h.records
        .upsert(&PaperRecord::new("orphan", "u2", "lost topic", PaperStatus::Writing))
        .await
        .unwrap();

    let first = h.service.status("orphan").await.unwrap().unwrap();
    let second = h.service.status("orphan").await.unwrap().unwrap();
    assert_eq!(first.status, PaperStatus::Failed);
    assert_eq!(second.status, PaperStatus::Failed);
    assert_eq!(first.error.as_deref(), Some(ORPHAN_ERROR));
    assert_eq!(first.error, second.error);
    // 1 次初始写入 + 1 次修正
    assert_eq!(h.records.write_count(), 2);

    let listed = h.service.list_papers("u2", 10).await.unwrap();
    assert_eq!(listed[0].status, PaperStatus::Failed);
    assert_eq!(h.records.write_count(), 2);
    assert!(h.service.status("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_revise_updates_files_and_keeps_record_id() {
    let h = harness(
        FakeCompiler::always_ok(),
        CountingRepair::new(Some(("chapters/01_intro.tex", "\\section{Revised}"))),
        None,
    )
    .await;
    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);
    let original = h.records.get(&id).await.unwrap().unwrap();

    let events: Vec<_> = h.service.revise(&id, "rewrite the introduction").collect().await;
    assert!(matches!(
        events.first(),
        Some(PipelineEvent::Progress { stage: Stage::Revising, .. })
    ));
    assert!(matches!(events.last(), Some(PipelineEvent::Completed { .. })));
    assert_eq!(h.compiler.calls(), 2);

    let content = h
        .service
        .read_paper_file(&id, "chapters/01_intro.tex")
        .await
        .unwrap();
    assert_eq!(content.as_deref(), Some("\\section{Revised}"));

    let record = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, PaperStatus::Completed);
    assert_eq!(record.pdf_key, original.pdf_key);
    assert_eq!(record.created_at, original.created_at);
    assert_eq!(h.service.list_papers("u1", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_revise_without_changes_leaves_record_untouched() {
    let h = harness(FakeCompiler::always_ok(), CountingRepair::new(None), None).await;
    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);
    let writes = h.records.write_count();

    let events: Vec<_> = h.service.revise(&id, "make it better").collect().await;
    match events.last() {
        Some(PipelineEvent::Error { message, .. }) => {
            assert!(message.contains("could not apply the revision"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(h.repair.revisions.load(Ordering::SeqCst), 1);
    assert_eq!(h.compiler.calls(), 1);
    assert_eq!(h.records.write_count(), writes);
    assert!(h.service.sessions().get(&id).await.is_none());

    let report = h.service.status(&id).await.unwrap().unwrap();
    assert_eq!(report.status, PaperStatus::Completed);
}

#[tokio::test]
async fn test_revise_compile_failure_keeps_previous_artifact() {
    let h = harness(
        FakeCompiler::failing_from(1),
        CountingRepair::new(Some(("main.tex", "\\broken"))),
        None,
    )
    .await;
    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);
    let original = h.records.get(&id).await.unwrap().unwrap();

    let events: Vec<_> = h.service.revise(&id, "break it").collect().await;
    assert!(matches!(events.last(), Some(PipelineEvent::Error { .. })));
    assert_eq!(error_count(&events), 1);
    assert_eq!(h.repair.repairs.load(Ordering::SeqCst), 3);

    let snap = h.service.sessions().get(&id).await.unwrap();
    assert_eq!(snap.status, PaperStatus::Failed);
    let record = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, PaperStatus::Completed);
    assert_eq!(record.pdf_url, original.pdf_url);
}

#[tokio::test]
async fn test_revise_rejected_while_paper_is_busy() {
    let h = harness(FakeCompiler::always_ok(), CountingRepair::new(None), None).await;
    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);

    let guard = h.service.sessions().try_begin_run(&id).unwrap();
    let events: Vec<_> = h.service.revise(&id, "edit").collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        PipelineEvent::Error { message, .. } if message == "paper is already being processed"
    ));
    assert_eq!(h.repair.revisions.load(Ordering::SeqCst), 0);
    drop(guard);

    let missing: Vec<_> = h.service.revise("nope", "edit").collect().await;
    assert!(matches!(missing.last(), Some(PipelineEvent::Error { .. })));
}

/// 某个阶段的 Agent 失败：唯一的 error 事件、后续阶段不运行、VFS 为空、状态历史完整
async fn assert_stage_failure(stage: Stage, expected_history: &[PaperStatus], record_expected: bool) {
    let h = harness(FakeCompiler::always_ok(), CountingRepair::new(None), Some(stage)).await;
    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);

    assert_eq!(error_count(&events), 1);
    match events.last() {
        Some(PipelineEvent::Error { message, session_id }) => {
            assert_eq!(session_id, &id);
            let prefix = format!("{} stage failed", stage.as_str());
            assert!(message.starts_with(&prefix), "{message}");
            assert!(message.contains("bad data"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::Progress { stage: s, .. } if *s == stage)));
    assert_eq!(h.compiler.calls(), 0);
    assert!(h.service.paper_files(&id).await.unwrap().is_empty());

    let snap = h.service.sessions().get(&id).await.unwrap();
    assert_eq!(snap.status, PaperStatus::Failed);
    assert_eq!(snap.history, expected_history);

    let record = h.records.get(&id).await.unwrap();
    assert_eq!(record.is_some(), record_expected);
    if let Some(record) = record {
        assert_eq!(record.status, PaperStatus::Failed);
        assert_eq!(record.error, snap.error);
    }
}

#[tokio::test]
async fn test_researcher_failure_stops_pipeline() {
    assert_stage_failure(
        Stage::Researching,
        &[PaperStatus::Pending, PaperStatus::Researching, PaperStatus::Failed],
        false,
    )
    .await;
}

#[tokio::test]
async fn test_writer_failure_stops_pipeline() {
    assert_stage_failure(
        Stage::Writing,
        &[
            PaperStatus::Pending,
            PaperStatus::Researching,
            PaperStatus::Planning,
            PaperStatus::Writing,
            PaperStatus::Failed,
        ],
        true,
    )
    .await;
}

#[tokio::test]
async fn test_formatter_failure_stops_pipeline() {
    assert_stage_failure(
        Stage::Formatting,
        &[
            PaperStatus::Pending,
            PaperStatus::Researching,
            PaperStatus::Planning,
            PaperStatus::Writing,
            PaperStatus::Formatting,
            PaperStatus::Failed,
        ],
        true,
    )
    .await;
}

#[tokio::test]
async fn test_compile_exception_skips_repair() {
    let h = harness(FakeCompiler::raising(), CountingRepair::new(None), None).await;
    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);

    assert_eq!(error_count(&events), 1);
    match events.last() {
        Some(PipelineEvent::Error { message, .. }) => {
            assert!(message.starts_with("compile exception"), "{message}");
            assert!(message.contains("failed to run xelatex"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(h.compiler.calls(), 1);
    assert_eq!(h.repair.repairs.load(Ordering::SeqCst), 0);
    assert!(!events.iter().any(|e| matches!(
        e,
        PipelineEvent::Progress { detail, .. } if detail.contains("repairing")
    )));

    let report = h.service.status(&id).await.unwrap().unwrap();
    assert_eq!(report.status, PaperStatus::Failed);
    let record = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, PaperStatus::Failed);
}

#[tokio::test]
async fn test_storage_outage_still_completes() {
    let h = harness(FakeCompiler::always_ok(), CountingRepair::new(None), None).await;
    h.blobs.set_unavailable(true);

    let events: Vec<_> = h.service.generate("u1", "T").collect().await;
    let id = session_id(&events);
    match events.last() {
        Some(PipelineEvent::Completed { pdf_url, .. }) => assert!(pdf_url.is_none()),
        other => panic!("expected completed, got {other:?}"),
    }
    assert_eq!(error_count(&events), 0);
    assert!(h.blobs.is_empty().await);

    let report = h.service.status(&id).await.unwrap().unwrap();
    assert_eq!(report.status, PaperStatus::Completed);
    assert!(report.pdf_url.is_none());

    let record = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, PaperStatus::Completed);
    assert!(record.pdf_url.is_none());
    assert!(record.vfs_key.is_none());
    assert!(h.service.download_url(&id).await.unwrap().is_none());

    // VFS 没能落盘，内存里的副本保留
    let snap = h.service.sessions().get(&id).await.unwrap();
    assert!(snap.files.is_some());
    assert!(h.service.paper_files(&id).await.unwrap().contains(&"main.tex".to_string()));
}

#[tokio::test]
async fn test_dropped_stream_run_finishes_in_background() {
    let h = harness(FakeCompiler::always_ok(), CountingRepair::new(None), None).await;
    let mut events = h.service.generate("u1", "T");

    let mut id = None;
    while let Some(event) = events.next().await {
        match event {
            PipelineEvent::SessionCreated { session_id } => id = Some(session_id),
            PipelineEvent::Progress { stage: Stage::Writing, .. } => break,
            _ => {}
        }
    }
    drop(events);
    let id = id.expect("session_created comes first");

    let mut report = h.service.status(&id).await.unwrap().unwrap();
    for _ in 0..200 {
        if report.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        report = h.service.status(&id).await.unwrap().unwrap();
    }
    assert_eq!(report.status, PaperStatus::Completed);
    assert!(report.error.is_none());
    assert!(!h.service.sessions().is_running(&id));
    assert_eq!(h.compiler.calls(), 1);
    assert_eq!(h.formatter_calls.load(Ordering::SeqCst), 1);

    let record = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, PaperStatus::Completed);
    assert!(record.pdf_url.is_some());
}

#[tokio::test]
async fn test_abandoned_session_reports_failed() {
    let h = harness(FakeCompiler::always_ok(), CountingRepair::new(None), None).await;

    // 会话停在 WRITING，但没有任何任务持有它的运行权
    let mut stuck = PaperSession::with_id("stuck", "u3", "topic");
    for next in [PaperStatus::Researching, PaperStatus::Planning, PaperStatus::Writing] {
        stuck.advance(next).unwrap();
    }
    h.service.sessions().insert(&stuck).await;
    h.records
        .upsert(&PaperRecord::new("stuck", "u3", "topic", PaperStatus::Writing))
        .await
        .unwrap();

    let first = h.service.status("stuck").await.unwrap().unwrap();
    assert_eq!(first.status, PaperStatus::Failed);
    assert_eq!(first.error.as_deref(), Some(ABANDONED_ERROR));
    let record = h.records.get("stuck").await.unwrap().unwrap();
    assert_eq!(record.status, PaperStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(ABANDONED_ERROR));

    let writes = h.records.write_count();
    let second = h.service.status("stuck").await.unwrap().unwrap();
    assert_eq!(second, first);
    let listed = h.service.list_papers("u3", 10).await.unwrap();
    assert_eq!(listed[0].status, PaperStatus::Failed);
    assert_eq!(h.records.write_count(), writes);

    // 运行中的会话不受影响
    let mut live = PaperSession::with_id("live", "u3", "topic");
    live.advance(PaperStatus::Researching).unwrap();
    let guard = h.service.sessions().try_begin_run("live").unwrap();
    h.service.sessions().insert(&live).await;
    let report = h.service.status("live").await.unwrap().unwrap();
    assert_eq!(report.status, PaperStatus::Researching);
    drop(guard);
}
