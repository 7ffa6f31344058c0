//! 写手：按章节文件逐章撰写纯文本正文
//!
//! 章节按路径排序依次撰写；每章写完生成一段摘要，后续章节只看最近 N 章的摘要（渐进式披露）。

use async_stream::try_stream;

use crate::agents::{agent_stream, Agent, AgentEvent, AgentLlm, AgentOutput, AgentStream};
use crate::core::{citation_index, ChapterPlan, LiteratureItem, PaperSession, Stage};

/// 摘要 prompt 截取的章节正文长度（字符）
const SUMMARY_INPUT_CHARS: usize = 1500;

pub struct WriterAgent {
    llm: AgentLlm,
    summary_window: usize,
}

impl WriterAgent {
    pub fn new(llm: AgentLlm, summary_window: usize) -> Self {
        Self {
            llm,
            summary_window,
        }
    }

    /// 最近 summary_window 章的摘要；第一章给出提示语
    fn context(&self, summaries: &[String]) -> String {
        if summaries.is_empty() {
            return "(this is the first chapter)".to_string();
        }
        let start = summaries.len().saturating_sub(self.summary_window);
        summaries[start..].join("\n")
    }
}

/// 本章可引用的文献；越界或格式错误的引用 ID 直接丢弃
fn citations_info(plan: &ChapterPlan, literature: &[LiteratureItem]) -> String {
    plan.citations
        .iter()
        .filter_map(|id| {
            citation_index(id, literature.len())
                .map(|i| format!("- [{}] {} ({})\n", id.trim(), literature[i].title, literature[i].year))
        })
        .collect()
}

fn chapter_prompt(topic: &str, plan: &ChapterPlan, citations: &str, context: &str) -> String {
    format!(
        "Write one chapter of an academic paper as plain text (no LaTeX markup).\n\n\
         Paper topic: {topic}\n\
         Chapter title: {title}\n\
         Subsections: {sections}\n\
         Key points: {points}\n\
         Target length: {words} words\n\n\
         Citable references:\n{citations}\n\
         Summaries of previous chapters:\n{context}\n\n\
         Requirements:\n\
         1. Rigorous, objective academic style\n\
         2. Cite as [refN], e.g. [ref1], [ref3]\n\
         3. Clear logic with distinct paragraphs\n\
         4. No lists or enumerations, organize the text in paragraphs\n\
         5. Stay consistent with earlier chapters without repeating them",
        title = plan.title,
        sections = plan.sections.join(", "),
        points = plan.key_points.join(", "),
        words = plan.target_words,
    )
}

fn summary_prompt(content: &str) -> String {
    let head: String = content.chars().take(SUMMARY_INPUT_CHARS).collect();
    format!("Summarize the core content of the following chapter in 2-3 sentences:\n\n{head}")
}

impl Agent for WriterAgent {
    fn name(&self) -> &'static str {
        "writer"
    }

    fn run<'a>(&'a self, session: &'a mut PaperSession) -> AgentStream<'a> {
        agent_stream(try_stream! {
            yield AgentEvent::progress(Stage::Writing, "starting to write the paper...");

            let chapters = session.file_plan.chapter_paths();
            let total = chapters.len();
            let mut summaries: Vec<String> = Vec::new();

            for (i, path) in chapters.iter().enumerate() {
                let plan = session.file_plan.outline.get(path).cloned().unwrap_or_default();
                let title = if plan.title.is_empty() { path.clone() } else { plan.title.clone() };
                yield AgentEvent::progress(
                    Stage::Writing,
                    format!("writing chapter {}/{}: {}", i + 1, total, title),
                );

                let citations = citations_info(&plan, &session.literature);
                let prompt = chapter_prompt(&session.topic, &plan, &citations, &self.context(&summaries));
                let content = self.llm.ask(prompt).await?.unwrap_or_default();

                let summary = self.llm.ask(summary_prompt(&content)).await?.unwrap_or_default();
                summaries.push(format!("[{title}] {summary}"));
                session.content.insert(path.clone(), content);
            }

            yield AgentEvent::Result(AgentOutput::Chapters(session.content.keys().cloned().collect()));
        })
    }
}
