//! 规划师：决定论文标题、文件结构、章节大纲与引用分配

use async_stream::try_stream;

use crate::agents::{agent_stream, Agent, AgentEvent, AgentLlm, AgentOutput, AgentStream};
use crate::core::{parse_plan, PaperSession, Stage};

pub struct PlannerAgent {
    llm: AgentLlm,
}

impl PlannerAgent {
    pub fn new(llm: AgentLlm) -> Self {
        Self { llm }
    }
}

fn plan_prompt(session: &PaperSession) -> String {
    let refs = session
        .literature
        .iter()
        .enumerate()
        .map(|(i, lit)| format!("- ref{}: {} ({})", i + 1, lit.title, lit.year))
        .collect::<Vec<_>>()
        .join("\n");
    let summary: String = session.literature_summary.chars().take(2000).collect();

    format!(
        r#"You are an expert in academic paper structure. Plan the complete file structure of a paper on the topic below.

Topic: {topic}

Available references:
{refs}

Literature review summary:
{summary}

Return strict JSON only:
{{
  "title": "paper title",
  "files": {{
    "main.tex": "entry file",
    "chapters/01_xxx.tex": "chapter description",
    "refs.bib": "references"
  }},
  "outline": {{
    "chapters/01_xxx.tex": {{
      "title": "chapter title",
      "sections": ["subsection 1", "subsection 2"],
      "key_points": ["point 1", "point 2"],
      "citations": ["ref1", "ref2"],
      "target_words": 800
    }}
  }}
}}

Rules:
1. Chapter files carry numeric prefixes: 01_, 02_, ...
2. Follow the standard structure: introduction, related work, method, results, discussion, conclusion
3. 2-4 subsections per chapter
4. Distribute citations sensibly across chapters
5. 5000-8000 words in total"#,
        topic = session.topic,
    )
}

impl Agent for PlannerAgent {
    fn name(&self) -> &'static str {
        "planner"
    }

    fn run<'a>(&'a self, session: &'a mut PaperSession) -> AgentStream<'a> {
        agent_stream(try_stream! {
            yield AgentEvent::progress(Stage::Planning, "planning paper structure...");

            let response = self.llm.ask(plan_prompt(session)).await?;
            session.file_plan = parse_plan(response.as_deref());
            if session.file_plan.is_empty() {
                tracing::warn!(session_id = %session.id, "planner returned no usable plan");
            }

            let file_count = session.file_plan.files.len();
            yield AgentEvent::progress(Stage::Planning, format!("plan ready: {file_count} files"));
            yield AgentEvent::Result(AgentOutput::Plan(session.file_plan.clone()));
        })
    }
}
