//! 排版师：纯文本 -> LaTeX，写入 VFS；并提供基于工具调用的修复 / 修订
//!
//! 入口文件与 refs.bib 由字符串拼接确定性生成，只有章节正文转换走 LLM。
//! 生成的 LaTeX 一律禁止 itemize / enumerate / \item，编译环境不允许列表环境。

use async_stream::try_stream;

use crate::agents::{
    agent_stream, Agent, AgentEvent, AgentLlm, AgentOutput, AgentStream, DocumentRepair,
};
use crate::core::{FilePlan, LiteratureItem, PaperSession, Stage};
use crate::llm::Message;
use crate::tools::{vfs_tool_specs, VfsToolHandler};

pub const BIBLIOGRAPHY_FILE: &str = "refs.bib";

const REPAIR_SYSTEM_PROMPT: &str = "You are an expert at fixing LaTeX compile errors. The user gives you a condensed xelatex error log; \
use the tools to locate the broken file, read it, fix it and write it back.\n\n\
Rules:\n\
1. Start with list_files to see which files exist\n\
2. Use read_file on the files named in the log\n\
3. Only fix the syntax that breaks compilation, never change the meaning of the content\n\
4. Never use itemize, enumerate or \\item\n\
5. Use write_file to write back the complete fixed file\n\
6. When done, reply with one short sentence describing the fix";

const REVISE_SYSTEM_PROMPT: &str = "You are an expert LaTeX editor for academic papers. The user gives you an edit instruction; \
use the tools to read the relevant files, apply the instruction and write them back.\n\n\
Rules:\n\
1. Start with list_files to see the paper structure\n\
2. Use read_file on the files you need to change\n\
3. Apply the instruction while keeping the LaTeX valid\n\
4. Never use itemize, enumerate or \\item\n\
5. Use write_file to write back the complete modified file\n\
6. When done, reply with one short summary sentence";

pub struct FormatterAgent {
    llm: AgentLlm,
    entry: String,
    repair_rounds: usize,
    revise_rounds: usize,
}

impl FormatterAgent {
    pub fn new(llm: AgentLlm, entry: impl Into<String>, repair_rounds: usize, revise_rounds: usize) -> Self {
        Self {
            llm,
            entry: entry.into(),
            repair_rounds,
            revise_rounds,
        }
    }

    async fn to_latex(&self, title: &str, content: &str, sections: &[String]) -> Result<String, crate::llm::LlmError> {
        let prompt = format!(
            "Convert the following plain text into LaTeX.\n\n\
             Chapter title: {title}\n\
             Subsection titles: {sections}\n\
             Content:\n{content}\n\n\
             Requirements:\n\
             1. Start with \\section{{{title}}}\n\
             2. Use \\subsection{{}} for subsections\n\
             3. Turn citation markers [refN] into \\cite{{refN}}\n\
             4. Math goes in $...$ or \\[...\\]\n\
             5. Never use itemize, enumerate or \\item\n\
             6. Organize with paragraphs separated by blank lines\n\
             7. Output only the LaTeX body, no documentclass or preamble",
            sections = sections.join(", "),
        );
        let latex = self.llm.ask(prompt).await?.unwrap_or_default();
        Ok(strip_code_fences(&latex))
    }

    /// 修复与修订共用的工具循环；返回被写入的文件
    async fn edit_with_tools(
        &self,
        session: &mut PaperSession,
        system: &str,
        user: String,
        max_rounds: usize,
    ) -> Result<Vec<String>, crate::llm::LlmError> {
        let messages = vec![Message::system(system), Message::user(user)];
        let tools = vfs_tool_specs();
        let mut handler = VfsToolHandler::new(&mut session.vfs);
        let reply = self
            .llm
            .complete_with_tools(messages, &tools, &mut handler, max_rounds)
            .await?;
        tracing::debug!(session_id = %session.id, reply = ?reply, "tool edit finished");
        Ok(handler.into_modified())
    }
}

/// 入口文件：导言区 + 按路径排序 \input 所有章节 + 参考文献
pub fn render_main(plan: &FilePlan) -> String {
    let title = if plan.title.is_empty() {
        "Untitled"
    } else {
        plan.title.as_str()
    };
    let includes = plan
        .chapter_paths()
        .iter()
        .map(|p| format!("\\input{{{}}}", p.strip_suffix(".tex").unwrap_or(p)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "\\documentclass[12pt,a4paper]{{article}}\n\
         \\usepackage{{ctex}}\n\
         \\usepackage{{fontspec}}\n\
         \\usepackage{{geometry}}\n\
         \\geometry{{left=2.5cm,right=2.5cm,top=2.5cm,bottom=2.5cm}}\n\
         \\usepackage{{amsmath,amssymb}}\n\
         \\usepackage{{graphicx}}\n\
         \\usepackage{{hyperref}}\n\
         \\usepackage{{natbib}}\n\
         \\usepackage{{setspace}}\n\
         \\onehalfspacing\n\
         \n\
         \\title{{{title}}}\n\
         \\author{{}}\n\
         \\date{{\\today}}\n\
         \n\
         \\begin{{document}}\n\
         \\maketitle\n\
         \n\
         {includes}\n\
         \n\
         \\bibliographystyle{{plainnat}}\n\
         \\bibliography{{refs}}\n\
         \\end{{document}}\n"
    )
}

/// refs.bib：每篇文献一个 @article{refN}，无 LLM 调用
pub fn render_bibliography(literature: &[LiteratureItem]) -> String {
    literature
        .iter()
        .enumerate()
        .map(|(i, lit)| {
            let author = if lit.authors.is_empty() { "Unknown" } else { &lit.authors };
            let year = if lit.year.is_empty() { "2024" } else { &lit.year };
            format!(
                "@article{{ref{},\n  title = {{{}}},\n  author = {{{}}},\n  year = {{{}}}\n}}",
                i + 1,
                lit.title,
                author,
                year
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 去掉模型偶尔包在外面的 ``` 代码块围栏
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return text.to_string();
    }
    let body = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => "",
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    format!("{}\n", body.trim_end())
}

impl Agent for FormatterAgent {
    fn name(&self) -> &'static str {
        "formatter"
    }

    fn run<'a>(&'a self, session: &'a mut PaperSession) -> AgentStream<'a> {
        agent_stream(try_stream! {
            yield AgentEvent::progress(Stage::Formatting, "generating LaTeX files...");

            yield AgentEvent::progress(Stage::Formatting, format!("generating {}...", self.entry));
            let main = render_main(&session.file_plan);
            session.vfs.write(self.entry.clone(), main);

            for path in session.file_plan.chapter_paths() {
                let plan = session.file_plan.outline.get(&path).cloned().unwrap_or_default();
                let content = session.content.get(&path).cloned().unwrap_or_default();
                yield AgentEvent::progress(Stage::Formatting, format!("formatting {path}..."));

                let latex = self.to_latex(&plan.title, &content, &plan.sections).await?;
                session.vfs.write(path, latex);
            }

            yield AgentEvent::progress(Stage::Formatting, format!("generating {BIBLIOGRAPHY_FILE}..."));
            session.vfs.write(BIBLIOGRAPHY_FILE, render_bibliography(&session.literature));

            yield AgentEvent::Result(AgentOutput::Files(session.vfs.list()));
        })
    }
}

impl DocumentRepair for FormatterAgent {
    fn repair<'a>(&'a self, session: &'a mut PaperSession, error_log: &'a str) -> AgentStream<'a> {
        agent_stream(try_stream! {
            yield AgentEvent::progress(Stage::Compiling, "analyzing compile errors...");

            let user = format!(
                "Here is the condensed xelatex error log, locate and fix the problem:\n\n```\n{error_log}\n```"
            );
            let modified = self
                .edit_with_tools(session, REPAIR_SYSTEM_PROMPT, user, self.repair_rounds)
                .await?;
            for file in &modified {
                yield AgentEvent::progress(Stage::Compiling, format!("repaired {file}"));
            }
            yield AgentEvent::Result(AgentOutput::Files(modified));
        })
    }

    fn revise<'a>(&'a self, session: &'a mut PaperSession, instruction: &'a str) -> AgentStream<'a> {
        agent_stream(try_stream! {
            let user = format!("Revise the paper as follows:\n\n{instruction}");
            let modified = self
                .edit_with_tools(session, REVISE_SYSTEM_PROMPT, user, self.revise_rounds)
                .await?;
            for file in &modified {
                yield AgentEvent::progress(Stage::Revising, format!("modified {file}"));
            }
            yield AgentEvent::Result(AgentOutput::Files(modified));
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::core::ChapterPlan;
    use crate::llm::{AssistantTurn, MockLlmClient, ToolCallRequest};

    fn formatter(llm: MockLlmClient) -> FormatterAgent {
        FormatterAgent::new(AgentLlm::new(Arc::new(llm), None, None), "main.tex", 10, 15)
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[test]
    fn test_render_main_inputs_sorted_chapters() {
        let mut plan = FilePlan {
            title: "Paper".into(),
            ..Default::default()
        };
        plan.outline.insert("chapters/02_b.tex".into(), ChapterPlan::default());
        plan.outline.insert("chapters/01_a.tex".into(), ChapterPlan::default());
        let main = render_main(&plan);
        let a = main.find("\\input{chapters/01_a}").unwrap();
        let b = main.find("\\input{chapters/02_b}").unwrap();
        assert!(a < b);
        assert!(main.contains("\\title{Paper}"));
        assert!(main.contains("\\bibliographystyle{plainnat}"));
        assert!(render_main(&FilePlan::default()).contains("\\title{Untitled}"));
    }

    #[test]
    fn test_render_bibliography_defaults() {
        let lit = vec![
            LiteratureItem {
                title: "A".into(),
                authors: "X".into(),
                year: "2020".into(),
                ..Default::default()
            },
            LiteratureItem {
                title: "B".into(),
                ..Default::default()
            },
        ];
        let bib = render_bibliography(&lit);
        assert_eq!(
            bib,
            "@article{ref1,\n  title = {A},\n  author = {X},\n  year = {2020}\n}\n\n\
             @article{ref2,\n  title = {B},\n  author = {Unknown},\n  year = {2024}\n}"
        );
        assert_eq!(render_bibliography(&[]), "");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```latex\n\\section{A}\n```"), "\\section{A}\n");
        assert_eq!(strip_code_fences("```\nx\n```\n"), "x\n");
        assert_eq!(strip_code_fences("plain"), "plain");
    }

    #[tokio::test]
    async fn test_formatter_writes_entry_chapters_and_bib() {
        let fmt = formatter(MockLlmClient::with_responder(|_| {
            Ok(Some("```latex\n\\section{X}\n```".into()))
        }));
        let mut session = PaperSession::new("u", "T");
        session.file_plan.outline.insert("chapters/01_a.tex".into(), ChapterPlan::default());
        session.content.insert("chapters/01_a.tex".into(), "text".into());

        let events: Vec<_> = fmt.run(&mut session).collect().await;
        assert!(events.iter().all(|e| e.is_ok()));
        assert_eq!(session.vfs.list(), vec!["chapters/01_a.tex", "main.tex", "refs.bib"]);
        assert_eq!(session.vfs.read("chapters/01_a.tex"), Some("\\section{X}\n"));
    }

    #[tokio::test]
    async fn test_repair_reports_written_files() {
        let llm = MockLlmClient::new().with_turns(vec![
            AssistantTurn::calls(vec![call("1", "list_files", json!({}))]),
            AssistantTurn::calls(vec![call(
                "2",
                "write_file",
                json!({"path": "main.tex", "content": "fixed"}),
            )]),
            AssistantTurn::text("fixed the brace"),
        ]);
        let fmt = formatter(llm);
        let mut session = PaperSession::new("u", "T");
        session.vfs.write("main.tex", "broken");

        let events: Vec<_> = fmt
            .repair(&mut session, "! Missing } inserted.")
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events[0], AgentEvent::progress(Stage::Compiling, "analyzing compile errors..."));
        assert_eq!(events[1], AgentEvent::progress(Stage::Compiling, "repaired main.tex"));
        assert_eq!(
            events[2],
            AgentEvent::Result(AgentOutput::Files(vec!["main.tex".into()]))
        );
        assert_eq!(session.vfs.read("main.tex"), Some("fixed"));
    }

    #[tokio::test]
    async fn test_revise_without_writes_yields_empty_files() {
        let fmt = formatter(MockLlmClient::new());
        let mut session = PaperSession::new("u", "T");
        let events: Vec<_> = fmt.revise(&mut session, "shorter").collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Ok(AgentEvent::Result(AgentOutput::Files(files))) if files.is_empty()
        ));
    }
}
