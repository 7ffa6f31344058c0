//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 默认按 prompt 关键词返回固定的文献 / 规划 / 章节 / LaTeX 内容，整条 pipeline 可在本地跑通；
//! 也可注入自定义 responder 与预设的工具调用轮次，并统计调用次数供断言。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{AssistantTurn, CompletionOptions, LlmClient, LlmError, Message, Role, ToolSpec};

type Responder = Box<dyn Fn(&[Message]) -> Result<Option<String>, LlmError> + Send + Sync>;

/// Mock 客户端
pub struct MockLlmClient {
    responder: Responder,
    turns: Mutex<VecDeque<AssistantTurn>>,
    complete_calls: AtomicUsize,
    tool_turn_calls: AtomicUsize,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    /// 使用内置的论文素材应答
    pub fn new() -> Self {
        Self::with_responder(|messages| Ok(Some(canned_reply(last_user(messages)))))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[Message]) -> Result<Option<String>, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            turns: Mutex::new(VecDeque::new()),
            complete_calls: AtomicUsize::new(0),
            tool_turn_calls: AtomicUsize::new(0),
        }
    }

    /// 预设 chat_with_tools 的返回（按顺序消费，耗尽后返回纯文本 "done"）
    pub fn with_turns(self, turns: Vec<AssistantTurn>) -> Self {
        if let Ok(mut queue) = self.turns.lock() {
            queue.extend(turns);
        }
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn tool_turn_calls(&self) -> usize {
        self.tool_turn_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<Option<String>, LlmError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(messages)
    }

    async fn chat_with_tools(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
        _options: &CompletionOptions,
    ) -> Result<AssistantTurn, LlmError> {
        self.tool_turn_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.turns.lock().ok().and_then(|mut q| q.pop_front());
        Ok(next.unwrap_or_else(|| AssistantTurn::text("done")))
    }
}

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

fn canned_reply(prompt: &str) -> String {
    if prompt.contains("simulated references") {
        r#"[
  {"title": "Attention Is All You Need", "authors": "Vaswani et al.", "year": 2017, "abstract": "Transformer architecture."},
  {"title": "Deep Residual Learning", "authors": ["He", "Zhang"], "year": "2016", "abstract": "Residual networks."},
  {"title": "BERT", "authors": "Devlin et al.", "year": 2019, "abstract": "Bidirectional pre-training."}
]"#
        .to_string()
    } else if prompt.contains("Plan the complete file structure") {
        r#"{
  "title": "A Survey of Mock Topics",
  "files": {
    "main.tex": "entry",
    "chapters/01_intro.tex": "introduction",
    "chapters/02_method.tex": "method",
    "refs.bib": "references"
  },
  "outline": {
    "chapters/01_intro.tex": {"title": "Introduction", "sections": ["Background", "Motivation"], "key_points": ["context"], "citations": ["ref1", "ref2"], "target_words": 400},
    "chapters/02_method.tex": {"title": "Method", "sections": ["Design"], "key_points": ["approach"], "citations": ["ref3"], "target_words": 400}
  }
}"#
        .to_string()
    } else if prompt.contains("Summarize the core content") {
        "This chapter sets the scene.".to_string()
    } else if prompt.contains("literature review summary") {
        "Research trends converge on attention-based models.".to_string()
    } else if prompt.contains("Convert the following plain text into LaTeX") {
        "\\section{Mock}\nMock paragraph \\cite{ref1}.\n".to_string()
    } else {
        "Mock chapter prose citing [ref1].".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let llm = MockLlmClient::new();
        let out = llm
            .complete(&[Message::user("anything")], &CompletionOptions::default())
            .await
            .unwrap();
        assert!(out.is_some());
        assert_eq!(llm.complete_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_turns_are_consumed_in_order() {
        let llm = MockLlmClient::new().with_turns(vec![AssistantTurn::text("first")]);
        let opts = CompletionOptions::default();
        let first = llm.chat_with_tools(&[], &[], &opts).await.unwrap();
        let second = llm.chat_with_tools(&[], &[], &opts).await.unwrap();
        assert_eq!(first.content.as_deref(), Some("first"));
        assert_eq!(second.content.as_deref(), Some("done"));
        assert_eq!(llm.tool_turn_calls(), 2);
    }
}
