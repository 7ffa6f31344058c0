//! 研究员：根据主题生成模拟文献列表与文献综述摘要
//!
//! 文献解析失败得到空列表，不报错；只有 LLM 传输层错误会终止阶段。

use async_stream::try_stream;

use crate::agents::{agent_stream, Agent, AgentEvent, AgentLlm, AgentOutput, AgentStream};
use crate::core::{parse_literature, PaperSession, Stage};

pub struct ResearcherAgent {
    llm: AgentLlm,
    /// 写进 prompt 的文献数量描述，如 "8-10"
    literature_count: String,
}

impl ResearcherAgent {
    pub fn new(llm: AgentLlm, literature_count: impl Into<String>) -> Self {
        Self {
            llm,
            literature_count: literature_count.into(),
        }
    }

    fn literature_prompt(&self, topic: &str) -> String {
        format!(
            "Generate {} simulated references for the research topic \"{}\".\n\
             Each item has: title, authors, year, abstract (under 50 words).\n\
             Return a JSON array only.",
            self.literature_count, topic
        )
    }
}

fn summary_prompt(topic: &str, literature_json: &str) -> String {
    format!(
        "Based on the references below, write a 500-word literature review summary for the topic \"{topic}\":\n\
         {literature_json}\n\
         Identify research trends, method categories and open gaps."
    )
}

impl Agent for ResearcherAgent {
    fn name(&self) -> &'static str {
        "researcher"
    }

    fn run<'a>(&'a self, session: &'a mut PaperSession) -> AgentStream<'a> {
        agent_stream(try_stream! {
            yield AgentEvent::progress(Stage::Researching, "searching related literature...");

            let response = self.llm.ask(self.literature_prompt(&session.topic)).await?;
            session.literature = parse_literature(response.as_deref());
            tracing::debug!(session_id = %session.id, count = session.literature.len(), "literature parsed");

            yield AgentEvent::progress(Stage::Researching, "synthesizing literature...");

            let literature_json = serde_json::to_string(&session.literature)?;
            let summary = self.llm.ask(summary_prompt(&session.topic, &literature_json)).await?;
            session.literature_summary = summary.unwrap_or_default();

            yield AgentEvent::Result(AgentOutput::Literature(session.literature.clone()));
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::StreamExt;

    use super::*;
    use crate::llm::{LlmError, MockLlmClient};

    fn agent(llm: MockLlmClient) -> ResearcherAgent {
        ResearcherAgent::new(AgentLlm::new(Arc::new(llm), None, None), "8-10")
    }

    #[tokio::test]
    async fn test_researcher_fills_literature_and_summary() {
        let researcher = agent(MockLlmClient::new());
        let mut session = PaperSession::new("u", "T");
        let events: Vec<_> = researcher.run(&mut session).collect().await;

        assert_eq!(events.len(), 3);
        assert!(matches!(
            events.last(),
            Some(Ok(AgentEvent::Result(AgentOutput::Literature(items)))) if items.len() == 3
        ));
        assert_eq!(session.literature[1].authors, "He and Zhang");
        assert_eq!(session.literature[0].year, "2017");
        assert!(!session.literature_summary.is_empty());
    }

    #[tokio::test]
    async fn test_researcher_tolerates_garbage_output() {
        let researcher = agent(MockLlmClient::with_responder(|_| Ok(Some("no json".into()))));
        let mut session = PaperSession::new("u", "T");
        let events: Vec<_> = researcher.run(&mut session).collect().await;
        assert!(events.iter().all(|e| e.is_ok()));
        assert!(session.literature.is_empty());
        assert_eq!(session.literature_summary, "no json");
    }

    #[tokio::test]
    async fn test_researcher_propagates_transport_error() {
        let researcher = agent(MockLlmClient::with_responder(|_| Err(LlmError::Timeout)));
        let mut session = PaperSession::new("u", "T");
        let mut stream = researcher.run(&mut session);
        assert!(matches!(stream.next().await, Some(Ok(AgentEvent::Progress { .. }))));
        assert!(matches!(stream.next().await, Some(Err(_))));
        assert!(stream.next().await.is_none());
    }
}
