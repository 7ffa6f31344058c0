//! Quill - 论文生成命令行
//!
//! 用法：
//! - `quill generate <user_id> <topic...>`  生成论文，逐行输出 JSON 事件
//! - `quill revise <paper_id> <instruction...>`  按指令修订已有论文
//! - `quill status <paper_id>`
//! - `quill list <user_id> [limit]`
//!
//! 配置：config/default.toml，或通过 QUILL_CONFIG 指定文件；QUILL__* 环境变量覆盖。

use anyhow::{bail, Context};
use futures_util::StreamExt;
use quill::core::{create_pipeline_builder, PipelineService, PipelineStream};

const USAGE: &str = "usage:
  quill generate <user_id> <topic...>
  quill revise <paper_id> <instruction...>
  quill status <paper_id>
  quill list <user_id> [limit]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quill::observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        bail!(USAGE);
    };

    let config_path = std::env::var("QUILL_CONFIG").ok().map(Into::into);
    let service = create_pipeline_builder(config_path)
        .build()
        .await
        .context("Failed to build paper pipeline")?;

    match (command.as_str(), rest) {
        ("generate", [user_id, topic @ ..]) if !topic.is_empty() => {
            let failed = print_events(service.generate(user_id, &topic.join(" "))).await?;
            if failed {
                std::process::exit(1);
            }
        }
        ("revise", [paper_id, instruction @ ..]) if !instruction.is_empty() => {
            let failed = print_events(service.revise(paper_id, &instruction.join(" "))).await?;
            if failed {
                std::process::exit(1);
            }
        }
        ("status", [paper_id]) => print_status(&service, paper_id).await?,
        ("list", [user_id, limit @ ..]) => {
            let limit = match limit.first() {
                Some(n) => n.parse().context("limit must be a number")?,
                None => 20,
            };
            let papers = service
                .list_papers(user_id, limit)
                .await
                .context("Failed to list papers")?;
            for paper in papers {
                println!("{}", serde_json::to_string(&paper)?);
            }
        }
        _ => bail!(USAGE),
    }

    Ok(())
}

/// 逐条拉取事件并按 JSON 行输出；返回是否以 error 事件结束
async fn print_events(mut events: PipelineStream) -> anyhow::Result<bool> {
    let mut failed = false;
    while let Some(event) = events.next().await {
        failed = matches!(event, quill::PipelineEvent::Error { .. });
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(failed)
}

async fn print_status(service: &PipelineService, paper_id: &str) -> anyhow::Result<()> {
    match service.status(paper_id).await.context("Failed to query status")? {
        Some(report) => println!("{}", serde_json::to_string(&report)?),
        None => bail!("paper not found: {paper_id}"),
    }
    Ok(())
}
