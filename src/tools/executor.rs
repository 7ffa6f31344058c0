//! VFS 工具执行器
//!
//! 绑定一个会话的 VFS，按工具名分发到 VfsTool；记录被写入的文件（去重、保序），
//! 每次调用输出一条结构化审计日志（JSON）。工具层错误以文本形式返回给模型，不中断循环。
//! 写入路径必须能安全落到编译目录，否则拒绝写入，让模型换一个路径。

use std::time::Instant;

use serde_json::Value;

use crate::llm::ToolHandler;
use crate::tools::{ReadFileArgs, VfsTool, WriteFileArgs};
use crate::vfs::{is_safe_path, VirtualFileSystem};

pub struct VfsToolHandler<'a> {
    vfs: &'a mut VirtualFileSystem,
    modified: Vec<String>,
}

impl<'a> VfsToolHandler<'a> {
    pub fn new(vfs: &'a mut VirtualFileSystem) -> Self {
        Self {
            vfs,
            modified: Vec::new(),
        }
    }

    /// 本轮被 write_file 写过的文件（首次写入顺序）
    pub fn modified(&self) -> &[String] {
        &self.modified
    }

    pub fn into_modified(self) -> Vec<String> {
        self.modified
    }

    fn dispatch(&mut self, tool: VfsTool, arguments: &Value) -> Result<String, String> {
        match tool {
            VfsTool::ListFiles => {
                let files = self.vfs.list();
                Ok(if files.is_empty() {
                    "(empty)".to_string()
                } else {
                    files.join("\n")
                })
            }
            VfsTool::ReadFile => {
                let args: ReadFileArgs = serde_json::from_value(arguments.clone())
                    .map_err(|e| format!("invalid arguments: {e}"))?;
                self.vfs
                    .read(&args.path)
                    .map(str::to_string)
                    .ok_or_else(|| format!("file {} does not exist", args.path))
            }
            VfsTool::WriteFile => {
                let args: WriteFileArgs = serde_json::from_value(arguments.clone())
                    .map_err(|e| format!("invalid arguments: {e}"))?;
                if !is_safe_path(&args.path) {
                    return Err(format!("invalid path: {} (use a relative path such as chapters/01_intro.tex)", args.path));
                }
                let chars = args.content.chars().count();
                self.vfs.write(args.path.clone(), args.content);
                let msg = format!("wrote {} ({} chars)", args.path, chars);
                if !self.modified.contains(&args.path) {
                    self.modified.push(args.path);
                }
                Ok(msg)
            }
        }
    }
}

impl ToolHandler for VfsToolHandler<'_> {
    fn handle(&mut self, name: &str, arguments: &Value) -> String {
        let start = Instant::now();
        let result = match VfsTool::from_name(name) {
            Some(tool) => self.dispatch(tool, arguments),
            None => Err(format!("unknown tool: {name}")),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "ok": result.is_ok(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(arguments),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(out) => out,
            Err(e) => format!("error: {e}"),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
