//! 面向修复子 Agent 的 VFS 工具集
//!
//! 只有三种操作：list_files / read_file / write_file，封闭枚举 + 名字到变体的显式映射，
//! 子 Agent 按需读取单个文件而不是拿到整棵文档树。

use schemars::JsonSchema;
use serde::Deserialize;

use crate::llm::ToolSpec;
use crate::tools::schema::{empty_object_schema, parameters_schema};

/// read_file 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// 文件路径，如 main.tex 或 chapters/01_intro.tex
    pub path: String,
}

/// write_file 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// 文件路径
    pub path: String,
    /// 修改后的完整文件内容
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsTool {
    ListFiles,
    ReadFile,
    WriteFile,
}

impl VfsTool {
    pub const ALL: [VfsTool; 3] = [Self::ListFiles, Self::ReadFile, Self::WriteFile];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ListFiles => "list_files",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ListFiles => "List every file path in the paper's virtual filesystem",
            Self::ReadFile => "Read the full content of one file",
            Self::WriteFile => "Overwrite one file with its complete new content",
        }
    }

    pub fn spec(&self) -> ToolSpec {
        let parameters = match self {
            Self::ListFiles => empty_object_schema(),
            Self::ReadFile => parameters_schema::<ReadFileArgs>(),
            Self::WriteFile => parameters_schema::<WriteFileArgs>(),
        };
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters,
        }
    }
}

/// 三个工具的完整定义，按固定顺序
pub fn vfs_tool_specs() -> Vec<ToolSpec> {
    VfsTool::ALL.iter().map(VfsTool::spec).collect()
}
