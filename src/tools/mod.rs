//! 工具箱：修复 / 修订子 Agent 使用的 VFS 工具、参数 Schema 与执行器

pub mod executor;
pub mod schema;
pub mod vfs_tools;

pub use executor::VfsToolHandler;
pub use schema::{empty_object_schema, parameters_schema};
pub use vfs_tools::{vfs_tool_specs, ReadFileArgs, VfsTool, WriteFileArgs};
