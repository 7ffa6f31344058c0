//! 虚拟文件系统（VFS）
//!
//! 纯内存的「相对路径 -> 文本内容」映射，论文生成过程中所有 LaTeX 源文件先写到这里，
//! 编译时整体快照交给 Compiler；持久化时序列化为 JSON（再 gzip 上传）。
//!
//! 内部用 BTreeMap 存储，因此 serialize 的输出与插入顺序无关（键有序），
//! `serialize(deserialize(s)) == s` 对任何由 serialize 产生的快照成立。
//! 不做并发保护：同一时刻只由持有该会话的运行任务修改。

use std::collections::BTreeMap;
use std::path::{Component, Path};

/// 能否安全落到编译目录：非空、相对、不含 `..`
pub fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// 纯内存文件系统：key = 相对路径，value = 完整文件内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualFileSystem {
    files: BTreeMap<String, String>,
}

impl VirtualFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入（存在则覆盖）
    pub fn write(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn read(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// 删除文件，返回是否真的存在过
    pub fn delete(&mut self, path: &str) -> bool {
        self.files.remove(path).is_some()
    }

    pub fn list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    /// 防御性拷贝：编译器拿到的是独立副本，编译期间 VFS 仍可被修复流程修改
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.files.clone()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// 序列化为 JSON 对象文本（非 ASCII 原样保留，不转义）
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.files)
    }

    /// 从 JSON 对象文本恢复
    pub fn deserialize(data: &str) -> Result<Self, serde_json::Error> {
        let files: BTreeMap<String, String> = serde_json::from_str(data)?;
        Ok(Self { files })
    }
}

impl From<BTreeMap<String, String>> for VirtualFileSystem {
    fn from(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }
}
