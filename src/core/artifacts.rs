//! Agent 中间产物：文献条目、文件规划、章节规划
//!
//! LLM 返回的 JSON 字段类型并不稳定（year 可能是数字或字符串，authors 可能是数组），
//! 反序列化一律宽松处理；整体无法解析时由调用方退回空值而不是报错。

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 章节文件所在目录前缀
pub const CHAPTER_PREFIX: &str = "chapters/";

/// 单篇参考文献
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiteratureItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub authors: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub year: String,
    #[serde(default, rename = "abstract", deserialize_with = "lenient_string")]
    pub summary: String,
}

/// 单章规划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterPlan {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    /// 引用 ID，形如 ref1、ref2（对应 literature 的 1-based 下标）
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default = "default_target_words")]
    pub target_words: u32,
}

fn default_target_words() -> u32 {
    800
}

impl Default for ChapterPlan {
    fn default() -> Self {
        Self {
            title: String::new(),
            sections: Vec::new(),
            key_points: Vec::new(),
            citations: Vec::new(),
            target_words: default_target_words(),
        }
    }
}

/// 论文文件规划：标题、文件清单、章节大纲（按路径有序）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilePlan {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub outline: BTreeMap<String, ChapterPlan>,
}

impl FilePlan {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.files.is_empty() && self.outline.is_empty()
    }

    /// 章节文件路径，按路径字典序（文件名带 01_、02_ 序号前缀）
    pub fn chapter_paths(&self) -> Vec<String> {
        self.outline
            .keys()
            .filter(|k| k.starts_with(CHAPTER_PREFIX))
            .cloned()
            .collect()
    }
}

/// 把 `refN` 解析为 literature 下标；格式不对或越界返回 None
pub fn citation_index(ref_id: &str, literature_len: usize) -> Option<usize> {
    let n: usize = ref_id.trim().strip_prefix("ref")?.parse().ok()?;
    (1..=literature_len).contains(&n).then(|| n - 1)
}

/// 从 LLM 文本中截取第一个 `[` 到最后一个 `]` 并解析为文献列表，失败返回空
pub fn parse_literature(response: Option<&str>) -> Vec<LiteratureItem> {
    extract_between(response, '[', ']')
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default()
}

/// 从 LLM 文本中截取第一个 `{` 到最后一个 `}` 并解析为规划，失败返回空规划
pub fn parse_plan(response: Option<&str>) -> FilePlan {
    extract_between(response, '{', '}')
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default()
}

fn extract_between(response: Option<&str>, open: char, close: char) -> Option<&str> {
    let text = response?;
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// 接受字符串 / 数字 / 字符串数组 / null，统一转成字符串（数组用 " and " 连接，符合 BibTeX 作者格式）
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" and "),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literature_lenient_fields() {
        let text = r#"Here you go:
[{"title": "A", "authors": ["X", "Y"], "year": 2020, "abstract": "s"},
 {"title": "B"}]
thanks"#;
        let items = parse_literature(Some(text));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].authors, "X and Y");
        assert_eq!(items[0].year, "2020");
        assert_eq!(items[0].summary, "s");
        assert_eq!(items[1].authors, "");
    }

    #[test]
    fn test_parse_literature_failures_are_empty() {
        assert!(parse_literature(None).is_empty());
        assert!(parse_literature(Some("no json here")).is_empty());
        assert!(parse_literature(Some("[not valid")).is_empty());
        assert!(parse_literature(Some("] backwards [")).is_empty());
    }

    #[test]
    fn test_parse_plan_and_chapter_order() {
        let text = r#"```json
{"title": "T", "files": {"main.tex": "entry"},
 "outline": {
   "chapters/02_b.tex": {"title": "B"},
   "chapters/01_a.tex": {"title": "A", "citations": ["ref1"]},
   "appendix.tex": {"title": "X"}
 }}
```"#;
        let plan = parse_plan(Some(text));
        assert_eq!(plan.title, "T");
        assert_eq!(plan.chapter_paths(), vec!["chapters/01_a.tex", "chapters/02_b.tex"]);
        assert_eq!(plan.outline["chapters/02_b.tex"].target_words, 800);
    }

    #[test]
    fn test_parse_plan_malformed_is_empty() {
        assert!(parse_plan(Some("{oops")).is_empty());
        assert!(parse_plan(None).is_empty());
        assert!(parse_plan(Some(r#"{"outline": 5}"#)).is_empty());
    }

    #[test]
    fn test_citation_index_bounds() {
        assert_eq!(citation_index("ref1", 3), Some(0));
        assert_eq!(citation_index("ref3", 3), Some(2));
        assert_eq!(citation_index("ref4", 3), None);
        assert_eq!(citation_index("ref0", 3), None);
        assert_eq!(citation_index("refX", 3), None);
        assert_eq!(citation_index("cite1", 3), None);
    }
}
