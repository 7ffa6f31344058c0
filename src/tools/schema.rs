//! 工具参数 JSON Schema 生成（schemars 从参数结构体自动派生）
//!
//! 生成结果直接作为 function calling 的 `parameters`，去掉顶层的 `$schema` / `title` 元信息。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 返回参数类型 T 的 JSON Schema（对象形式）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| empty_object_schema());
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
    }
    value
}

/// 无参数工具的 Schema
pub fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {}, "required": [] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Args {
        /// 文件路径
        path: String,
    }

    #[test]
    fn test_schema_has_required_path_without_meta() {
        let schema = parameters_schema::<Args>();
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["required"][0], "path");
    }
}
