//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `QUILL__*` 覆盖（双下划线表示嵌套，如 `QUILL__COMPILER__KIND=remote`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub paper: PaperSection,
    pub compiler: CompilerSection,
    pub storage: StorageSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 数据目录（SQLite 库与本地对象存储默认放在这里）
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [llm] 段：后端选择、采样参数与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / mock；没有可用 Key 时回退到 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 不设置时读 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.7,
            max_tokens: 8192,
            request_timeout_secs: 120,
        }
    }
}

/// [paper] 段：论文流水线参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperSection {
    /// 论文专用 API Key，留空走 [llm] 的默认 Key
    pub api_key: Option<String>,
    pub models: PaperModels,
    pub max_repair_rounds: usize,
    /// 自动修复的工具调用轮数上限
    pub repair_tool_rounds: usize,
    /// 用户修订的工具调用轮数上限
    pub revise_tool_rounds: usize,
    /// 编译入口文件
    pub entry: String,
    /// 写手参考的前序章节摘要数
    pub summary_window: usize,
    /// 研究员生成的文献数量（写进 prompt，如 "8-10"）
    pub literature_count: String,
}

impl Default for PaperSection {
    fn default() -> Self {
        Self {
            api_key: None,
            models: PaperModels::default(),
            max_repair_rounds: 3,
            repair_tool_rounds: 10,
            revise_tool_rounds: 15,
            entry: "main.tex".to_string(),
            summary_window: 3,
            literature_count: "8-10".to_string(),
        }
    }
}

/// [paper.models] 段：每个 Agent 独立的模型，留空用 [llm].model
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PaperModels {
    pub researcher: Option<String>,
    pub planner: Option<String>,
    pub writer: Option<String>,
    pub formatter: Option<String>,
}

/// [compiler] 段：本地工具链或远程编译服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerSection {
    /// local / remote
    pub kind: String,
    pub engine: String,
    pub bibliography: String,
    pub pass_timeout_secs: u64,
    pub bibliography_timeout_secs: u64,
    pub remote: RemoteCompilerSection,
}

impl Default for CompilerSection {
    fn default() -> Self {
        Self {
            kind: "local".to_string(),
            engine: "xelatex".to_string(),
            bibliography: "bibtex".to_string(),
            pass_timeout_secs: 120,
            bibliography_timeout_secs: 60,
            remote: RemoteCompilerSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteCompilerSection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteCompilerSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: 300,
        }
    }
}

/// [storage] 段：对象存储目录与论文记录库
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// 本地对象存储根目录，未设置时用 `<data_dir>/blobs`
    pub blob_root: Option<PathBuf>,
    /// 对外访问对象的 URL 前缀
    pub public_base_url: Option<String>,
    /// SQLite 连接串；"memory" 表示使用内存记录存储
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn blob_root(&self) -> PathBuf {
        self.storage
            .blob_root
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("blobs"))
    }

    pub fn database_url(&self) -> String {
        self.storage
            .database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite:{}?mode=rwc", self.app.data_dir.join("papers.db").display()))
    }
}

/// 从 config 目录加载配置，环境变量 QUILL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 QUILL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("QUILL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
