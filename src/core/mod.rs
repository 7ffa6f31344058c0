//! 核心编排层：状态机、会话、中间产物、归档恢复与流水线编排

pub mod artifacts;
pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session;
pub mod state;

pub use artifacts::{citation_index, parse_literature, parse_plan, ChapterPlan, FilePlan, LiteratureItem};
pub use builder::{create_pipeline_builder, PipelineBuilder};
pub use error::PaperError;
pub use orchestrator::{PipelineEvent, PipelineService, PipelineSettings, PipelineStream, StatusReport};
pub use recovery::{PaperArchive, ABANDONED_ERROR, ORPHAN_ERROR};
pub use session::{PaperSession, RunGuard, SessionSnapshot, SessionStore};
pub use state::{PaperStatus, Stage};
