//! Stream 协议模块
//!
//! Claude CLI `--output-format stream-json` 的解析层：
//! - stdout 行协议（按 type/subtype 区分的和类型）
//! - 推送给 UI 的事件
//! - 跨 chunk 的行缓冲解析器

mod error;
mod events;
mod parser;
mod protocol;

pub use error::ProtocolError;
pub use events::{
    Checkpoint, RestoreSuccessData, SessionInfoData, SessionResumedData, StreamEvent,
    TokensUpdateData, ToolResultData, ToolUseData, TotalsUpdateData,
};
pub use parser::LineParser;
pub use protocol::{
    AssistantMessage, CliMessage, ContentBlock, ResultSuccess, SystemInit, TodoItem, TodoStatus,
    Usage, UserMessage, INVALID_API_KEY_MARKER, TODO_TOOL_NAME,
};
