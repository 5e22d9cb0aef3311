//! Chat 业务逻辑层
//!
//! 整合 stream-protocol 和 session-store，实现完整的对话流程：
//! 进程管理、stream 解析、费用统计、会话记录、工作区 checkpoint。

mod checkpoint;
mod config;
mod error;
mod interpreter;
mod recorder;
mod service;
mod session;
mod sink;
mod supervisor;

pub use checkpoint::CheckpointManager;
pub use config::{ChatConfig, Model, DEFAULT_CLAUDE_BINARY, KILL_GRACE_PERIOD};
pub use error::{CheckpointError, SupervisorError};
pub use interpreter::{EventInterpreter, RESULT_ERROR_FALLBACK, TOOL_RESULT_PLACEHOLDER};
pub use recorder::ConversationRecorder;
pub use service::{ChatService, TurnHandle, LOADING_MESSAGE, STOPPED_MESSAGE};
pub use session::SessionState;
pub use sink::{CollectingSink, EventSink};
pub use supervisor::{
    build_args, ProcessOutput, ProcessSupervisor, TurnProcess, CLAUDE_NOT_FOUND_MESSAGE,
};
