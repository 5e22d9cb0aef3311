//! Session Store - 会话记录持久化层
//!
//! 提供：
//! - 会话记录文件（每个会话一个 JSON 文件）
//! - 最近会话索引（最多 50 条，最新在前）
//! - 工作区 key/value 状态

mod error;
mod index;
mod state;
mod transcript;
mod types;

pub use error::StoreError;
pub use index::{ConversationIndex, MAX_INDEX_ENTRIES};
pub use state::{WorkspaceState, CONVERSATION_INDEX_KEY, SELECTED_MODEL_KEY};
pub use transcript::{conversation_filename, TranscriptStore};
pub use types::*;
