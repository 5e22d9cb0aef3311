//! 最近会话索引
//!
//! 最新在前，按文件名去重，最多保留 [`MAX_INDEX_ENTRIES`] 条。

use serde::{Deserialize, Serialize};

use crate::types::ConversationIndexEntry;

/// 索引最多保留的会话数
pub const MAX_INDEX_ENTRIES: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationIndex {
    entries: Vec<ConversationIndexEntry>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已持久化的列表构建（超出上限的部分丢弃）
    pub fn from_entries(mut entries: Vec<ConversationIndexEntry>) -> Self {
        entries.truncate(MAX_INDEX_ENTRIES);
        Self { entries }
    }

    /// 插入或更新条目，并移到最前
    pub fn upsert(&mut self, entry: ConversationIndexEntry) {
        self.entries.retain(|e| e.filename != entry.filename);
        self.entries.insert(0, entry);
        self.entries.truncate(MAX_INDEX_ENTRIES);
    }

    /// 最近的会话
    pub fn latest(&self) -> Option<&ConversationIndexEntry> {
        self.entries.first()
    }

    pub fn get(&self, filename: &str) -> Option<&ConversationIndexEntry> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    pub fn entries(&self) -> &[ConversationIndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
