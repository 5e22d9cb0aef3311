//! 领域类型定义
//!
//! 会话记录文件与索引的结构，字段名与历史文件保持一致（camelCase）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stream_protocol::{ProtocolError, StreamEvent};

/// 索引中首条/末条用户消息的最大长度（字符）
pub const INDEX_MESSAGE_PREVIEW_CHARS: usize = 100;

/// 会话日志中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedMessage {
    pub timestamp: DateTime<Utc>,
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
}

impl LoggedMessage {
    /// 从事件构建
    pub fn from_event(event: &StreamEvent, timestamp: DateTime<Utc>) -> Result<Self, ProtocolError> {
        let (message_type, data) = event.to_parts()?;
        Ok(Self {
            timestamp,
            message_type,
            data,
        })
    }

    /// 还原为事件
    pub fn to_event(&self) -> Result<StreamEvent, ProtocolError> {
        StreamEvent::from_parts(&self.message_type, self.data.clone())
    }

    /// 用户输入的文本
    pub fn user_text(&self) -> Option<&str> {
        if self.message_type == "userInput" {
            self.data.as_str()
        } else {
            None
        }
    }
}

/// 累计 token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

/// 会话记录（一个文件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    #[serde(default)]
    pub session_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_tokens: TokenTotals,
    /// 旧文件中没有该字段
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub messages: Vec<LoggedMessage>,
    pub filename: String,
}

impl ConversationRecord {
    /// 第一条用户消息
    pub fn first_user_message(&self) -> Option<&str> {
        self.messages.iter().find_map(LoggedMessage::user_text)
    }

    /// 最后一条用户消息
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(LoggedMessage::user_text)
    }
}

/// 会话索引条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationIndexEntry {
    pub filename: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub first_user_message: String,
    #[serde(default)]
    pub last_user_message: String,
}

impl ConversationIndexEntry {
    /// 根据完整记录重新计算索引条目
    pub fn from_record(record: &ConversationRecord) -> Self {
        let first = record.first_user_message().unwrap_or("No user message");
        let last = record.last_user_message().unwrap_or(first);

        Self {
            filename: record.filename.clone(),
            session_id: record.session_id.clone(),
            start_time: record.start_time,
            end_time: record.end_time,
            message_count: record.message_count,
            total_cost: record.total_cost,
            first_user_message: preview(first),
            last_user_message: preview(last),
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(INDEX_MESSAGE_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(kind: &str, data: Value) -> LoggedMessage {
        LoggedMessage {
            timestamp: Utc::now(),
            message_type: kind.to_string(),
            data,
        }
    }

    #[test]
    fn test_index_entry_previews_user_messages() {
        let long = "x".repeat(150);
        let record = ConversationRecord {
            session_id: Some("abc".into()),
            start_time: Utc::now(),
            end_time: Utc::now(),
            message_count: 3,
            total_cost: 0.25,
            total_tokens: TokenTotals::default(),
            request_count: 1,
            messages: vec![
                message("userInput", json!("first question")),
                message("output", json!("answer")),
                message("userInput", json!(long)),
            ],
            filename: "2024-01-01_10-00_first-question.json".into(),
        };

        let entry = ConversationIndexEntry::from_record(&record);
        assert_eq!(entry.first_user_message, "first question");
        assert_eq!(entry.last_user_message.chars().count(), INDEX_MESSAGE_PREVIEW_CHARS);
        assert_eq!(entry.session_id.as_deref(), Some("abc"));
        assert_eq!(entry.total_cost, 0.25);
    }

    #[test]
    fn test_index_entry_without_user_messages() {
        let record = ConversationRecord {
            session_id: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            message_count: 1,
            total_cost: 0.0,
            total_tokens: TokenTotals::default(),
            request_count: 0,
            messages: vec![message("error", json!("boom"))],
            filename: "f.json".into(),
        };
        let entry = ConversationIndexEntry::from_record(&record);
        assert_eq!(entry.first_user_message, "No user message");
        assert_eq!(entry.last_user_message, "No user message");
    }

    #[test]
    fn test_logged_message_event_round_trip() {
        let event = StreamEvent::ProcessingState(false);
        let logged = LoggedMessage::from_event(&event, Utc::now()).unwrap();
        assert_eq!(logged.message_type, "setProcessing");
        assert_eq!(logged.to_event().unwrap(), event);
    }

    #[test]
    fn test_record_reads_legacy_file_without_request_count() {
        let record: ConversationRecord = serde_json::from_value(json!({
            "sessionId": "abc",
            "startTime": "2024-05-01T10:20:30.123Z",
            "endTime": "2024-05-01T10:25:00.000Z",
            "messageCount": 1,
            "totalCost": 0.01,
            "totalTokens": {"input": 5, "output": 6},
            "messages": [
                {"timestamp": "2024-05-01T10:20:30.123Z", "messageType": "userInput", "data": "hi"}
            ],
            "filename": "2024-05-01_10-20_hi.json"
        }))
        .unwrap();
        assert_eq!(record.request_count, 0);
        assert_eq!(record.total_tokens, TokenTotals { input: 5, output: 6 });
        assert_eq!(record.first_user_message(), Some("hi"));
    }
}
