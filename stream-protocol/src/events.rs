//! UI 事件定义
//!
//! 所有推送给 UI（同时写入会话记录）的事件。
//! 序列化格式为 `{"type": ..., "data": ...}`，与历史会话文件保持兼容。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// 推送给 UI 的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StreamEvent {
    /// 用户输入
    #[serde(rename = "userInput")]
    UserInput(String),

    /// 助手文本输出
    #[serde(rename = "output")]
    Output(String),

    /// 助手思考内容
    #[serde(rename = "thinking")]
    Thinking(String),

    /// 工具调用
    #[serde(rename = "toolUse")]
    ToolUse(ToolUseData),

    /// 工具结果
    #[serde(rename = "toolResult")]
    ToolResult(ToolResultData),

    /// 会话信息
    #[serde(rename = "sessionInfo")]
    SessionInfo(SessionInfoData),

    /// 实时 token 统计
    #[serde(rename = "updateTokens")]
    TokensUpdate(TokensUpdateData),

    /// 累计费用统计
    #[serde(rename = "updateTotals")]
    TotalsUpdate(TotalsUpdateData),

    /// 错误
    #[serde(rename = "error")]
    Error(String),

    /// 需要登录
    #[serde(rename = "loginRequired")]
    LoginRequired,

    /// 可恢复的 checkpoint
    #[serde(rename = "showRestoreOption")]
    RestoreCheckpoint(Checkpoint),

    /// 处理中状态
    #[serde(rename = "setProcessing")]
    ProcessingState(bool),

    /// 加载提示
    #[serde(rename = "loading")]
    Loading(String),

    /// 清除加载提示
    #[serde(rename = "clearLoading")]
    ClearLoading,

    /// 会话已清空
    #[serde(rename = "sessionCleared")]
    SessionCleared,

    /// 会话已恢复
    #[serde(rename = "sessionResumed")]
    SessionResumed(SessionResumedData),

    /// 恢复进度
    #[serde(rename = "restoreProgress")]
    RestoreProgress(String),

    /// 恢复成功
    #[serde(rename = "restoreSuccess")]
    RestoreSuccess(RestoreSuccessData),

    /// 恢复失败
    #[serde(rename = "restoreError")]
    RestoreError(String),
}

impl StreamEvent {
    /// 事件类型名（即序列化后的 `type` 字段）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserInput(_) => "userInput",
            Self::Output(_) => "output",
            Self::Thinking(_) => "thinking",
            Self::ToolUse(_) => "toolUse",
            Self::ToolResult(_) => "toolResult",
            Self::SessionInfo(_) => "sessionInfo",
            Self::TokensUpdate(_) => "updateTokens",
            Self::TotalsUpdate(_) => "updateTotals",
            Self::Error(_) => "error",
            Self::LoginRequired => "loginRequired",
            Self::RestoreCheckpoint(_) => "showRestoreOption",
            Self::ProcessingState(_) => "setProcessing",
            Self::Loading(_) => "loading",
            Self::ClearLoading => "clearLoading",
            Self::SessionCleared => "sessionCleared",
            Self::SessionResumed(_) => "sessionResumed",
            Self::RestoreProgress(_) => "restoreProgress",
            Self::RestoreSuccess(_) => "restoreSuccess",
            Self::RestoreError(_) => "restoreError",
        }
    }

    /// 拆分为 (type, data)，用于写入会话记录
    ///
    /// 无负载的事件 data 为 `Value::Null`。
    pub fn to_parts(&self) -> Result<(String, Value), ProtocolError> {
        let value = serde_json::to_value(self)?;
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::MalformedEvent(format!(
                "{} did not serialize to an object",
                self.kind()
            )));
        };
        let data = map.remove("data").unwrap_or(Value::Null);
        Ok((self.kind().to_string(), data))
    }

    /// 从 (type, data) 还原事件
    pub fn from_parts(kind: &str, data: Value) -> Result<Self, ProtocolError> {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(kind.to_string()));
        if !data.is_null() {
            map.insert("data".to_string(), data);
        }
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    /// 用户输入的文本
    pub fn user_text(&self) -> Option<&str> {
        match self {
            Self::UserInput(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

// ==================== 数据结构 ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseData {
    /// 展示用的标题，例如 `🔧 Executing: Bash`
    pub tool_info: String,
    /// 展示用的输入摘要（目前仅 TodoWrite 有内容）
    #[serde(default)]
    pub tool_input: String,
    /// 原始结构化输入，不做任何修改
    #[serde(default)]
    pub raw_input: Value,
    pub tool_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultData {
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoData {
    pub session_id: String,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensUpdateData {
    pub total_tokens_input: u64,
    pub total_tokens_output: u64,
    pub current_input_tokens: u64,
    pub current_output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsUpdateData {
    pub total_cost: f64,
    pub total_tokens_input: u64,
    pub total_tokens_output: u64,
    pub request_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_cost: Option<f64>,
    /// 本轮耗时（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_turns: Option<u64>,
}

/// 工作区快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub sha: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumedData {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSuccessData {
    pub message: String,
    pub commit_sha: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_matches_transcript_layout() {
        let event = StreamEvent::ProcessingState(true);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "setProcessing", "data": true})
        );

        let event = StreamEvent::SessionInfo(SessionInfoData {
            session_id: "abc123".into(),
            tools: vec![json!("Bash")],
            mcp_servers: vec![],
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "sessionInfo",
                "data": {"sessionId": "abc123", "tools": ["Bash"], "mcpServers": []}
            })
        );
    }

    #[test]
    fn test_kind_matches_serialized_tag() {
        let events = vec![
            StreamEvent::UserInput("hi".into()),
            StreamEvent::LoginRequired,
            StreamEvent::ClearLoading,
            StreamEvent::RestoreError("nope".into()),
            StreamEvent::RestoreCheckpoint(Checkpoint {
                id: "commit-1".into(),
                sha: "deadbeef".into(),
                message: "Before: hi".into(),
                timestamp: "2024-01-01T00:00:00.000Z".into(),
            }),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }

    #[test]
    fn test_parts_restore_unit_and_payload_events() {
        for event in [
            StreamEvent::SessionCleared,
            StreamEvent::Output("hi there".into()),
            StreamEvent::TotalsUpdate(TotalsUpdateData {
                total_cost: 0.5,
                total_tokens_input: 10,
                total_tokens_output: 20,
                request_count: 2,
                current_cost: None,
                current_duration: Some(1200),
                current_turns: None,
            }),
        ] {
            let (kind, data) = event.to_parts().unwrap();
            assert_eq!(StreamEvent::from_parts(&kind, data).unwrap(), event);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(StreamEvent::from_parts("notAnEvent", json!("x")).is_err());
    }
}
