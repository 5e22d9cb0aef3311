//! Claude CLI stdout 行协议
//!
//! 每行一个 JSON 对象，按 `type` / `subtype` 解码为 [`CliMessage`]。
//! 解码是宽松的：未知字段忽略，缺失的可选字段取默认值，
//! 无法识别的结构归入 [`CliMessage::Other`]，不会中断解析。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

/// `result.result` 中表示凭证失效的标记（大小写敏感）
pub const INVALID_API_KEY_MARKER: &str = "Invalid API key";

/// 待办列表工具名
pub const TODO_TOOL_NAME: &str = "TodoWrite";

/// stdout 上的一条消息
#[derive(Debug, Clone, PartialEq)]
pub enum CliMessage {
    /// `system` / `init`
    SystemInit(SystemInit),
    /// `assistant`
    Assistant(AssistantMessage),
    /// `user`
    User(UserMessage),
    /// `result` / `success`
    ResultSuccess(ResultSuccess),
    /// 其他任意组合
    Other {
        kind: String,
        subtype: Option<String>,
    },
}

impl CliMessage {
    /// 从一行已解析的 JSON 解码
    pub fn decode(value: Value) -> Self {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let subtype = value
            .get("subtype")
            .and_then(Value::as_str)
            .map(str::to_string);

        let decoded = match (kind.as_str(), subtype.as_deref()) {
            ("system", Some("init")) => serde_json::from_value(value).map(Self::SystemInit),
            ("assistant", _) => {
                serde_json::from_value::<Envelope<AssistantMessage>>(value).map(|e| Self::Assistant(e.message))
            }
            ("user", _) => {
                serde_json::from_value::<Envelope<UserMessage>>(value).map(|e| Self::User(e.message))
            }
            ("result", Some("success")) => serde_json::from_value(value).map(Self::ResultSuccess),
            _ => return Self::Other { kind, subtype },
        };

        match decoded {
            Ok(message) => message,
            Err(e) => {
                debug!(%kind, ?subtype, error = %e, "Undecodable stream message, ignoring");
                Self::Other { kind, subtype }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    message: T,
}

// ==================== 消息结构 ====================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemInit {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tools: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default, deserialize_with = "lenient_blocks")]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserMessage {
    /// 纯文本的用户消息（content 为字符串）在这里为空
    #[serde(default, deserialize_with = "lenient_blocks")]
    pub content: Vec<ContentBlock>,
}

/// token 用量（本条消息的增量）
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultSuccess {
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u64>,
}

impl ResultSuccess {
    /// 是否为 API key 失效导致的失败
    pub fn is_login_failure(&self) -> bool {
        self.is_error
            && self
                .result
                .as_deref()
                .is_some_and(|text| text.contains(INVALID_API_KEY_MARKER))
    }
}

/// 消息内容块
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// 单个内容块解码失败时只丢弃该块
fn lenient_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };

    Ok(items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).unwrap_or_else(|e| {
                debug!(error = %e, "Undecodable content block");
                ContentBlock::Unknown
            })
        })
        .collect())
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

// ==================== TodoWrite ====================

/// 待办状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Completed => "✅",
            Self::InProgress => "🔄",
            Self::Pending => "⏳",
        }
    }
}

/// TodoWrite 工具输入中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: Option<String>,
}

impl TodoItem {
    /// 从 TodoWrite 的原始输入中读取列表；结构不符时返回 None
    pub fn list_from_input(input: &Value) -> Option<Vec<TodoItem>> {
        let todos = input.get("todos")?;
        serde_json::from_value(todos.clone()).ok()
    }
}
