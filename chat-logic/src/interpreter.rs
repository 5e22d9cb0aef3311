//! stream 消息解释器
//!
//! 把 CLI 的一条消息翻译为零个或多个 [`StreamEvent`]，同时更新 [`SessionState`]。
//! 不做任何 IO，由调用方负责把事件交给 recorder。

use serde_json::Value;
use tracing::{debug, info, warn};

use stream_protocol::{
    AssistantMessage, CliMessage, ContentBlock, ResultSuccess, SessionInfoData, StreamEvent,
    TodoItem, ToolResultData, ToolUseData, UserMessage, TODO_TOOL_NAME,
};

use crate::session::SessionState;

/// tool_result 没有内容时显示的占位文本
pub const TOOL_RESULT_PLACEHOLDER: &str = "Tool executed successfully";

/// 出错的 result 没有说明文字时显示的文本
pub const RESULT_ERROR_FALLBACK: &str = "Claude reported an error";

#[derive(Debug, Default, Clone, Copy)]
pub struct EventInterpreter;

impl EventInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// 处理一条消息
    pub fn handle(&self, message: CliMessage, state: &mut SessionState) -> Vec<StreamEvent> {
        match message {
            CliMessage::SystemInit(init) => {
                debug!(session_id = ?init.session_id, "[Interpreter] System initialized");
                Vec::new()
            }
            CliMessage::Assistant(message) => self.handle_assistant(message, state),
            CliMessage::User(message) => self.handle_user(message),
            CliMessage::ResultSuccess(result) => self.handle_result(result, state),
            CliMessage::Other { kind, subtype } => {
                debug!(%kind, ?subtype, "[Interpreter] Ignoring message");
                Vec::new()
            }
        }
    }

    fn handle_assistant(&self, message: AssistantMessage, state: &mut SessionState) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(usage) = &message.usage {
            events.push(StreamEvent::TokensUpdate(state.add_usage(usage)));
        }

        for block in message.content {
            match block {
                ContentBlock::Text { text } => {
                    let text = text.trim();
                    if !text.is_empty() {
                        events.push(StreamEvent::Output(text.to_string()));
                    }
                }
                ContentBlock::Thinking { thinking } => {
                    let thinking = thinking.trim();
                    if !thinking.is_empty() {
                        events.push(StreamEvent::Thinking(thinking.to_string()));
                    }
                }
                ContentBlock::ToolUse { name, input, .. } => {
                    events.push(StreamEvent::ToolUse(tool_use_data(name, input)));
                }
                ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
            }
        }

        events
    }

    fn handle_user(&self, message: UserMessage) -> Vec<StreamEvent> {
        message
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult {
                    content,
                    is_error,
                    tool_use_id,
                } => Some(StreamEvent::ToolResult(ToolResultData {
                    content: if is_empty_content(&content) {
                        Value::String(TOOL_RESULT_PLACEHOLDER.to_string())
                    } else {
                        content
                    },
                    is_error: is_error.unwrap_or(false),
                    tool_use_id,
                })),
                _ => None,
            })
            .collect()
    }

    fn handle_result(&self, result: ResultSuccess, state: &mut SessionState) -> Vec<StreamEvent> {
        // 登录失败优先于计费
        if result.is_login_failure() {
            warn!("[Interpreter] Invalid API key, login required");
            return vec![StreamEvent::ProcessingState(false), StreamEvent::LoginRequired];
        }

        let mut events = Vec::new();

        if let Some(session_id) = result.session_id.clone() {
            match state.session_id.as_deref() {
                None => info!("[Interpreter] New session established: {}", session_id),
                Some(current) if current != session_id => {
                    info!("[Interpreter] Session rotated: {} -> {}", current, session_id)
                }
                Some(_) => {}
            }
            state.session_id = Some(session_id.clone());
            events.push(StreamEvent::SessionInfo(SessionInfoData {
                session_id,
                tools: result.tools.clone(),
                mcp_servers: result.mcp_servers.clone(),
            }));
        }

        if result.is_error {
            let message = result
                .result
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .unwrap_or(RESULT_ERROR_FALLBACK);
            warn!("[Interpreter] Claude reported an error: {}", message);
            events.push(StreamEvent::Error(message.to_string()));
        }

        events.push(StreamEvent::ProcessingState(false));

        let totals = state.complete_request(&result);
        info!(
            cost = ?result.total_cost_usd,
            duration_ms = ?result.duration_ms,
            turns = ?result.num_turns,
            "[Interpreter] Result received"
        );
        events.push(StreamEvent::TotalsUpdate(totals));

        events
    }
}

fn tool_use_data(name: String, input: Value) -> ToolUseData {
    let tool_input = if name == TODO_TOOL_NAME {
        TodoItem::list_from_input(&input)
            .map(|todos| render_todos(&todos))
            .unwrap_or_default()
    } else {
        String::new()
    };

    ToolUseData {
        tool_info: format!("🔧 Executing: {name}"),
        tool_input,
        raw_input: input,
        tool_name: name,
    }
}

fn render_todos(todos: &[TodoItem]) -> String {
    let mut rendered = String::from("\nTodo List Update:");
    for todo in todos {
        rendered.push('\n');
        rendered.push_str(todo.status.marker());
        rendered.push(' ');
        rendered.push_str(&todo.content);
        if let Some(priority) = &todo.priority {
            rendered.push_str(&format!(" (priority: {priority})"));
        }
    }
    rendered
}

fn is_empty_content(content: &Value) -> bool {
    match content {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle(state: &mut SessionState, value: Value) -> Vec<StreamEvent> {
        EventInterpreter::new().handle(CliMessage::decode(value), state)
    }

    #[test]
    fn test_usage_accumulates_monotonically() {
        let mut state = SessionState::default();
        let deltas = [(10, 5), (0, 0), (3, 7)];

        for (input, output) in deltas {
            let before = (state.total_tokens_input, state.total_tokens_output);
            let events = handle(
                &mut state,
                json!({"type": "assistant", "message": {
                    "usage": {"input_tokens": input, "output_tokens": output, "cache_read_input_tokens": 4},
                    "content": []
                }}),
            );

            assert_eq!(state.total_tokens_input, before.0 + input);
            assert_eq!(state.total_tokens_output, before.1 + output);
            match &events[..] {
                [StreamEvent::TokensUpdate(update)] => {
                    assert_eq!(update.current_input_tokens, input);
                    assert_eq!(update.current_output_tokens, output);
                    assert_eq!(update.total_tokens_input, state.total_tokens_input);
                    assert_eq!(update.cache_read_tokens, Some(4));
                    assert_eq!(update.cache_creation_tokens, None);
                }
                other => panic!("unexpected events: {other:?}"),
            }
        }
        assert_eq!((state.total_tokens_input, state.total_tokens_output), (13, 12));
    }

    #[test]
    fn test_blank_text_and_thinking_are_suppressed() {
        let mut state = SessionState::default();
        let events = handle(
            &mut state,
            json!({"type": "assistant", "message": {"content": [
                {"type": "text", "text": "  \n "},
                {"type": "thinking", "thinking": "\t"},
                {"type": "thinking", "thinking": " pondering "},
                {"type": "text", "text": "  answer\n"}
            ]}}),
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::Thinking("pondering".into()),
                StreamEvent::Output("answer".into()),
            ]
        );
    }

    #[test]
    fn test_todo_tool_use_keeps_raw_input() {
        let todos = json!({"todos": [
            {"content": "write parser", "status": "pending", "priority": "high"},
            {"content": "wire supervisor", "status": "in_progress", "priority": "medium"},
            {"content": "read docs", "status": "completed", "priority": "low"}
        ]});
        let mut state = SessionState::default();
        let events = handle(
            &mut state,
            json!({"type": "assistant", "message": {"content": [
                {"type": "tool_use", "id": "t1", "name": "TodoWrite", "input": todos.clone()}
            ]}}),
        );

        assert_eq!(events.len(), 1);
        let StreamEvent::ToolUse(tool) = &events[0] else {
            panic!("expected tool use, got {events:?}");
        };
        assert_eq!(tool.tool_name, "TodoWrite");
        assert_eq!(tool.raw_input, todos);
        assert_eq!(tool.tool_info, "🔧 Executing: TodoWrite");
        assert_eq!(
            tool.tool_input,
            "\nTodo List Update:\n⏳ write parser (priority: high)\n🔄 wire supervisor (priority: medium)\n✅ read docs (priority: low)"
        );
    }

    #[test]
    fn test_other_tool_use_has_no_rendered_input() {
        let mut state = SessionState::default();
        let events = handle(
            &mut state,
            json!({"type": "assistant", "message": {"content": [
                {"type": "tool_use", "name": "Bash", "input": {"command": "ls"}}
            ]}}),
        );
        let StreamEvent::ToolUse(tool) = &events[0] else {
            panic!("expected tool use");
        };
        assert_eq!(tool.tool_input, "");
        assert_eq!(tool.raw_input, json!({"command": "ls"}));
    }

    #[test]
    fn test_tool_result_defaults() {
        let mut state = SessionState::default();
        let events = handle(
            &mut state,
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "t1"},
                {"type": "tool_result", "content": "boom", "is_error": true, "tool_use_id": "t2"},
                {"type": "text", "text": "ignored"}
            ]}}),
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::ToolResult(ToolResultData {
                    content: json!(TOOL_RESULT_PLACEHOLDER),
                    is_error: false,
                    tool_use_id: Some("t1".into()),
                }),
                StreamEvent::ToolResult(ToolResultData {
                    content: json!("boom"),
                    is_error: true,
                    tool_use_id: Some("t2".into()),
                }),
            ]
        );
    }

    #[test]
    fn test_result_updates_session_and_totals() {
        let mut state = SessionState::default();
        let events = handle(
            &mut state,
            json!({"type": "result", "subtype": "success", "session_id": "abc123",
                   "total_cost_usd": 0.002, "duration_ms": 1200, "num_turns": 2}),
        );

        assert_eq!(state.session_id.as_deref(), Some("abc123"));
        assert_eq!(state.request_count, 1);
        assert_eq!(state.total_cost_usd, 0.002);

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            StreamEvent::SessionInfo(SessionInfoData {
                session_id: "abc123".into(),
                tools: Vec::new(),
                mcp_servers: Vec::new(),
            })
        );
        assert_eq!(events[1], StreamEvent::ProcessingState(false));
        let StreamEvent::TotalsUpdate(totals) = &events[2] else {
            panic!("expected totals");
        };
        assert_eq!(totals.total_cost, 0.002);
        assert_eq!(totals.request_count, 1);
        assert_eq!(totals.current_duration, Some(1200));
        assert_eq!(totals.current_turns, Some(2));
    }

    #[test]
    fn test_session_rotation_overwrites() {
        let mut state = SessionState {
            session_id: Some("old".into()),
            ..SessionState::default()
        };
        handle(
            &mut state,
            json!({"type": "result", "subtype": "success", "session_id": "new"}),
        );
        assert_eq!(state.session_id.as_deref(), Some("new"));
    }

    #[test]
    fn test_login_failure_skips_accounting() {
        let mut state = SessionState {
            session_id: Some("keep".into()),
            total_cost_usd: 0.5,
            request_count: 4,
            ..SessionState::default()
        };
        let events = handle(
            &mut state,
            json!({"type": "result", "subtype": "success", "is_error": true,
                   "result": "Invalid API key · Please run /login",
                   "session_id": "other", "total_cost_usd": 1.0}),
        );

        assert_eq!(
            events,
            vec![StreamEvent::ProcessingState(false), StreamEvent::LoginRequired]
        );
        assert_eq!(state.request_count, 4);
        assert_eq!(state.total_cost_usd, 0.5);
        assert_eq!(state.session_id.as_deref(), Some("keep"));
    }

    #[test]
    fn test_non_login_error_result_is_accounted() {
        let mut state = SessionState::default();
        let events = handle(
            &mut state,
            json!({"type": "result", "subtype": "success", "is_error": true, "result": "invalid api key"}),
        );
        assert!(!events.contains(&StreamEvent::LoginRequired));
        assert_eq!(state.request_count, 1);
    }

    #[test]
    fn test_error_result_surfaces_message() {
        let mut state = SessionState::default();
        let events = handle(
            &mut state,
            json!({"type": "result", "subtype": "success", "is_error": true,
                   "result": "API Error: 529 overloaded", "session_id": "s1", "total_cost_usd": 0.01}),
        );

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StreamEvent::SessionInfo(info) if info.session_id == "s1"));
        assert_eq!(events[1], StreamEvent::Error("API Error: 529 overloaded".into()));
        assert_eq!(events[2], StreamEvent::ProcessingState(false));
        assert!(matches!(&events[3], StreamEvent::TotalsUpdate(t) if t.request_count == 1));
        assert_eq!(state.total_cost_usd, 0.01);
    }

    #[test]
    fn test_error_result_without_text_uses_fallback() {
        let mut state = SessionState::default();
        let events = handle(
            &mut state,
            json!({"type": "result", "subtype": "success", "is_error": true, "result": "  "}),
        );
        assert!(events.contains(&StreamEvent::Error(RESULT_ERROR_FALLBACK.into())));
    }

    #[test]
    fn test_unknown_messages_are_ignored() {
        let mut state = SessionState::default();
        for value in [
            json!({"type": "system", "subtype": "init", "session_id": "x"}),
            json!({"type": "result", "subtype": "error_max_turns"}),
            json!({"type": "stream_event", "event": {}}),
            json!({"no_type": true}),
        ] {
            assert!(handle(&mut state, value).is_empty());
        }
        assert_eq!(state, SessionState::default());
    }
}
