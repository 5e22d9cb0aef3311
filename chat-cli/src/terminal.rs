//! 终端输出

use std::io::Write;

use chat_logic::EventSink;
use serde_json::Value;
use stream_protocol::StreamEvent;

/// tool_result 在终端中显示的最大长度（字符）
const TOOL_RESULT_PREVIEW_CHARS: usize = 400;

/// 把事件打印到 stdout/stderr
#[derive(Debug, Default)]
pub struct TerminalSink;

impl TerminalSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TerminalSink {
    fn emit(&self, event: &StreamEvent) {
        let Some(line) = render(event) else {
            return;
        };
        if matches!(event, StreamEvent::Error(_) | StreamEvent::RestoreError(_)) {
            eprintln!("{line}");
        } else {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
    }

    fn replay(&self, events: &[StreamEvent]) {
        println!("──────── loaded conversation ({} events) ────────", events.len());
        for event in events {
            self.emit(event);
        }
        println!("────────────────────────────────────────");
    }
}

/// 渲染为一行（或多行）文本；不需要显示的事件返回 None
pub fn render(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::UserInput(text) => Some(format!("> {text}")),
        StreamEvent::Output(text) => Some(text.clone()),
        StreamEvent::Thinking(text) => Some(format!("💭 {text}")),
        StreamEvent::ToolUse(tool) => Some(format!("{}{}", tool.tool_info, tool.tool_input)),
        StreamEvent::ToolResult(result) => {
            let marker = if result.is_error { "✗" } else { "↳" };
            Some(format!("{marker} {}", preview(&result.content)))
        }
        StreamEvent::SessionInfo(info) => Some(format!("[session {}]", info.session_id)),
        StreamEvent::TokensUpdate(_) => None,
        StreamEvent::TotalsUpdate(totals) => {
            let mut line = format!(
                "[total ${:.4} | tokens {} in / {} out | {} requests",
                totals.total_cost,
                totals.total_tokens_input,
                totals.total_tokens_output,
                totals.request_count
            );
            if let Some(cost) = totals.current_cost {
                line.push_str(&format!(" | this turn ${cost:.4}"));
            }
            if let Some(ms) = totals.current_duration {
                line.push_str(&format!(" in {:.1}s", ms as f64 / 1000.0));
            }
            line.push(']');
            Some(line)
        }
        StreamEvent::Error(text) => Some(format!("Error: {text}")),
        StreamEvent::LoginRequired => Some(
            "Login required: run `claude` in a terminal and complete the login, then try again."
                .to_string(),
        ),
        StreamEvent::RestoreCheckpoint(checkpoint) => Some(format!(
            "[checkpoint {} {}]",
            short_sha(&checkpoint.sha),
            checkpoint.message
        )),
        StreamEvent::ProcessingState(_) | StreamEvent::ClearLoading => None,
        StreamEvent::Loading(text) => Some(format!("… {text}")),
        StreamEvent::SessionCleared => Some("──────── new session ────────".to_string()),
        StreamEvent::SessionResumed(data) => Some(format!("[resumed session {}]", data.session_id)),
        StreamEvent::RestoreProgress(text) => Some(text.clone()),
        StreamEvent::RestoreSuccess(data) => Some(data.message.clone()),
        StreamEvent::RestoreError(text) => Some(format!("Restore failed: {text}")),
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

fn preview(content: &Value) -> String {
    let text = match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut preview: String = text.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect();
    if text.chars().count() > TOOL_RESULT_PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}
