//! 事件出口（UI 侧）

use std::sync::Mutex;

use stream_protocol::StreamEvent;

/// 接收发往 UI 的事件
///
/// 只有 [`ConversationRecorder`](crate::ConversationRecorder) 会调用它，
/// 从而保证 UI 看到的事件与会话记录一一对应。
pub trait EventSink: Send + Sync {
    /// 追加一个事件
    fn emit(&self, event: &StreamEvent);

    /// 清空当前显示并按顺序重放历史事件（加载会话时）
    fn replay(&self, events: &[StreamEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}

/// 把事件收集在内存中，用于嵌入方轮询和测试
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<StreamEvent>>,
    replays: Mutex<Vec<Vec<StreamEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次重放之后收到的事件
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// 每次重放的事件列表
    pub fn replays(&self) -> Vec<Vec<StreamEvent>> {
        self.replays
            .lock()
            .map(|replays| replays.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &StreamEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }

    fn replay(&self, events: &[StreamEvent]) {
        if let Ok(mut replays) = self.replays.lock() {
            replays.push(events.to_vec());
        }
        if let Ok(mut current) = self.events.lock() {
            *current = events.to_vec();
        }
    }
}
