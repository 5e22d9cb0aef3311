//! 会话记录器
//!
//! 所有发往 UI 的事件都经过这里：先追加到内存日志，再转发给 sink，
//! 然后整体重写会话文件并更新索引。持久化失败只记录日志。
//! 加载的会话在出现新的用户消息之前不会被重写。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use session_store::{
    conversation_filename, ConversationIndex, ConversationIndexEntry, ConversationRecord,
    LoggedMessage, StoreError, TranscriptStore, WorkspaceState, CONVERSATION_INDEX_KEY,
};
use stream_protocol::StreamEvent;

use crate::session::SessionState;
use crate::sink::EventSink;

pub struct ConversationRecorder {
    sink: Arc<dyn EventSink>,
    transcripts: TranscriptStore,
    state: WorkspaceState,
    index: ConversationIndex,
    log: Vec<LoggedMessage>,
    start_time: Option<DateTime<Utc>>,
    /// 出现第一条用户消息后确定，之后不再变化
    filename: Option<String>,
    /// 自上次清空或加载以来是否记录过用户消息，否则不落盘
    dirty: bool,
}

impl ConversationRecorder {
    /// 创建记录器，索引从工作区状态中读取
    pub fn new(sink: Arc<dyn EventSink>, transcripts: TranscriptStore, state: WorkspaceState) -> Self {
        let index = state
            .get::<Vec<ConversationIndexEntry>>(CONVERSATION_INDEX_KEY)
            .map(ConversationIndex::from_entries)
            .unwrap_or_default();

        Self {
            sink,
            transcripts,
            state,
            index,
            log: Vec::new(),
            start_time: None,
            filename: None,
            dirty: false,
        }
    }

    /// 记录事件并转发给 UI
    pub async fn record(&mut self, event: StreamEvent, session: &SessionState) {
        let now = Utc::now();
        let logged = match LoggedMessage::from_event(&event, now) {
            Ok(logged) => logged,
            Err(e) => {
                warn!("[Recorder] Dropping unserializable {} event: {}", event.kind(), e);
                return;
            }
        };

        if self.log.is_empty() {
            self.start_time = Some(now);
            self.filename = None;
        }
        if matches!(event, StreamEvent::UserInput(_)) {
            self.dirty = true;
        }
        self.log.push(logged);
        self.sink.emit(&event);

        if !self.dirty {
            return;
        }
        if let Err(e) = self.persist(session).await {
            warn!("[Recorder] Failed to save conversation: {}", e);
        }
    }

    async fn persist(&mut self, session: &SessionState) -> Result<(), StoreError> {
        let Some(start_time) = self.start_time else {
            return Ok(());
        };

        let filename = match &self.filename {
            Some(filename) => filename.clone(),
            None => {
                // 还没有用户消息时不落盘，避免文件名变化
                let Some(first) = self.log.iter().find_map(LoggedMessage::user_text) else {
                    return Ok(());
                };
                let filename = conversation_filename(&start_time, Some(first));
                debug!("[Recorder] Conversation file: {}", filename);
                self.filename = Some(filename.clone());
                filename
            }
        };

        let record = ConversationRecord {
            session_id: session.session_id.clone(),
            start_time,
            end_time: Utc::now(),
            message_count: self.log.len(),
            total_cost: session.total_cost_usd,
            total_tokens: session.token_totals(),
            request_count: session.request_count,
            messages: self.log.clone(),
            filename,
        };

        self.transcripts.ensure_dir().await?;
        self.transcripts.save(&record).await?;

        self.index.upsert(ConversationIndexEntry::from_record(&record));
        self.state.update(CONVERSATION_INDEX_KEY, &self.index).await?;
        Ok(())
    }

    /// 开始新的会话日志（已保存的文件保留）
    pub fn clear(&mut self) {
        self.log.clear();
        self.start_time = None;
        self.filename = None;
        self.dirty = false;
    }

    /// 读取已保存的会话
    pub async fn load(&self, filename: &str) -> Result<ConversationRecord, StoreError> {
        self.transcripts.load(filename).await
    }

    /// 把已保存的会话设为当前日志，并让 UI 按原顺序重放
    pub fn restore(&mut self, record: ConversationRecord) {
        let events: Vec<StreamEvent> = record
            .messages
            .iter()
            .filter_map(|message| match message.to_event() {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("[Recorder] Skipping unknown {} message on replay: {}", message.message_type, e);
                    None
                }
            })
            .collect();

        self.start_time = Some(record.start_time);
        self.filename = Some(record.filename);
        self.log = record.messages;
        self.dirty = false;
        self.sink.replay(&events);
    }

    pub fn index(&self) -> &ConversationIndex {
        &self.index
    }

    pub fn messages(&self) -> &[LoggedMessage] {
        &self.log
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn workspace_state_mut(&mut self) -> &mut WorkspaceState {
        &mut self.state
    }
}
