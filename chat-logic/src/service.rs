//! Chat 服务
//!
//! 显式的会话上下文：`init` 创建，`dispose` 释放。
//! 所有状态变更和事件输出都在 `inner` 锁内完成，保证事件顺序与记录顺序一致。

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use session_store::{
    ConversationIndexEntry, TranscriptStore, WorkspaceState, SELECTED_MODEL_KEY,
};
use stream_protocol::{
    Checkpoint, CliMessage, LineParser, RestoreSuccessData, SessionResumedData, StreamEvent,
};

use crate::checkpoint::CheckpointManager;
use crate::config::{ChatConfig, Model};
use crate::error::SupervisorError;
use crate::interpreter::EventInterpreter;
use crate::recorder::ConversationRecorder;
use crate::session::SessionState;
use crate::sink::EventSink;
use crate::supervisor::{ProcessOutput, ProcessSupervisor, TurnProcess, CLAUDE_NOT_FOUND_MESSAGE};

/// 等待首个响应时的提示
pub const LOADING_MESSAGE: &str = "Claude is thinking...";

/// 用户取消后的提示
pub const STOPPED_MESSAGE: &str = "⏹️ Claude code was stopped.";

struct ChatState {
    session: SessionState,
    recorder: ConversationRecorder,
    checkpoints: Vec<Checkpoint>,
    processing: bool,
}

impl ChatState {
    async fn emit(&mut self, event: StreamEvent) {
        if let StreamEvent::ProcessingState(processing) = event {
            self.processing = processing;
        }
        self.recorder.record(event, &self.session).await;
    }
}

/// 一轮对话的句柄
#[derive(Debug)]
pub struct TurnHandle {
    turn_id: Uuid,
    task: Option<JoinHandle<()>>,
}

impl TurnHandle {
    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    /// 是否已结束（启动失败的轮次立即结束）
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// 等待 stdout 处理完毕、进程退出
    pub async fn wait(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                warn!("[Chat] Turn task failed: {}", e);
            }
        }
    }
}

pub struct ChatService {
    config: ChatConfig,
    inner: Arc<Mutex<ChatState>>,
    supervisor: Arc<ProcessSupervisor>,
    checkpoints: Option<CheckpointManager>,
    interpreter: EventInterpreter,
}

impl ChatService {
    /// 初始化：读取工作区状态，恢复最近一次会话
    pub async fn init(config: ChatConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage_dir)
            .await
            .with_context(|| format!("Failed to create storage dir {:?}", config.storage_dir))?;

        let transcripts = TranscriptStore::new(config.conversations_dir());
        if let Err(e) = transcripts.ensure_dir().await {
            warn!("[Chat] Failed to create conversations dir: {}", e);
        }

        let state = WorkspaceState::open(config.state_file())
            .await
            .context("Failed to open workspace state")?;
        let model = state.get::<Model>(SELECTED_MODEL_KEY).unwrap_or_default();
        let recorder = ConversationRecorder::new(sink, transcripts, state);

        let checkpoints = if config.enable_checkpoints {
            let manager = CheckpointManager::new(config.backup_git_dir(), &config.workspace_dir);
            if let Err(e) = manager.init().await {
                warn!("[Checkpoint] Failed to initialize backup repository: {}", e);
            }
            Some(manager)
        } else {
            None
        };

        let service = Self {
            supervisor: Arc::new(ProcessSupervisor::new(&config)),
            config,
            inner: Arc::new(Mutex::new(ChatState {
                session: SessionState::new(model),
                recorder,
                checkpoints: Vec::new(),
                processing: false,
            })),
            checkpoints,
            interpreter: EventInterpreter::new(),
        };

        service.resume_latest().await;
        info!(
            workspace = ?service.config.workspace_dir,
            storage = ?service.config.storage_dir,
            "[Chat] Service initialized"
        );
        Ok(service)
    }

    async fn resume_latest(&self) {
        let latest = {
            let state = self.inner.lock().await;
            state.recorder.index().latest().cloned()
        };
        let Some(latest) = latest else {
            return;
        };

        {
            let mut state = self.inner.lock().await;
            state.session.session_id = latest.session_id.clone();
        }
        if let Err(e) = self.load_conversation(&latest.filename).await {
            warn!("[Chat] Failed to load latest conversation {}: {:#}", latest.filename, e);
        }

        let mut state = self.inner.lock().await;
        if let Some(session_id) = state.session.session_id.clone() {
            info!("[Chat] Resuming session {}", session_id);
            state
                .emit(StreamEvent::SessionResumed(SessionResumedData { session_id }))
                .await;
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// 发送一条用户消息，启动新的一轮
    pub async fn send_message(&self, text: &str) -> TurnHandle {
        let turn_id = Uuid::new_v4();
        let span = info_span!("turn", %turn_id);
        self.start_turn(turn_id, text)
            .instrument(span)
            .await
    }

    async fn start_turn(&self, turn_id: Uuid, text: &str) -> TurnHandle {
        let (resume_session_id, model) = {
            let mut state = self.inner.lock().await;
            state.emit(StreamEvent::UserInput(text.to_string())).await;
            state.emit(StreamEvent::ProcessingState(true)).await;
            (state.session.session_id.clone(), state.session.selected_model)
        };

        if let Some(manager) = &self.checkpoints {
            match manager.create(text).await {
                Ok(checkpoint) => {
                    let mut state = self.inner.lock().await;
                    state.checkpoints.push(checkpoint.clone());
                    state.emit(StreamEvent::RestoreCheckpoint(checkpoint)).await;
                }
                Err(e) => warn!("[Checkpoint] Failed to create checkpoint: {}", e),
            }
        }

        {
            let mut state = self.inner.lock().await;
            state.emit(StreamEvent::Loading(LOADING_MESSAGE.to_string())).await;
        }

        let spawned = self
            .supervisor
            .start_turn(turn_id, text, resume_session_id.as_deref(), model)
            .await;

        match spawned {
            Ok(process) => {
                let task = tokio::spawn(
                    drive_turn(
                        self.inner.clone(),
                        self.supervisor.clone(),
                        self.interpreter,
                        process,
                    )
                    .in_current_span(),
                );
                TurnHandle {
                    turn_id,
                    task: Some(task),
                }
            }
            Err(e) => {
                warn!("[Chat] {}", e);
                let message = match e {
                    SupervisorError::NotFound(_) => CLAUDE_NOT_FOUND_MESSAGE.to_string(),
                    SupervisorError::Spawn(e) => format!("Error running Claude: {e}"),
                    other => format!("Error running Claude: {other}"),
                };
                let mut state = self.inner.lock().await;
                state.emit(StreamEvent::ClearLoading).await;
                state.emit(StreamEvent::Error(message)).await;
                state.emit(StreamEvent::ProcessingState(false)).await;
                TurnHandle {
                    turn_id,
                    task: None,
                }
            }
        }
    }

    /// 停止当前进程；没有进程在运行时返回 false
    pub async fn cancel(&self) -> bool {
        if !self.supervisor.cancel() {
            debug!("[Chat] No Claude process to stop");
            return false;
        }

        let mut state = self.inner.lock().await;
        state.emit(StreamEvent::ProcessingState(false)).await;
        state.emit(StreamEvent::ClearLoading).await;
        state
            .emit(StreamEvent::Error(STOPPED_MESSAGE.to_string()))
            .await;
        true
    }

    /// 开始新会话（已保存的会话文件保留）
    pub async fn new_session(&self) {
        let mut state = self.inner.lock().await;
        state.session.reset();
        state.checkpoints.clear();
        state.recorder.clear();
        state.emit(StreamEvent::SessionCleared).await;
        info!("[Chat] Started new session");
    }

    /// 加载已保存的会话：整体替换会话状态并重放其事件
    pub async fn load_conversation(&self, filename: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        let record = state
            .recorder
            .load(filename)
            .await
            .with_context(|| format!("Failed to load conversation {filename}"))?;

        state.session.replace_from(&record);
        state.recorder.restore(record);

        let totals = state.session.totals();
        state.emit(StreamEvent::TotalsUpdate(totals)).await;

        info!("[Chat] Loaded conversation {}", filename);
        Ok(())
    }

    /// 把工作区恢复到某个 checkpoint
    pub async fn restore_checkpoint(&self, sha: &str) {
        let found = {
            let mut state = self.inner.lock().await;
            let found = state.checkpoints.iter().find(|c| c.sha == sha).cloned();
            match &found {
                Some(_) => {
                    state
                        .emit(StreamEvent::RestoreProgress(
                            "Restoring files from backup...".to_string(),
                        ))
                        .await
                }
                None => {
                    state
                        .emit(StreamEvent::RestoreError("Commit not found".to_string()))
                        .await
                }
            }
            found
        };
        let (Some(checkpoint), Some(manager)) = (found, &self.checkpoints) else {
            return;
        };

        let result = manager.restore(sha).await;
        let mut state = self.inner.lock().await;
        match result {
            Ok(()) => {
                state
                    .emit(StreamEvent::RestoreSuccess(RestoreSuccessData {
                        message: format!("Successfully restored to: {}", checkpoint.message),
                        commit_sha: checkpoint.sha,
                    }))
                    .await
            }
            Err(e) => {
                warn!("[Checkpoint] Restore failed: {}", e);
                state
                    .emit(StreamEvent::RestoreError(format!("Failed to restore: {e}")))
                    .await
            }
        }
    }

    /// 最近的会话（最新在前）
    pub async fn list_conversations(&self) -> Vec<ConversationIndexEntry> {
        let state = self.inner.lock().await;
        state.recorder.index().entries().to_vec()
    }

    /// 选择模型，持久化到工作区状态
    pub async fn select_model(&self, model: Model) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.session.selected_model = model;
        state
            .recorder
            .workspace_state_mut()
            .update(SELECTED_MODEL_KEY, &model)
            .await
            .context("Failed to save model selection")?;
        info!("[Chat] Model set to {}", model);
        Ok(())
    }

    pub async fn session_snapshot(&self) -> SessionState {
        self.inner.lock().await.session.clone()
    }

    pub async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.inner.lock().await.checkpoints.clone()
    }

    pub async fn is_processing(&self) -> bool {
        self.inner.lock().await.processing
    }

    /// 释放：停止仍在运行的进程
    pub async fn dispose(&self) {
        if self.cancel().await {
            info!("[Chat] Stopped running process on dispose");
        }
        info!("[Chat] Service disposed");
    }
}

/// 消费一轮的进程输出直到进程退出
async fn drive_turn(
    inner: Arc<Mutex<ChatState>>,
    supervisor: Arc<ProcessSupervisor>,
    interpreter: EventInterpreter,
    mut process: TurnProcess,
) {
    let mut parser = LineParser::new();
    let mut saw_result = false;

    while let Some(output) = process.output.recv().await {
        match output {
            ProcessOutput::Stdout(chunk) => {
                if process.is_cancelled() {
                    continue;
                }
                let values = parser.push(&chunk);
                if values.is_empty() {
                    continue;
                }
                let mut state = inner.lock().await;
                for value in values {
                    interpret(&mut state, interpreter, value, &mut saw_result).await;
                }
            }
            ProcessOutput::Exited { code, stderr } => {
                supervisor.release(process.turn_id);
                if process.is_cancelled() {
                    info!("[Chat] Cancelled turn finished");
                    return;
                }

                let mut state = inner.lock().await;
                if let Some(value) = parser.finish() {
                    interpret(&mut state, interpreter, value, &mut saw_result).await;
                }

                state.emit(StreamEvent::ClearLoading).await;
                let stderr = stderr.trim();
                if code != Some(0) && !stderr.is_empty() {
                    warn!(?code, "[Chat] Claude exited with error");
                    state.emit(StreamEvent::Error(stderr.to_string())).await;
                }
                if !saw_result {
                    state.emit(StreamEvent::ProcessingState(false)).await;
                }
                return;
            }
        }
    }

    supervisor.release(process.turn_id);
}

async fn interpret(
    state: &mut ChatState,
    interpreter: EventInterpreter,
    value: serde_json::Value,
    saw_result: &mut bool,
) {
    let message = CliMessage::decode(value);
    if matches!(message, CliMessage::ResultSuccess(_)) {
        *saw_result = true;
    }
    for event in interpreter.handle(message, &mut state.session) {
        state.emit(event).await;
    }
}
