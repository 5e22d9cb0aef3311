//! Claude CLI 进程管理
//!
//! 每轮对话启动一个 `claude -p --output-format stream-json` 进程：
//! 消息写入 stdin 后关闭，stdout 按块转发，stderr 在退出时一次性交出。
//! 同一时间最多跟踪一个进程（`slot`）。

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ChatConfig, Model};
use crate::error::SupervisorError;

/// 找不到 CLI 时给用户的提示
pub const CLAUDE_NOT_FOUND_MESSAGE: &str =
    "Install claude code first: https://www.anthropic.com/claude-code";

const READ_CHUNK_SIZE: usize = 8192;

/// 构建 CLI 参数
pub fn build_args(resume_session_id: Option<&str>, model: Model) -> Vec<String> {
    let mut args: Vec<String> = [
        "-p",
        "--output-format",
        "stream-json",
        "--verbose",
        "--dangerously-skip-permissions",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(name) = model.cli_name() {
        args.push("--model".to_string());
        args.push(name.to_string());
    }

    if let Some(session_id) = resume_session_id {
        args.push("--resume".to_string());
        args.push(session_id.to_string());
    }

    args
}

/// 进程输出
#[derive(Debug)]
pub enum ProcessOutput {
    /// 一块原始 stdout 数据
    Stdout(Vec<u8>),
    /// 进程已退出（被信号终止时 code 为 None）
    Exited { code: Option<i32>, stderr: String },
}

/// 正在运行的一轮
#[derive(Debug)]
pub struct TurnProcess {
    pub turn_id: Uuid,
    pub output: mpsc::UnboundedReceiver<ProcessOutput>,
    cancelled: Arc<AtomicBool>,
}

impl TurnProcess {
    /// 是否已被取消（取消后的输出应丢弃）
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct ProcessHandle {
    turn_id: Uuid,
    pid: Option<u32>,
    /// 通知等待任务停止进程；信号只由持有 `Child` 的等待任务发送
    stop_tx: Option<oneshot::Sender<()>>,
    cancelled: Arc<AtomicBool>,
}

pub struct ProcessSupervisor {
    claude_path: PathBuf,
    workspace_dir: PathBuf,
    kill_grace: Duration,
    slot: Mutex<Option<ProcessHandle>>,
}

impl ProcessSupervisor {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            claude_path: config.claude_path.clone(),
            workspace_dir: config.workspace_dir.clone(),
            kill_grace: config.kill_grace,
            slot: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ProcessHandle>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 是否有进程在运行
    pub fn is_running(&self) -> bool {
        self.slot().is_some()
    }

    /// 启动一轮
    pub async fn start_turn(
        &self,
        turn_id: Uuid,
        message: &str,
        resume_session_id: Option<&str>,
        model: Model,
    ) -> Result<TurnProcess, SupervisorError> {
        let args = build_args(resume_session_id, model);
        debug!(?args, "[Supervisor] Spawning {:?}", self.claude_path);

        let mut child = Command::new(&self.claude_path)
            .args(&args)
            .current_dir(&self.workspace_dir)
            .env("FORCE_COLOR", "0")
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SupervisorError::NotFound(self.claude_path.display().to_string())
                } else {
                    SupervisorError::Spawn(e)
                }
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or(SupervisorError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SupervisorError::Pipe("stderr"))?;

        let pid = child.id();
        info!(?pid, resume = resume_session_id.is_some(), "[Supervisor] Claude process started");

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let handle = ProcessHandle {
            turn_id,
            pid,
            stop_tx: Some(stop_tx),
            cancelled: cancelled.clone(),
        };
        if let Some(previous) = self.slot().replace(handle) {
            warn!(
                "[Supervisor] Turn {} superseded by {} while still running",
                previous.turn_id, turn_id
            );
        }

        let stdout_tx = output_tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if stdout_tx.send(ProcessOutput::Stdout(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("[Supervisor] stdout read error: {}", e);
                        break;
                    }
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut collected = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut collected).await {
                warn!("[Supervisor] stderr read error: {}", e);
            }
            String::from_utf8_lossy(&collected).into_owned()
        });

        tokio::spawn(wait_for_exit(
            child,
            stop_rx,
            self.kill_grace,
            cancelled.clone(),
            stdout_task,
            stderr_task,
            output_tx,
        ));

        // 读取任务已启动后再写 stdin
        if let Some(mut stdin) = stdin {
            let payload = format!("{message}\n");
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                warn!("[Supervisor] Failed to write message to stdin: {}", e);
            }
            if let Err(e) = stdin.shutdown().await {
                debug!("[Supervisor] stdin shutdown: {}", e);
            }
        }

        Ok(TurnProcess {
            turn_id,
            output: output_rx,
            cancelled,
        })
    }

    /// 取消当前进程
    ///
    /// 立即从 slot 中取出句柄并通知等待任务：先 SIGTERM，`kill_grace` 之后仍未退出则强制 kill。
    /// 没有运行中的进程时返回 false。
    pub fn cancel(&self) -> bool {
        let Some(mut handle) = self.slot().take() else {
            return false;
        };
        handle.cancelled.store(true, Ordering::SeqCst);
        info!(turn_id = %handle.turn_id, pid = ?handle.pid, "[Supervisor] Stopping Claude process");

        if let Some(stop_tx) = handle.stop_tx.take() {
            // 等待任务已结束说明进程已被回收，不再发信号
            if stop_tx.send(()).is_err() {
                debug!("[Supervisor] Process already exited");
            }
        }
        true
    }

    /// 一轮结束后释放句柄（只释放属于该轮的句柄）
    pub fn release(&self, turn_id: Uuid) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|h| h.turn_id == turn_id) {
            slot.take();
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    mut stop_rx: oneshot::Receiver<()>,
    kill_grace: Duration,
    cancelled: Arc<AtomicBool>,
    stdout_task: tokio::task::JoinHandle<()>,
    stderr_task: tokio::task::JoinHandle<String>,
    output_tx: mpsc::UnboundedSender<ProcessOutput>,
) {
    // 发送端被丢弃（句柄被新的一轮替换）时不停止进程
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut stop_rx => stop(&mut child, kill_grace).await,
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("[Supervisor] Failed to wait for process: {}", e);
            None
        }
    };

    let stderr = if cancelled.load(Ordering::SeqCst) {
        // 子进程可能还持有管道，不等待
        stdout_task.abort();
        stderr_task.abort();
        String::new()
    } else {
        if let Err(e) = stdout_task.await {
            warn!("[Supervisor] stdout task failed: {}", e);
        }
        stderr_task.await.unwrap_or_default()
    };

    info!(?code, "[Supervisor] Claude process exited");
    let _ = output_tx.send(ProcessOutput::Exited { code, stderr });
}

/// SIGTERM，宽限期后 kill
///
/// 进程在这里被回收之前 pid 不会被复用。
async fn stop(child: &mut Child, kill_grace: Duration) -> std::io::Result<std::process::ExitStatus> {
    if terminate(child) {
        if let Ok(status) = tokio::time::timeout(kill_grace, child.wait()).await {
            return status;
        }
        warn!("[Supervisor] Process did not exit within {:?}, killing", kill_grace);
    }
    if let Err(e) = child.start_kill() {
        warn!("[Supervisor] Failed to kill process: {}", e);
    }
    child.wait().await
}

/// 发送 SIGTERM；不支持时返回 false
#[cfg(unix)]
fn terminate(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // 已回收的进程没有 id
    let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!("[Supervisor] SIGTERM to {} failed: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_new_session_default_model() {
        assert_eq!(
            build_args(None, Model::Default),
            vec![
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions"
            ]
        );
    }

    #[test]
    fn test_build_args_resume_with_model() {
        let args = build_args(Some("abc123"), Model::Opus);
        let tail: Vec<&str> = args[5..].iter().map(String::as_str).collect();
        assert_eq!(tail, ["--model", "opus", "--resume", "abc123"]);
    }

    #[tokio::test]
    async fn test_missing_executable_is_not_found() {
        let mut config = ChatConfig::new(std::env::temp_dir());
        config.claude_path = PathBuf::from("/nonexistent/claude-binary-for-tests");
        let supervisor = ProcessSupervisor::new(&config);

        let result = supervisor
            .start_turn(Uuid::new_v4(), "hi", None, Model::Default)
            .await;
        assert!(matches!(result, Err(SupervisorError::NotFound(_))));
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_cancel_without_process() {
        let supervisor = ProcessSupervisor::new(&ChatConfig::new(std::env::temp_dir()));
        assert!(!supervisor.cancel());
    }

    #[test]
    fn test_release_ignores_other_turns() {
        let supervisor = ProcessSupervisor::new(&ChatConfig::new(std::env::temp_dir()));
        let turn_id = Uuid::new_v4();
        *supervisor.slot() = Some(ProcessHandle {
            turn_id,
            pid: None,
            stop_tx: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        });

        supervisor.release(Uuid::new_v4());
        assert!(supervisor.is_running());
        supervisor.release(turn_id);
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    fn script_supervisor(dir: &tempfile::TempDir, body: &str, kill_grace: Duration) -> ProcessSupervisor {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = ChatConfig::new(dir.path().to_path_buf());
        config.claude_path = path;
        config.kill_grace = kill_grace;
        ProcessSupervisor::new(&config)
    }

    #[cfg(unix)]
    async fn wait_exited(process: &mut TurnProcess) -> Option<i32> {
        loop {
            match process.output.recv().await {
                Some(ProcessOutput::Exited { code, .. }) => return code,
                Some(ProcessOutput::Stdout(_)) => continue,
                None => panic!("output closed without exit"),
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_after_exit_releases_handle() {
        let dir = tempfile::TempDir::new().unwrap();
        let supervisor = script_supervisor(&dir, "cat > /dev/null\nexit 0", Duration::from_secs(2));
        let turn_id = Uuid::new_v4();
        let mut process = supervisor
            .start_turn(turn_id, "hi", None, Model::Default)
            .await
            .unwrap();

        // 进程已回收但句柄尚未释放
        assert_eq!(wait_exited(&mut process).await, Some(0));
        assert!(supervisor.is_running());

        assert!(supervisor.cancel());
        assert!(process.is_cancelled());
        assert!(!supervisor.is_running());
        assert!(process.output.recv().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_terminates_then_kills() {
        let dir = tempfile::TempDir::new().unwrap();
        let supervisor = script_supervisor(
            &dir,
            "trap '' TERM\ntouch ready\nexec sleep 30",
            Duration::from_millis(300),
        );
        let mut process = supervisor
            .start_turn(Uuid::new_v4(), "hi", None, Model::Default)
            .await
            .unwrap();

        let ready = dir.path().join("ready");
        for _ in 0..200 {
            if ready.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ready.exists());

        let started = std::time::Instant::now();
        assert!(supervisor.cancel());
        let code = tokio::time::timeout(Duration::from_secs(5), wait_exited(&mut process))
            .await
            .expect("process should be killed");
        assert_eq!(code, None);
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
