//! 工作区 checkpoint
//!
//! 在存储目录下维护一个独立的 git 仓库（`--git-dir`），工作区作为它的 work tree。
//! 每轮对话前提交一次，之后可以 checkout 回任一提交。

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{SecondsFormat, Utc};
use tokio::process::Command;
use tracing::{debug, info};

use stream_protocol::Checkpoint;

use crate::error::CheckpointError;

/// 提交信息中用户消息的最大长度（字符）
const MESSAGE_PREVIEW_CHARS: usize = 50;

const GIT_USER_NAME: &str = "Claude Code Chat";
const GIT_USER_EMAIL: &str = "claude@anthropic.com";

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    git_dir: PathBuf,
    work_tree: PathBuf,
}

impl CheckpointManager {
    pub fn new(git_dir: impl Into<PathBuf>, work_tree: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
            work_tree: work_tree.into(),
        }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// 初始化仓库（已存在则跳过）
    pub async fn init(&self) -> Result<(), CheckpointError> {
        if tokio::fs::try_exists(self.git_dir.join("HEAD")).await? {
            debug!("[Checkpoint] Using existing repository at {:?}", self.git_dir);
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.git_dir).await?;
        self.git(&["init"], true).await?;
        self.git(&["config", "user.name", GIT_USER_NAME], false).await?;
        self.git(&["config", "user.email", GIT_USER_EMAIL], false).await?;

        info!("[Checkpoint] Initialized backup repository at {:?}", self.git_dir);
        Ok(())
    }

    /// 提交当前工作区（没有改动也会提交）
    pub async fn create(&self, user_message: &str) -> Result<Checkpoint, CheckpointError> {
        self.git(&["add", "-A"], true).await?;

        let is_first = self.git(&["rev-parse", "HEAD"], false).await.is_err();
        let status = self.git(&["status", "--porcelain"], true).await?;
        let message = commit_message(user_message, is_first, !status.trim().is_empty());

        self.git(
            &["-c", "commit.gpgsign=false", "commit", "--allow-empty", "-m", &message],
            true,
        )
        .await?;
        let sha = self.git(&["rev-parse", "HEAD"], false).await?.trim().to_string();

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let checkpoint = Checkpoint {
            id: format!("commit-{}", timestamp.replace([':', '.'], "-")),
            sha,
            message,
            timestamp,
        };

        info!("[Checkpoint] Created {} ({})", checkpoint.sha, checkpoint.message);
        Ok(checkpoint)
    }

    /// 把工作区文件恢复到指定提交
    pub async fn restore(&self, sha: &str) -> Result<(), CheckpointError> {
        validate_sha(sha)?;
        self.git(&["checkout", sha, "--", "."], true).await?;
        info!("[Checkpoint] Restored workspace to {}", sha);
        Ok(())
    }

    async fn git(&self, args: &[&str], with_work_tree: bool) -> Result<String, CheckpointError> {
        let mut command = Command::new("git");
        command.arg("--git-dir").arg(&self.git_dir);
        if with_work_tree {
            command.arg("--work-tree").arg(&self.work_tree);
        }
        command
            .args(args)
            .current_dir(&self.work_tree)
            .stdin(Stdio::null());

        let output = command.output().await?;
        if !output.status.success() {
            return Err(CheckpointError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// 生成提交信息
pub(crate) fn commit_message(user_message: &str, is_first: bool, has_changes: bool) -> String {
    let prefix = if is_first {
        "Initial backup"
    } else if has_changes {
        "Before"
    } else {
        "Checkpoint (no changes)"
    };

    let mut preview: String = user_message.chars().take(MESSAGE_PREVIEW_CHARS).collect();
    if user_message.chars().count() > MESSAGE_PREVIEW_CHARS {
        preview.push_str("...");
    }
    format!("{prefix}: {preview}")
}

/// 只接受十六进制的提交 id，避免被当作 git 选项
fn validate_sha(sha: &str) -> Result<(), CheckpointError> {
    if sha.is_empty() || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CheckpointError::Git {
            command: "checkout".to_string(),
            stderr: format!("invalid commit id: {sha}"),
        });
    }
    Ok(())
}
