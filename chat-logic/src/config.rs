//! 配置

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 默认的 Claude CLI 可执行文件
pub const DEFAULT_CLAUDE_BINARY: &str = "claude";

/// 取消时 SIGTERM 之后到强制 kill 的等待时间
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// 模型选择
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// 由 CLI 自行决定，不传 `--model`
    #[default]
    Default,
    Opus,
    Sonnet,
}

impl Model {
    /// `--model` 参数值；默认模型返回 None
    pub fn cli_name(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Opus => Some("opus"),
            Self::Sonnet => Some("sonnet"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Opus => "opus",
            Self::Sonnet => "sonnet",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "opus" => Ok(Self::Opus),
            "sonnet" => Ok(Self::Sonnet),
            other => Err(format!("unknown model: {other} (expected default, opus or sonnet)")),
        }
    }
}

/// Chat 服务配置
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// 工作区目录（CLI 的 cwd，也是 checkpoint 的 work tree）
    pub workspace_dir: PathBuf,
    /// 存储目录（会话记录、状态文件、checkpoint 仓库）
    pub storage_dir: PathBuf,
    /// Claude CLI 路径
    pub claude_path: PathBuf,
    /// 每轮对话前是否创建 checkpoint
    pub enable_checkpoints: bool,
    /// 取消时的强制 kill 等待时间
    pub kill_grace: Duration,
}

impl ChatConfig {
    /// 使用默认值创建配置
    ///
    /// 存储目录和 CLI 路径可通过 `CLAUDE_CHAT_STORAGE`、`CLAUDE_CHAT_CLAUDE_PATH` 覆盖。
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        let workspace_dir = workspace_dir.into();
        let storage_dir = std::env::var("CLAUDE_CHAT_STORAGE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_storage_dir(&workspace_dir));
        let claude_path = std::env::var("CLAUDE_CHAT_CLAUDE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CLAUDE_BINARY));

        Self {
            workspace_dir,
            storage_dir,
            claude_path,
            enable_checkpoints: true,
            kill_grace: KILL_GRACE_PERIOD,
        }
    }

    /// 会话记录目录
    pub fn conversations_dir(&self) -> PathBuf {
        self.storage_dir.join("conversations")
    }

    /// checkpoint 仓库的 git 目录
    pub fn backup_git_dir(&self) -> PathBuf {
        self.storage_dir.join("backups").join(".git")
    }

    /// 工作区状态文件
    pub fn state_file(&self) -> PathBuf {
        self.storage_dir.join("workspace-state.json")
    }
}

/// `~/.claude-chat/workspaces/<编码后的工作区路径>`
fn default_storage_dir(workspace_dir: &Path) -> PathBuf {
    let base = match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".claude-chat"),
        Err(_) => workspace_dir.join(".claude-chat"),
    };
    base.join("workspaces").join(encode_workspace_path(workspace_dir))
}

fn encode_workspace_path(path: &Path) -> String {
    path.to_string_lossy().replace(['/', '\\', ':'], "-")
}
