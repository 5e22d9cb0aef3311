//! 会话记录文件读写
//!
//! 文件名：`<YYYY-MM-DD_HH-MM>_<slug>.json`，由开始时间和第一条用户消息决定，
//! 同一会话的重复保存会覆盖同一个文件。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::ConversationRecord;

/// 文件名中消息部分的最大长度（字符）
const SLUG_MAX_CHARS: usize = 50;

/// 根据开始时间和第一条用户消息生成文件名
pub fn conversation_filename(start_time: &DateTime<Utc>, first_user_message: Option<&str>) -> String {
    let slug = slugify(first_user_message.unwrap_or("conversation"));
    format!("{}_{}.json", start_time.format("%Y-%m-%d_%H-%M"), slug)
}

/// 只保留 ASCII 字母数字和空白，连续空白折叠为 `-`，截断并转小写
fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut in_whitespace = false;

    for c in text.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                slug.push('-');
            }
            in_whitespace = true;
        } else if c.is_ascii_alphanumeric() {
            slug.push(c);
            in_whitespace = false;
        }
    }

    slug.chars()
        .take(SLUG_MAX_CHARS)
        .collect::<String>()
        .to_lowercase()
}

/// 验证文件名是否安全（防止路径穿越）
fn validate_filename(filename: &str) -> Result<(), StoreError> {
    if filename.is_empty()
        || filename.contains("..")
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0')
    {
        return Err(StoreError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

/// 会话记录目录
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 创建目录（已存在则忽略）
    pub async fn ensure_dir(&self) -> Result<(), StoreError> {
        if !tokio::fs::try_exists(&self.dir).await? {
            tokio::fs::create_dir_all(&self.dir).await?;
            info!("[Transcript] Created conversations directory at {:?}", self.dir);
        }
        Ok(())
    }

    /// 获取文件路径
    pub fn path_for(&self, filename: &str) -> Result<PathBuf, StoreError> {
        validate_filename(filename)?;
        Ok(self.dir.join(filename))
    }

    /// 整体重写会话文件
    ///
    /// 先写临时文件再 rename，进程中途被杀时不会留下半个文件。
    pub async fn save(&self, record: &ConversationRecord) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&record.filename)?;
        let content = serde_json::to_vec_pretty(record)?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(
            "[Transcript] Saved {} ({} messages)",
            record.filename, record.message_count
        );
        Ok(path)
    }

    /// 读取会话文件
    pub async fn load(&self, filename: &str) -> Result<ConversationRecord, StoreError> {
        let path = self.path_for(filename)?;
        let content = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&content)?)
    }
}
