//! 工作区 key/value 状态
//!
//! 一个 JSON 对象文件，保存索引、模型选择等与会话文件独立的状态。

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::StoreError;

/// 会话索引的 key
pub const CONVERSATION_INDEX_KEY: &str = "claude.conversationIndex";

/// 所选模型的 key
pub const SELECTED_MODEL_KEY: &str = "claude.selectedModel";

#[derive(Debug)]
pub struct WorkspaceState {
    path: PathBuf,
    values: Map<String, Value>,
}

impl WorkspaceState {
    /// 打开状态文件
    ///
    /// 文件不存在时为空；内容损坏时记录警告并从空状态开始。
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let values = match tokio::fs::read(&path).await {
            Ok(content) => match serde_json::from_slice::<Map<String, Value>>(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!("[State] Ignoring corrupt state file {:?}: {}", path, e);
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取值；不存在或类型不符时返回 None
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("[State] Value for {} has unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// 更新值并立即写盘
    pub async fn update<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        self.values
            .insert(key.to_string(), serde_json::to_value(value)?);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(&self.values)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
