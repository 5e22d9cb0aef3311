//! 错误定义

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Claude executable not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn Claude: {0}")]
    Spawn(std::io::Error),

    #[error("Failed to capture {0}")]
    Pipe(&'static str),
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
