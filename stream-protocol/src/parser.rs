//! stdout 行缓冲解析器
//!
//! 输入为任意切分的字节块，输出为完整的 JSON 行。
//! 末尾不完整的行保留在缓冲区，等下一个 chunk 补齐后再解析。

use serde_json::Value;
use tracing::debug;

/// 增量行解析器
#[derive(Debug, Default)]
pub struct LineParser {
    buffer: Vec<u8>,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个 chunk，返回其中所有已完整的 JSON 行
    ///
    /// 空行和非 JSON 行被丢弃（只记录 debug 日志）。
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut values = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(value) = Self::parse_line(&self.buffer[start..end]) {
                values.push(value);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        values
    }

    /// 流结束时处理缓冲区中剩余的最后一行
    pub fn finish(&mut self) -> Option<Value> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_line(&rest)
    }

    /// 缓冲区中尚未完整的字节数
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn parse_line(bytes: &[u8]) -> Option<Value> {
        let line = String::from_utf8_lossy(bytes);
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(?line, error = %e, "Non-JSON line from Claude CLI");
                None
            }
        }
    }
}
