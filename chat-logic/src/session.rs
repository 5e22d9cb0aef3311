//! 会话状态

use session_store::{ConversationRecord, TokenTotals};
use stream_protocol::{ResultSuccess, TokensUpdateData, TotalsUpdateData, Usage};

use crate::config::Model;

/// 当前可恢复的会话及累计统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub total_cost_usd: f64,
    pub total_tokens_input: u64,
    pub total_tokens_output: u64,
    pub request_count: u64,
    pub selected_model: Model,
}

impl SessionState {
    pub fn new(selected_model: Model) -> Self {
        Self {
            selected_model,
            ..Self::default()
        }
    }

    /// 新会话：清空 session id 和所有计数，保留模型选择
    pub fn reset(&mut self) {
        *self = Self::new(self.selected_model);
    }

    /// 用持久化记录中的值整体替换（不根据消息重新计算）
    pub fn replace_from(&mut self, record: &ConversationRecord) {
        self.session_id = record.session_id.clone();
        self.total_cost_usd = record.total_cost;
        self.total_tokens_input = record.total_tokens.input;
        self.total_tokens_output = record.total_tokens.output;
        self.request_count = record.request_count;
    }

    /// 累加一条 assistant 消息的 token 用量
    pub fn add_usage(&mut self, usage: &Usage) -> TokensUpdateData {
        self.total_tokens_input = self.total_tokens_input.saturating_add(usage.input_tokens);
        self.total_tokens_output = self
            .total_tokens_output
            .saturating_add(usage.output_tokens);

        TokensUpdateData {
            total_tokens_input: self.total_tokens_input,
            total_tokens_output: self.total_tokens_output,
            current_input_tokens: usage.input_tokens,
            current_output_tokens: usage.output_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
        }
    }

    /// 一轮请求完成：计数 +1，累加费用（0 与缺失等价）
    pub fn complete_request(&mut self, result: &ResultSuccess) -> TotalsUpdateData {
        self.request_count += 1;
        if let Some(cost) = result.total_cost_usd.filter(|c| *c > 0.0) {
            self.total_cost_usd += cost;
        }

        TotalsUpdateData {
            current_cost: result.total_cost_usd,
            current_duration: result.duration_ms,
            current_turns: result.num_turns,
            ..self.totals()
        }
    }

    /// 当前累计值
    pub fn totals(&self) -> TotalsUpdateData {
        TotalsUpdateData {
            total_cost: self.total_cost_usd,
            total_tokens_input: self.total_tokens_input,
            total_tokens_output: self.total_tokens_output,
            request_count: self.request_count,
            current_cost: None,
            current_duration: None,
            current_turns: None,
        }
    }

    pub fn token_totals(&self) -> TokenTotals {
        TokenTotals {
            input: self.total_tokens_input,
            output: self.total_tokens_output,
        }
    }
}
