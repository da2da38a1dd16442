//! 分析后端客户端抽象
//!
//! 规格提取与改进分析可选地借助 LLM：所有后端（OpenAI 兼容 / Mock）实现 LlmClient::complete。
//! 调用方必须把任何 Err 当作「后端不可用」并走本地回退。

use async_trait::async_trait;
use thiserror::Error;

/// LLM 调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Empty response")]
    EmptyResponse,
}

/// LLM 客户端 trait：单轮非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// 后端名称（用于日志）
    fn name(&self) -> &str;
}
