//! LLM 层：分析后端客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmError};

/// 按配置创建分析后端客户端；provider 为 none 或未知时返回 None（规格提取与改进分析仅用规则）
pub fn create_llm_from_config(cfg: &LlmSection) -> Option<Arc<dyn LlmClient>> {
    match cfg.provider.to_lowercase().as_str() {
        "openai" | "ollama" => {
            tracing::info!("Using OpenAI-compatible analysis backend ({})", cfg.model);
            Some(Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                None,
                cfg.timeout_secs,
            )))
        }
        "mock" => {
            tracing::warn!("Using mock analysis backend");
            Some(Arc::new(MockLlmClient::new()))
        }
        other => {
            if other != "none" {
                tracing::warn!("Unknown LLM provider '{}', analysis backend disabled", other);
            }
            None
        }
    }
}
