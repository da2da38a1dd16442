//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置响应；响应用尽后重复最后一条。未预置任何响应时返回错误，模拟后端不可用。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut responses: Vec<String> = responses.into_iter().map(Into::into).collect();
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的 prompt（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut responses = self
            .responses
            .lock()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        match responses.len() {
            0 => Err(LlmError::Request("mock backend has no responses".to_string())),
            1 => Ok(responses[0].clone()),
            _ => responses.pop().ok_or(LlmError::EmptyResponse),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
