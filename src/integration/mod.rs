//! 协作服务集成层
//!
//! - **payload**: 松散响应的统一归一化
//! - **probe**: 可用性探测与集成级别
//! - **tabular**: 测试用例表格（CSV）导入导出
//! - **design** / **execution**: 两个协作服务的适配器与本地回退
//! - **simulator**: 通过/失败判定来源
//! - **launcher**: 协作服务自动启动

pub mod design;
pub mod error;
pub mod execution;
pub mod launcher;
pub mod payload;
pub mod probe;
pub mod simulator;
pub mod tabular;

use std::time::Duration;

use serde_json::{Map, Value};

pub use design::{fallback_test_design, DesignAdapter, DesignOutput};
pub use error::IntegrationError;
pub use execution::{fallback_execution, ExecutionAdapter};
pub use launcher::{ensure_collaborators, LaunchedCollaborators};
pub use payload::{normalize, Payload, PayloadError};
pub use probe::{AvailabilityProbe, AvailabilityReport, ServiceStatus};
pub use simulator::{OutcomeSimulator, RandomSimulator, ScriptedSimulator};

const MAX_ERROR_BODY_CHARS: usize = 200;

/// 读取响应体并归一化为 JSON 对象；非 2xx 返回 Status 错误
pub(crate) async fn read_object(resp: reqwest::Response) -> Result<Map<String, Value>, IntegrationError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(IntegrationError::Status {
            status: status.as_u16(),
            body: truncate(&body),
        });
    }
    Ok(normalize(Payload::Text(body))?)
}

/// 读取 `{success, ...}` 信封；success 不为 true 时返回 Rejected（携带服务给出的 error）
pub(crate) async fn read_envelope(resp: reqwest::Response) -> Result<Map<String, Value>, IntegrationError> {
    let map = read_object(resp).await?;
    match map.get("success") {
        Some(Value::Bool(true)) => Ok(map),
        _ => {
            let reason = map
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("response without success flag")
                .to_string();
            Err(IntegrationError::Rejected(reason))
        }
    }
}

/// 读取纯文本响应（如 CSV 下载）
pub(crate) async fn read_text(resp: reqwest::Response) -> Result<String, IntegrationError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(IntegrationError::Status {
            status: status.as_u16(),
            body: truncate(&body),
        });
    }
    Ok(body)
}

/// 带超时上限的 HTTP 客户端：超时既设在 Client 上，也设在每个请求上，
/// 因此 builder 失败退回默认 Client 时请求仍然有界
#[derive(Debug, Clone)]
pub(crate) struct BoundedClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl BoundedClient {
    pub(crate) fn new(timeout_secs: u64, user_agent: Option<&str>) -> Self {
        let timeout = Duration::from_secs(timeout_secs);
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua);
        }
        let client = match builder.build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "http client builder failed, using default client with per-request timeout");
                reqwest::Client::new()
            }
        };
        Self { client, timeout }
    }

    pub(crate) fn get(&self, url: impl reqwest::IntoUrl) -> reqwest::RequestBuilder {
        self.client.get(url).timeout(self.timeout)
    }

    pub(crate) fn post(&self, url: impl reqwest::IntoUrl) -> reqwest::RequestBuilder {
        self.client.post(url).timeout(self.timeout)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn truncate(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        format!("{}...", body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>())
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h:1/", "/upload"), "http://h:1/upload");
        assert_eq!(join_url("http://h:1", "a/b"), "http://h:1/a/b");
    }

    #[test]
    fn test_bounded_client_sets_request_timeout() {
        let client = BoundedClient::new(3, Some("testloop-test"));
        let req = client.get("http://127.0.0.1:9/").build().unwrap();
        assert_eq!(req.timeout(), Some(&Duration::from_secs(3)));
        let req = client.post("http://127.0.0.1:9/upload").build().unwrap();
        assert_eq!(req.timeout(), Some(&Duration::from_secs(3)));
    }

    #[test]
    fn test_truncate() {
        let long = "x".repeat(500);
        assert!(truncate(&long).ends_with("..."));
        assert_eq!(truncate("short"), "short");
    }
}
