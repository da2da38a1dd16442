//! 可用性探测
//!
//! 对设计服务、执行服务与分析后端各发一次带超时的 GET；出错或超时一律报告为不可用，从不返回错误。

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ServicesSection;
use crate::integration::BoundedClient;
use crate::model::IntegrationLevel;

/// 单个服务的探测结果
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: &'static str,
    pub url: String,
    pub available: bool,
    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,
    pub content_length: Option<usize>,
    pub error: Option<String>,
}

impl ServiceStatus {
    fn unavailable(name: &'static str, url: &str, error: impl Into<String>) -> Self {
        Self {
            name,
            url: url.to_string(),
            available: false,
            status_code: None,
            latency_ms: None,
            content_length: None,
            error: Some(error.into()),
        }
    }
}

/// 一次完整探测的结果
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityReport {
    pub design: ServiceStatus,
    pub execution: ServiceStatus,
    pub analysis: ServiceStatus,
}

impl AvailabilityReport {
    pub fn level(&self) -> IntegrationLevel {
        integration_level(
            self.design.available,
            self.execution.available,
            self.analysis.available,
        )
    }

    pub fn collaborators_available(&self) -> bool {
        self.design.available && self.execution.available
    }
}

/// 分析后端不可达优先判为 basic；否则任一协作服务不可达为 partial
pub fn integration_level(design: bool, execution: bool, analysis: bool) -> IntegrationLevel {
    if !analysis {
        IntegrationLevel::Basic
    } else if !design || !execution {
        IntegrationLevel::Partial
    } else {
        IntegrationLevel::Full
    }
}

pub struct AvailabilityProbe {
    client: BoundedClient,
    design_url: String,
    execution_url: String,
    analysis_url: String,
}

impl AvailabilityProbe {
    pub fn new(services: &ServicesSection) -> Self {
        Self {
            client: BoundedClient::new(services.probe_timeout_secs, None),
            design_url: services.design_url.clone(),
            execution_url: services.execution_url.clone(),
            analysis_url: services.analysis_url.clone(),
        }
    }

    /// 并发探测三个端点（同一逻辑线程内 join，不产生共享可变状态）
    pub async fn probe_all(&self) -> AvailabilityReport {
        let (design, execution, analysis) = tokio::join!(
            self.check("design", &self.design_url),
            self.check("execution", &self.execution_url),
            self.check("analysis", &self.analysis_url),
        );
        AvailabilityReport {
            design,
            execution,
            analysis,
        }
    }

    pub async fn check(&self, name: &'static str, url: &str) -> ServiceStatus {
        if url.trim().is_empty() {
            return ServiceStatus::unavailable(name, url, "endpoint not configured");
        }

        let start = Instant::now();
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(service = name, url = %url, error = %e, "probe failed");
                return ServiceStatus::unavailable(name, url, e.to_string());
            }
        };
        let status = resp.status();
        let body = resp.bytes().await;
        let latency_ms = millis(start.elapsed());

        match body {
            Ok(bytes) => ServiceStatus {
                name,
                url: url.to_string(),
                available: status.is_success(),
                status_code: Some(status.as_u16()),
                latency_ms: Some(latency_ms),
                content_length: Some(bytes.len()),
                error: (!status.is_success()).then(|| format!("HTTP {}", status)),
            },
            Err(e) => ServiceStatus {
                status_code: Some(status.as_u16()),
                latency_ms: Some(latency_ms),
                ..ServiceStatus::unavailable(name, url, e.to_string())
            },
        }
    }
}

/// 毫秒数，超出 u64 时饱和
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_level() {
        assert_eq!(integration_level(true, true, true), IntegrationLevel::Full);
        assert_eq!(integration_level(false, true, true), IntegrationLevel::Partial);
        assert_eq!(integration_level(true, false, true), IntegrationLevel::Partial);
        assert_eq!(integration_level(false, false, true), IntegrationLevel::Partial);
        assert_eq!(integration_level(true, true, false), IntegrationLevel::Basic);
        assert_eq!(integration_level(false, false, false), IntegrationLevel::Basic);
    }

    #[test]
    fn test_latency_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    fn services(design: &str, execution: &str, analysis: &str) -> ServicesSection {
        ServicesSection {
            design_url: design.to_string(),
            execution_url: execution.to_string(),
            analysis_url: analysis.to_string(),
            probe_timeout_secs: 2,
            ..ServicesSection::default()
        }
    }

    #[tokio::test]
    async fn test_probe_reports_unreachable_without_error() {
        let probe = AvailabilityProbe::new(&services("http://127.0.0.1:9", "", "http://127.0.0.1:9/api"));
        let report = probe.probe_all().await;
        assert!(!report.design.available);
        assert!(report.design.error.is_some());
        assert!(!report.execution.available);
        assert_eq!(report.level(), IntegrationLevel::Basic);
    }

    #[tokio::test]
    async fn test_probe_available_and_non_success() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;
        let _down = server
            .mock("GET", "/down")
            .with_status(503)
            .create_async()
            .await;

        let url = server.url();
        let probe = AvailabilityProbe::new(&services(&url, &format!("{}/down", url), &url));
        let report = probe.probe_all().await;

        assert!(report.design.available);
        assert_eq!(report.design.status_code, Some(200));
        assert_eq!(report.design.content_length, Some(5));
        assert!(report.design.latency_ms.is_some());
        assert!(!report.execution.available);
        assert_eq!(report.execution.status_code, Some(503));
        assert_eq!(report.level(), IntegrationLevel::Partial);
    }
}
