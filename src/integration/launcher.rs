//! 协作服务自动启动
//!
//! 运行开始前探测两个协作服务；不可达且配置了启动命令的，用子进程拉起，
//! 每秒轮询一次，直到可达或超过 `startup_wait_secs`。拉起的子进程在运行结束时由
//! ShutdownCoordinator 统一终止。启动失败不是错误：后续迭代照常走回退路径。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config::ServicesSection;
use crate::core::ShutdownCleanup;
use crate::integration::probe::AvailabilityProbe;

/// 本次运行拉起的协作服务子进程
#[derive(Default)]
pub struct LaunchedCollaborators {
    children: Mutex<Vec<(&'static str, Child)>>,
}

impl LaunchedCollaborators {
    pub async fn count(&self) -> usize {
        self.children.lock().await.len()
    }
}

#[async_trait]
impl ShutdownCleanup for LaunchedCollaborators {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let mut children = self.children.lock().await;
        for (name, child) in children.iter_mut() {
            if let Err(e) = child.kill().await {
                tracing::warn!(service = *name, error = %e, "failed to stop collaborator");
            } else {
                tracing::info!(service = *name, "collaborator stopped");
            }
        }
        children.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collaborators"
    }
}

/// 确保协作服务可用：已可达的不动，不可达的按配置命令启动并等待就绪
pub async fn ensure_collaborators(services: &ServicesSection, probe: &AvailabilityProbe) -> LaunchedCollaborators {
    let launched = LaunchedCollaborators::default();
    let report = probe.probe_all().await;

    let candidates = [
        ("design", report.design.available, &services.design_url, &services.design_command),
        ("execution", report.execution.available, &services.execution_url, &services.execution_command),
    ];

    for (name, available, url, command) in candidates {
        if available {
            tracing::info!(service = name, url = %url, "collaborator already running");
            continue;
        }
        let Some((program, args)) = command.split_first() else {
            tracing::info!(service = name, "collaborator unavailable and no start command configured");
            continue;
        };

        tracing::info!(service = name, program = %program, "starting collaborator");
        let spawned = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(service = name, error = %e, "collaborator spawn failed");
                continue;
            }
        };
        launched.children.lock().await.push((name, child));

        if wait_until_ready(probe, name, url, services.startup_wait_secs).await {
            tracing::info!(service = name, "collaborator ready");
        } else {
            tracing::warn!(
                service = name,
                "collaborator not ready after {}s, continuing with fallback",
                services.startup_wait_secs
            );
        }
    }

    launched
}

async fn wait_until_ready(probe: &AvailabilityProbe, name: &'static str, url: &str, wait_secs: u64) -> bool {
    for _ in 0..wait_secs.max(1) {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if probe.check(name, url).await.available {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_available_services_are_not_started() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server.mock("GET", "/").with_body("ok").create_async().await;
        let services = ServicesSection {
            design_url: server.url(),
            execution_url: server.url(),
            analysis_url: server.url(),
            design_command: vec!["definitely-not-a-real-binary".to_string()],
            ..ServicesSection::default()
        };
        let probe = AvailabilityProbe::new(&services);
        let launched = ensure_collaborators(&services, &probe).await;
        assert_eq!(launched.count().await, 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_not_fatal() {
        let services = ServicesSection {
            design_url: "http://127.0.0.1:9".to_string(),
            execution_url: "http://127.0.0.1:9".to_string(),
            analysis_url: String::new(),
            probe_timeout_secs: 1,
            design_command: vec!["definitely-not-a-real-binary".to_string()],
            ..ServicesSection::default()
        };
        let probe = AvailabilityProbe::new(&services);
        let launched = ensure_collaborators(&services, &probe).await;
        assert_eq!(launched.count().await, 0);
        launched.cleanup().await.unwrap();
    }
}
