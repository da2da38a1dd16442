//! 中断与运行结束清理
//!
//! 操作员中断（Ctrl+C / SIGTERM）只设置取消标记：循环在当前进行中的阶段结束后停止，
//! 已写入的产物全部保留。不存在阶段内取消。
//! 运行结束时（无论正常、出错还是被中断）按注册顺序执行清理任务，例如结束自动启动的协作服务进程。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// 中断来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::UserInitiated => write!(f, "interrupted by operator"),
            ShutdownReason::Signal => write!(f, "terminated by signal"),
        }
    }
}

/// 取消标记 + 首次中断来源；可 clone 后交给信号处理任务
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    first_reason: Arc<Mutex<Option<ShutdownReason>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 循环在阶段之间检查的取消标记
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 请求停止；重复请求不覆盖第一次的来源
    pub fn shutdown(&self, reason: ShutdownReason) {
        if let Ok(mut slot) = self.first_reason.lock() {
            if slot.is_none() {
                tracing::info!(reason = %reason, "stop requested, finishing the in-flight stage");
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.first_reason.lock().ok().and_then(|r| *r)
    }

    /// 监听 Ctrl+C 与（unix 下）SIGTERM
    pub fn install_signal_handlers(&self) {
        let on_ctrl_c = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_ctrl_c.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let on_term = self.clone();
            tokio::spawn(async move {
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        on_term.shutdown(ShutdownReason::Signal);
                    }
                    Err(e) => tracing::warn!(error = %e, "could not listen for SIGTERM"),
                }
            });
        }
    }
}

/// 运行结束时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 单个清理任务的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Done(&'static str),
    Failed(&'static str, String),
    TimedOut(&'static str),
}

/// 按注册顺序执行清理任务，每个任务单独计时；某个任务失败或超时不影响后续任务
pub struct ShutdownCoordinator {
    tasks: Vec<Arc<dyn ShutdownCleanup>>,
    per_task_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            per_task_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.per_task_timeout = Duration::from_secs(secs);
        self
    }

    pub fn register(&mut self, task: Arc<dyn ShutdownCleanup>) {
        self.tasks.push(task);
    }

    pub async fn run_cleanup(&self) -> Vec<CleanupOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let name = task.name();
            let outcome = match tokio::time::timeout(self.per_task_timeout, task.cleanup()).await {
                Ok(Ok(())) => CleanupOutcome::Done(name),
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %e, "cleanup failed");
                    CleanupOutcome::Failed(name, e.to_string())
                }
                Err(_) => {
                    tracing::warn!(task = name, timeout_secs = self.per_task_timeout.as_secs(), "cleanup timed out");
                    CleanupOutcome::TimedOut(name)
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());
        let token = manager.token();
        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::Signal));
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl ShutdownCleanup for Counting {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl ShutdownCleanup for Broken {
        async fn cleanup(&self) -> anyhow::Result<()> {
            anyhow::bail!("child already gone")
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    struct Stuck;

    #[async_trait::async_trait]
    impl ShutdownCleanup for Stuck {
        async fn cleanup(&self) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stuck"
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_later_tasks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut coordinator = ShutdownCoordinator::new().with_timeout(1);
        coordinator.register(Arc::new(Broken));
        coordinator.register(Arc::new(Stuck));
        coordinator.register(Arc::new(Counting(calls.clone())));

        let outcomes = coordinator.run_cleanup().await;
        assert_eq!(
            outcomes,
            vec![
                CleanupOutcome::Failed("broken", "child already gone".to_string()),
                CleanupOutcome::TimedOut("stuck"),
                CleanupOutcome::Done("counting"),
            ]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
