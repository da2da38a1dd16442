//! 可观测性：日志订阅器初始化
//!
//! 默认 info 级别，可通过 RUST_LOG 覆盖（如 `RUST_LOG=testloop=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化全局 tracing 订阅器；重复调用时忽略（测试中多次初始化不报错）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
