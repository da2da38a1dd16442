//! 核心层：致命错误类型、中断与清理

pub mod error;
pub mod shutdown;

pub use error::{LoopError, LoopResult};
pub use shutdown::{CleanupOutcome, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
