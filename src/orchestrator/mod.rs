//! 循环编排：迭代顺序执行、继续判定、产物存储与最终报告

pub mod loop_;
pub mod policy;
pub mod report;
pub mod storage;

pub use loop_::LoopOrchestrator;
pub use policy::ContinuationPolicy;
pub use report::{FinalReport, ImprovementTrend, IterationSummary, LoopOutcome};
pub use storage::{ArtifactStore, IterationScope};
