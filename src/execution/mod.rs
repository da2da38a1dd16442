//! 人工参与式测试执行：状态机与执行存储

pub mod state_machine;
pub mod store;

pub use state_machine::{ExecutionState, ExecutionStyle, InterventionEntry, TestExecution, TransitionError};
pub use store::{ExecutionStore, StoreError};
