//! 执行存储：按执行 ID 保存本迭代内的 TestExecution
//!
//! 每次迭代新建一个存储并显式传入执行流程，不存在进程级全局表；
//! 条目按插入顺序保存，导出与汇总时顺序稳定。

use thiserror::Error;

use crate::execution::state_machine::{ExecutionStyle, TestExecution, TransitionError};
use crate::model::{StepStatus, TestCase};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unknown execution: {0}")]
    Unknown(String),

    #[error("Execution already exists: {0}")]
    Duplicate(String),

    #[error("Execution {id}: {source}")]
    Transition {
        id: String,
        #[source]
        source: TransitionError,
    },
}

#[derive(Debug, Default)]
pub struct ExecutionStore {
    entries: Vec<(String, TestExecution)>,
    next_local_id: usize,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 生成本地执行 ID（协作服务未给出 ID 时使用）
    pub fn next_id(&mut self) -> String {
        self.next_local_id += 1;
        format!("local-{:04}", self.next_local_id)
    }

    pub fn create(
        &mut self,
        execution_id: impl Into<String>,
        case: &TestCase,
        style: ExecutionStyle,
    ) -> Result<&mut TestExecution, StoreError> {
        let id = execution_id.into();
        if self.position(&id).is_some() {
            return Err(StoreError::Duplicate(id));
        }
        self.entries.push((id, TestExecution::new(case, style)));
        let last = self.entries.len() - 1;
        Ok(&mut self.entries[last].1)
    }

    pub fn get(&self, execution_id: &str) -> Option<&TestExecution> {
        self.position(execution_id).map(|i| &self.entries[i].1)
    }

    pub fn start(&mut self, execution_id: &str) -> Result<(), StoreError> {
        self.with(execution_id, |exec| exec.start())
    }

    pub fn complete_step(
        &mut self,
        execution_id: &str,
        result: impl Into<String>,
        status: StepStatus,
        notes: Option<String>,
    ) -> Result<(), StoreError> {
        let result = result.into();
        self.with(execution_id, move |exec| {
            exec.complete_step(result, status, notes).map(|_| ())
        })
    }

    pub fn fail(&mut self, execution_id: &str, reason: impl Into<String>) -> Result<(), StoreError> {
        let reason = reason.into();
        self.with(execution_id, move |exec| exec.fail(reason))
    }

    pub fn add_intervention(
        &mut self,
        execution_id: &str,
        kind: &str,
        description: &str,
        result: &str,
    ) -> Result<(), StoreError> {
        self.with(execution_id, |exec| exec.add_intervention(kind, description, result))
    }

    /// 导出单个执行的表格
    pub fn export(&self, execution_id: &str) -> Result<Option<String>, csv::Error> {
        match self.get(execution_id) {
            Some(exec) => exec.export_csv().map(Some),
            None => Ok(None),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TestExecution)> {
        self.entries.iter().map(|(id, exec)| (id.as_str(), exec))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, execution_id: &str) -> Option<usize> {
        self.entries.iter().position(|(id, _)| id == execution_id)
    }

    fn with<F>(&mut self, execution_id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TestExecution) -> Result<(), TransitionError>,
    {
        let idx = self
            .position(execution_id)
            .ok_or_else(|| StoreError::Unknown(execution_id.to_string()))?;
        f(&mut self.entries[idx].1).map_err(|source| StoreError::Transition {
            id: execution_id.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::state_machine::ExecutionState;

    fn case(id: &str) -> TestCase {
        TestCase::new(id, "case", vec!["a".into(), "b".into()], vec![])
    }

    #[test]
    fn test_create_and_drive() {
        let mut store = ExecutionStore::new();
        let id = store.next_id();
        store.create(&id, &case("TC-1"), ExecutionStyle::Observer).unwrap();
        store.start(&id).unwrap();
        store.complete_step(&id, "ok", StepStatus::Passed, None).unwrap();
        store.complete_step(&id, "ok", StepStatus::Passed, None).unwrap();
        assert_eq!(store.get(&id).unwrap().state(), ExecutionState::Completed);
        assert!(store.export(&id).unwrap().unwrap().contains("TC-1"));
    }

    #[test]
    fn test_unknown_and_duplicate() {
        let mut store = ExecutionStore::new();
        assert_eq!(store.start("missing"), Err(StoreError::Unknown("missing".into())));
        store.create("x", &case("TC-1"), ExecutionStyle::default()).unwrap();
        assert!(matches!(
            store.create("x", &case("TC-2"), ExecutionStyle::default()),
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.export("missing").unwrap(), None);
    }

    #[test]
    fn test_transition_error_wrapped() {
        let mut store = ExecutionStore::new();
        store.create("x", &case("TC-1"), ExecutionStyle::default()).unwrap();
        let err = store.complete_step("x", "r", StepStatus::Passed, None).unwrap_err();
        assert!(matches!(err, StoreError::Transition { .. }));
        assert!(store.add_intervention("x", "note", "too early", "").is_err());
    }

    #[test]
    fn test_insertion_order_and_ids() {
        let mut store = ExecutionStore::new();
        let a = store.next_id();
        let b = store.next_id();
        assert_ne!(a, b);
        store.create(&b, &case("TC-B"), ExecutionStyle::default()).unwrap();
        store.create(&a, &case("TC-A"), ExecutionStyle::default()).unwrap();
        let order: Vec<&str> = store.iter().map(|(_, e)| e.test_case_id.as_str()).collect();
        assert_eq!(order, vec!["TC-B", "TC-A"]);
        assert_eq!(store.len(), 2);
    }
}
