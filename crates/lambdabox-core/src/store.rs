//! Persistence collaborator for function source and execution logs
//!
//! The engine only needs two operations from storage: fetching the source of a
//! function and recording the outcome of a run. `InMemoryFunctionStore` backs
//! tests and the CLI, and also provides the management and reporting queries
//! the platform exposes around those records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::errors::EngineError;
use crate::metrics::round_to;
use crate::types::{ExecutionStatus, FunctionId, Language};

/// Maximum number of log entries returned by `execution_logs`.
pub const EXECUTION_LOG_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFunction {
    pub id: FunctionId,
    pub name: String,
    pub language: Language,
    pub code: String,
    pub timeout: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub function_id: FunctionId,
    pub exec_time: f64,
    pub mem_usage: u64,
    pub cpu_percent: f64,
    pub status: ExecutionStatus,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(
        function_id: FunctionId,
        exec_time: f64,
        mem_usage: u64,
        cpu_percent: f64,
        status: ExecutionStatus,
    ) -> Self {
        Self {
            function_id,
            exec_time,
            mem_usage,
            cpu_percent,
            status,
            output: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

/// Averages over the successful runs of one function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub total_runs: usize,
    pub avg_exec_time: f64,
    pub avg_cpu_percent: f64,
    pub avg_memory_usage: f64,
    pub last_run_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait FunctionStore: Send + Sync {
    /// Source text of the function, `None` if it does not exist.
    async fn get_function_code(&self, function_id: FunctionId) -> Result<Option<String>, EngineError>;

    async fn log_execution(&self, record: ExecutionRecord) -> Result<(), EngineError>;
}

#[derive(Default)]
struct StoreState {
    next_id: FunctionId,
    functions: BTreeMap<FunctionId, StoredFunction>,
    executions: Vec<ExecutionRecord>,
}

#[derive(Default)]
pub struct InMemoryFunctionStore {
    state: RwLock<StoreState>,
}

impl InMemoryFunctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new function and return its auto-incremented id (starting at 1).
    pub async fn insert_function(
        &self,
        name: &str,
        language: Language,
        code: &str,
        timeout: u64,
    ) -> FunctionId {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = state.next_id;
        state.functions.insert(
            id,
            StoredFunction {
                id,
                name: name.to_string(),
                language,
                code: code.to_string(),
                timeout,
                created_at: Utc::now(),
            },
        );
        id
    }

    pub async fn get_function(&self, function_id: FunctionId) -> Option<StoredFunction> {
        self.state.read().await.functions.get(&function_id).cloned()
    }

    pub async fn list_functions(&self) -> Vec<StoredFunction> {
        self.state.read().await.functions.values().cloned().collect()
    }

    /// Returns false when no function has this id.
    pub async fn update_function_code(&self, function_id: FunctionId, code: &str) -> bool {
        match self.state.write().await.functions.get_mut(&function_id) {
            Some(function) => {
                function.code = code.to_string();
                true
            }
            None => false,
        }
    }

    pub async fn delete_function(&self, function_id: FunctionId) -> bool {
        self.state
            .write()
            .await
            .functions
            .remove(&function_id)
            .is_some()
    }

    /// Most recent executions first, at most `EXECUTION_LOG_LIMIT` of them.
    pub async fn execution_logs(&self, function_id: FunctionId) -> Vec<ExecutionRecord> {
        let state = self.state.read().await;
        let mut logs: Vec<ExecutionRecord> = state
            .executions
            .iter()
            .filter(|record| record.function_id == function_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps; reverse puts newest first
        logs.sort_by_key(|record| record.timestamp);
        logs.reverse();
        logs.truncate(EXECUTION_LOG_LIMIT);
        logs
    }

    pub async fn aggregated_metrics(&self, function_id: FunctionId) -> Option<AggregatedMetrics> {
        let state = self.state.read().await;
        let successes: Vec<&ExecutionRecord> = state
            .executions
            .iter()
            .filter(|r| r.function_id == function_id && r.status == ExecutionStatus::Success)
            .collect();

        if successes.is_empty() {
            return None;
        }

        let runs = successes.len() as f64;
        let avg = |f: fn(&ExecutionRecord) -> f64| successes.iter().map(|r| f(*r)).sum::<f64>() / runs;

        Some(AggregatedMetrics {
            total_runs: successes.len(),
            avg_exec_time: round_to(avg(|r| r.exec_time), 4),
            avg_cpu_percent: round_to(avg(|r| r.cpu_percent), 2),
            avg_memory_usage: round_to(avg(|r| r.mem_usage as f64), 2),
            last_run_time: successes.iter().map(|r| r.timestamp).max(),
        })
    }
}

#[async_trait]
impl FunctionStore for InMemoryFunctionStore {
    async fn get_function_code(&self, function_id: FunctionId) -> Result<Option<String>, EngineError> {
        Ok(self
            .state
            .read()
            .await
            .functions
            .get(&function_id)
            .map(|function| function.code.clone()))
    }

    async fn log_execution(&self, record: ExecutionRecord) -> Result<(), EngineError> {
        self.state.write().await.executions.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_assigns_incrementing_ids() {
        let store = InMemoryFunctionStore::new();
        let first = store.insert_function("a", Language::Python, "print(1)", 5).await;
        let second = store.insert_function("b", Language::Javascript, "console.log(2)", 3).await;

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(store.list_functions().await.len(), 2);
        assert_eq!(
            store.get_function_code(second).await.unwrap().as_deref(),
            Some("console.log(2)")
        );
        assert_eq!(store.get_function_code(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemoryFunctionStore::new();
        let id = store.insert_function("a", Language::Python, "print(1)", 5).await;

        assert!(store.update_function_code(id, "print(2)").await);
        assert_eq!(store.get_function(id).await.unwrap().code, "print(2)");
        assert!(!store.update_function_code(42, "x").await);

        assert!(store.delete_function(id).await);
        assert!(!store.delete_function(id).await);
        assert!(store.get_function(id).await.is_none());
    }

    #[tokio::test]
    async fn test_execution_logs_are_newest_first_and_capped() {
        let store = InMemoryFunctionStore::new();
        for i in 0..60 {
            let record = ExecutionRecord::new(1, i as f64, 0, 0.0, ExecutionStatus::Success);
            store.log_execution(record).await.unwrap();
        }
        store
            .log_execution(ExecutionRecord::new(2, 0.0, 0, 0.0, ExecutionStatus::Error))
            .await
            .unwrap();

        let logs = store.execution_logs(1).await;
        assert_eq!(logs.len(), EXECUTION_LOG_LIMIT);
        assert_eq!(logs[0].exec_time, 59.0);
        assert!(logs.iter().all(|r| r.function_id == 1));
    }

    #[tokio::test]
    async fn test_aggregated_metrics_only_count_successes() {
        let store = InMemoryFunctionStore::new();
        assert!(store.aggregated_metrics(1).await.is_none());

        for (time, cpu, mem) in [(0.1, 1.0, 100), (0.2, 2.0, 200), (0.3, 3.335, 301)] {
            store
                .log_execution(ExecutionRecord::new(1, time, mem, cpu, ExecutionStatus::Success))
                .await
                .unwrap();
        }
        store
            .log_execution(ExecutionRecord::new(1, 9.0, 9_999, 99.0, ExecutionStatus::Timeout))
            .await
            .unwrap();

        let metrics = store.aggregated_metrics(1).await.unwrap();
        assert_eq!(metrics.total_runs, 3);
        assert_eq!(metrics.avg_exec_time, 0.2);
        assert_eq!(metrics.avg_cpu_percent, 2.11);
        assert_eq!(metrics.avg_memory_usage, 200.33);
        assert!(metrics.last_run_time.is_some());
    }

    #[test]
    fn test_record_output_builder() {
        let record = ExecutionRecord::new(3, 0.5, 10, 1.0, ExecutionStatus::Success).with_output("hi");
        assert_eq!(record.output, "hi");
        assert_eq!(record.function_id, 3);
    }
}
