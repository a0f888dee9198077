//! The outbound seam to the agent executor.
//!
//! The core only records prompt, model, and result; the process that turns a
//! prompt into file edits lives outside. Executors receive an
//! [`ExecutionRequest`] and return an [`ExecutionOutcome`] whose fields flow
//! straight into `RunQueue::complete_run`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

use super::RunRecord;

/// Everything an executor is handed for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub working_directory: Option<PathBuf>,
}

impl ExecutionRequest {
    /// Build a request from a claimed run.
    pub fn for_run(run: &RunRecord) -> Self {
        Self {
            prompt: run.prompt.clone(),
            system_prompt: None,
            model: run.model.clone(),
            working_directory: None,
        }
    }
}

/// Whether the execution produced a usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// What an executor hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// Raw message values; the queue sanitizes them on completion.
    pub messages: Vec<serde_json::Value>,
    pub changes: Vec<serde_json::Value>,
    pub error: Option<String>,
}

/// An external agent executor.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Execute one run. Called outside any store transaction; may take
    /// arbitrarily long.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome>;
}

/// Executor stand-in for tests and local simulation.
///
/// Echoes the prompt back as a single result message and reports success,
/// which is enough to drive the full queue lifecycle without a real agent.
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor;

#[async_trait]
impl AgentExecutor for SimulatedExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        Ok(ExecutionOutcome {
            status: ExecutionStatus::Success,
            messages: vec![serde_json::Value::String(format!(
                "Simulated response to: {}",
                request.prompt
            ))],
            changes: vec![],
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_executor_echoes_prompt() {
        let outcome = SimulatedExecutor
            .execute(ExecutionRequest {
                prompt: "add a cache layer".into(),
                system_prompt: None,
                model: None,
                working_directory: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.messages.len(), 1);
        assert!(outcome.messages[0]
            .as_str()
            .unwrap()
            .contains("add a cache layer"));
    }
}
