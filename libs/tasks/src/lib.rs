//! # taskfleet-tasks
//!
//! Boundary to the container-orchestration backend that runs fleet tasks.
//!
//! The fleet agent never talks to a cloud SDK directly. Everything it needs
//! from the backend goes through the [`TaskFacade`] trait:
//!
//! - listing and describing tasks
//! - launching tasks from a task definition (with environment overrides)
//! - stopping tasks
//! - listing and describing clusters and task definitions
//! - a connection diagnostic
//!
//! [`InMemoryTaskFacade`] is a complete in-process implementation used by
//! tests and by the agent binary in development mode.

mod error;
mod memory;
mod model;

use std::collections::BTreeMap;

use async_trait::async_trait;

pub use error::{ApiFailure, TaskError};
pub use memory::{InMemoryTaskFacade, Operation};
pub use model::{ClusterDetail, ContainerOverride, KeyValuePair, TaskDefinition, TaskDetail};

/// Result of an explicit connectivity check against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestConnectionResult {
    /// Human readable outcome.
    pub message: String,

    /// Whether the backend answered.
    pub success: bool,
}

impl TestConnectionResult {
    pub fn ok() -> Self {
        Self {
            message: "Connection successful".to_string(),
            success: true,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
        }
    }
}

/// Task and cluster operations over the orchestration backend.
///
/// Implementations own their timeout and retry policy. Callers treat any
/// returned error as terminal for the current operation.
#[async_trait]
pub trait TaskFacade: Send + Sync {
    /// List task arns in `cluster`, optionally filtered by the `started_by` tag.
    async fn list_tasks(
        &self,
        cluster: Option<&str>,
        started_by: Option<&str>,
    ) -> Result<Vec<String>, TaskError>;

    /// Describe a single task. `Ok(None)` means the backend no longer knows it.
    async fn describe_task(
        &self,
        task_arn: &str,
        cluster: Option<&str>,
    ) -> Result<Option<TaskDetail>, TaskError>;

    /// Launch tasks from `task_definition`, overriding the environment of
    /// every container with `environment`.
    async fn run_task(
        &self,
        task_definition: &TaskDefinition,
        cluster: Option<&str>,
        group: Option<&str>,
        environment: &BTreeMap<String, String>,
        started_by: Option<&str>,
    ) -> Result<Vec<TaskDetail>, TaskError>;

    /// Request a task stop. Stopping an already stopped task succeeds.
    async fn stop_task(
        &self,
        task_arn: &str,
        cluster: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), TaskError>;

    async fn list_clusters(&self) -> Result<Vec<String>, TaskError>;

    async fn describe_cluster(&self, cluster_arn: &str)
        -> Result<Option<ClusterDetail>, TaskError>;

    async fn list_task_definitions(&self) -> Result<Vec<String>, TaskError>;

    async fn describe_task_definition(
        &self,
        task_definition_arn: &str,
    ) -> Result<Option<TaskDefinition>, TaskError>;

    /// Connectivity diagnostic. Failures are reported in the result, never raised.
    async fn test_connection(&self) -> TestConnectionResult;
}
