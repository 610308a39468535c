//! Instance records.
//!
//! An instance record binds one remote task to a logical instance id. The
//! id travels with the task as a container environment override
//! ([`INSTANCE_ID_ENV`]), which is how reconciliation finds it again.
//!
//! Lifecycle: `Discovered -> Active -> Terminating -> Gone`. Discovered
//! records are inserted as Active; Gone means removed from the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskfleet_tasks::{TaskDetail, TaskError, TaskFacade};
use tracing::info;

use crate::config::ImageConfig;

/// Environment override carrying the logical instance id on every launched task.
pub const INSTANCE_ID_ENV: &str = "TASKFLEET_INSTANCE_ID";

/// Environment override carrying the generated agent name.
pub const AGENT_NAME_ENV: &str = "TASKFLEET_AGENT_NAME";

pub const IMAGE_ID_ENV: &str = "TASKFLEET_IMAGE_ID";
pub const PROFILE_ID_ENV: &str = "TASKFLEET_PROFILE_ID";
pub const SERVER_UUID_ENV: &str = "TASKFLEET_SERVER_UUID";

const TERMINATE_REASON: &str = "Terminated by fleet agent";

/// Local lifecycle state of a tracked instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Present in the registry, remote task presumed running.
    Active,

    /// Stop requested; visible until deleted.
    Terminating,
}

/// Instance status as reported to the fleet manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Unknown,
}

impl InstanceStatus {
    /// Map a backend `lastStatus` value.
    pub fn from_task_status(last_status: &str) -> Self {
        match last_status {
            "PROVISIONING" | "PENDING" | "ACTIVATING" => Self::Starting,
            "RUNNING" => Self::Running,
            "DEACTIVATING" | "STOPPING" | "DEPROVISIONING" => Self::Stopping,
            "STOPPED" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A tracked remote task bound to a logical instance.
///
/// Records are immutable apart from the lifecycle flag; reconciliation
/// replaces a record wholesale when fresher task detail arrives. The
/// replacement shares the flag of the record it replaces, so a stop that
/// completes on a replaced record is still seen through the live one.
pub struct InstanceRecord {
    instance_id: String,

    /// Configuration of the owning image. Navigation only.
    image: Arc<ImageConfig>,

    /// Task detail from the last successful describe.
    task: TaskDetail,

    terminating: Arc<AtomicBool>,

    facade: Arc<dyn TaskFacade>,
}

impl InstanceRecord {
    /// Create an Active record.
    pub fn new(
        instance_id: impl Into<String>,
        image: Arc<ImageConfig>,
        task: TaskDetail,
        facade: Arc<dyn TaskFacade>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            image,
            task,
            terminating: Arc::new(AtomicBool::new(false)),
            facade,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Id of the owning image.
    pub fn image_id(&self) -> &str {
        &self.image.id
    }

    pub fn task(&self) -> &TaskDetail {
        &self.task
    }

    pub fn task_arn(&self) -> &str {
        &self.task.arn
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.terminating.load(Ordering::Acquire) {
            Lifecycle::Terminating
        } else {
            Lifecycle::Active
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminating
    }

    /// Take over the lifecycle flag of the record this one replaces.
    pub(crate) fn succeeding(mut self, previous: &InstanceRecord) -> Self {
        self.terminating = Arc::clone(&previous.terminating);
        self
    }

    fn mark_terminating(&self) {
        self.terminating.store(true, Ordering::Release);
    }

    /// Status derived from the last observed task state.
    pub fn status(&self) -> InstanceStatus {
        let status = InstanceStatus::from_task_status(&self.task.last_status);
        if self.is_terminating() && status != InstanceStatus::Stopped {
            InstanceStatus::Stopping
        } else {
            status
        }
    }

    /// When the task started, or was created if it has not started yet.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.task.started_at.or(self.task.created_at)
    }

    /// Agent name for this instance. Stable for a given image and id.
    pub fn generate_agent_name(&self) -> String {
        agent_name(&self.image, &self.instance_id)
    }

    /// Stop the remote task and mark the record Terminating.
    ///
    /// Repeated calls re-issue the stop. A failed stop leaves the state unchanged.
    pub async fn terminate(&self) -> Result<(), TaskError> {
        info!(
            instance_id = %self.instance_id,
            image_id = %self.image.id,
            task_arn = %self.task.arn,
            "Terminating instance"
        );

        self.facade
            .stop_task(
                &self.task.arn,
                self.image.cluster.as_deref(),
                Some(TERMINATE_REASON),
            )
            .await?;

        self.mark_terminating();
        Ok(())
    }
}

impl std::fmt::Debug for InstanceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRecord")
            .field("instance_id", &self.instance_id)
            .field("image_id", &self.image.id)
            .field("task_arn", &self.task.arn)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

pub(crate) fn agent_name(image: &ImageConfig, instance_id: &str) -> String {
    format!("{}{}", image.agent_name_prefix, instance_id)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use taskfleet_tasks::{InMemoryTaskFacade, Operation};

    use super::*;

    fn image() -> Arc<ImageConfig> {
        Arc::new(ImageConfig {
            id: "linux-small".to_string(),
            task_definition: "agent:1".to_string(),
            cluster: None,
            task_group: None,
            instance_limit: 2,
            agent_name_prefix: "ecs-".to_string(),
            agent_pool_id: None,
        })
    }

    async fn launched(backend: &Arc<InMemoryTaskFacade>) -> TaskDetail {
        let def = backend
            .describe_task_definition("agent:1")
            .await
            .unwrap()
            .unwrap();
        backend
            .run_task(&def, None, None, &BTreeMap::new(), None)
            .await
            .unwrap()
            .remove(0)
    }

    fn backend() -> Arc<InMemoryTaskFacade> {
        Arc::new(InMemoryTaskFacade::new().with_task_definition_named("agent:1", &["agent"]))
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(InstanceStatus::from_task_status("PROVISIONING"), InstanceStatus::Starting);
        assert_eq!(InstanceStatus::from_task_status("RUNNING"), InstanceStatus::Running);
        assert_eq!(InstanceStatus::from_task_status("DEPROVISIONING"), InstanceStatus::Stopping);
        assert_eq!(InstanceStatus::from_task_status("STOPPED"), InstanceStatus::Stopped);
        assert_eq!(InstanceStatus::from_task_status("weird"), InstanceStatus::Unknown);
        assert_eq!(InstanceStatus::Running.to_string(), "running");
    }

    #[tokio::test]
    async fn test_agent_name_is_stable() {
        let backend = backend();
        let task = launched(&backend).await;
        let record = InstanceRecord::new("abc", image(), task, backend);

        assert_eq!(record.generate_agent_name(), "ecs-abc");
        assert_eq!(record.generate_agent_name(), record.generate_agent_name());
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let backend = backend();
        let task = launched(&backend).await;
        let arn = task.arn.clone();
        let record = InstanceRecord::new("abc", image(), task, backend.clone());
        assert_eq!(record.lifecycle(), Lifecycle::Active);
        assert_eq!(record.status(), InstanceStatus::Starting);

        record.terminate().await.unwrap();
        record.terminate().await.unwrap();

        assert_eq!(record.lifecycle(), Lifecycle::Terminating);
        assert_eq!(record.status(), InstanceStatus::Stopping);
        assert_eq!(backend.call_count(Operation::StopTask).await, 2);
        assert_eq!(backend.task(&arn).await.unwrap().desired_status, "STOPPED");
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_state() {
        let backend = backend();
        let task = launched(&backend).await;
        let record = InstanceRecord::new("abc", image(), task, backend.clone());

        backend
            .fail_with(Operation::StopTask, TaskError::backend("StopTask", "denied"))
            .await;

        assert!(record.terminate().await.is_err());
        assert_eq!(record.lifecycle(), Lifecycle::Active);
    }

    #[tokio::test]
    async fn test_successor_shares_lifecycle() {
        let backend = backend();
        let task = launched(&backend).await;
        let previous = InstanceRecord::new("abc", image(), task.clone(), backend.clone());
        let successor = InstanceRecord::new("abc", image(), task, backend.clone()).succeeding(&previous);
        assert_eq!(successor.lifecycle(), Lifecycle::Active);

        previous.terminate().await.unwrap();

        assert_eq!(successor.lifecycle(), Lifecycle::Terminating);
    }

    #[tokio::test]
    async fn test_start_time_falls_back_to_created() {
        let backend = backend();
        let task = launched(&backend).await;
        let created = task.created_at;
        let record = InstanceRecord::new("abc", image(), task, backend);

        assert!(created.is_some());
        assert_eq!(record.start_time(), created);
    }
}
