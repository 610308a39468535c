//! In-memory task facade for testing and development.
//!
//! Behaves like a single-account backend: tasks live in clusters, launched
//! tasks get generated arns, stopped tasks drop out of listings. Faults can
//! be injected per operation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ApiFailure, TaskError};
use crate::model::{ClusterDetail, ContainerOverride, KeyValuePair, TaskDefinition, TaskDetail};
use crate::{TaskFacade, TestConnectionResult};

const ARN_PREFIX: &str = "arn:aws:ecs:local:000000000000";
const DEFAULT_CLUSTER: &str = "default";

/// Facade operations, used for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    ListTasks,
    DescribeTask,
    RunTask,
    StopTask,
    ListClusters,
    DescribeCluster,
    ListTaskDefinitions,
    DescribeTaskDefinition,
}

impl Operation {
    fn api_name(self) -> &'static str {
        match self {
            Operation::ListTasks => "ListTasks",
            Operation::DescribeTask => "DescribeTasks",
            Operation::RunTask => "RunTask",
            Operation::StopTask => "StopTask",
            Operation::ListClusters => "ListClusters",
            Operation::DescribeCluster => "DescribeClusters",
            Operation::ListTaskDefinitions => "ListTaskDefinitions",
            Operation::DescribeTaskDefinition => "DescribeTaskDefinition",
        }
    }
}

#[derive(Default)]
struct State {
    tasks: BTreeMap<String, TaskDetail>,
    clusters: BTreeMap<String, ClusterDetail>,
    task_definitions: BTreeMap<String, TaskDefinition>,

    /// Listed but no longer describable.
    vanished: BTreeSet<String>,

    faults: BTreeMap<Operation, TaskError>,
    pending_run_failures: Vec<ApiFailure>,
    calls: BTreeMap<Operation, u64>,
}

/// In-memory [`TaskFacade`].
pub struct InMemoryTaskFacade {
    state: RwLock<State>,

    /// Counter for generating task arns.
    task_counter: AtomicU64,
}

impl InMemoryTaskFacade {
    /// Create an empty backend with only the default cluster.
    pub fn new() -> Self {
        let mut state = State::default();
        let arn = cluster_arn(DEFAULT_CLUSTER);
        state.clusters.insert(arn.clone(), new_cluster(arn, DEFAULT_CLUSTER));

        Self {
            state: RwLock::new(state),
            task_counter: AtomicU64::new(0),
        }
    }

    /// Register a cluster by short name.
    pub fn with_cluster(mut self, name: &str) -> Self {
        let arn = cluster_arn(name);
        self.state
            .get_mut()
            .clusters
            .insert(arn.clone(), new_cluster(arn, name));
        self
    }

    /// Register a task definition.
    pub fn with_task_definition(mut self, definition: TaskDefinition) -> Self {
        self.state
            .get_mut()
            .task_definitions
            .insert(definition.arn.clone(), definition);
        self
    }

    /// Register a task definition from `family:revision` with the given containers.
    pub fn with_task_definition_named(self, family_revision: &str, containers: &[&str]) -> Self {
        let (family, revision) = match family_revision.rsplit_once(':') {
            Some((family, revision)) => (family, revision.parse().unwrap_or(1)),
            None => (family_revision, 1),
        };
        self.with_task_definition(TaskDefinition {
            arn: format!("{ARN_PREFIX}:task-definition/{family}:{revision}"),
            family: family.to_string(),
            revision,
            containers: containers.iter().map(|c| c.to_string()).collect(),
        })
    }

    /// Insert or replace a task as if it had been launched out of band.
    pub async fn insert_task(&self, task: TaskDetail) {
        let mut state = self.state.write().await;
        state.vanished.remove(&task.arn);
        state.tasks.insert(task.arn.clone(), task);
    }

    /// Forget a task entirely.
    pub async fn remove_task(&self, task_arn: &str) {
        let mut state = self.state.write().await;
        state.tasks.remove(task_arn);
        state.vanished.remove(task_arn);
    }

    /// Keep a task in listings but make describes return nothing.
    pub async fn mark_vanished(&self, task_arn: &str) {
        self.state
            .write()
            .await
            .vanished
            .insert(task_arn.to_string());
    }

    /// Overwrite a task's last known status.
    pub async fn set_task_status(&self, task_arn: &str, last_status: &str) {
        let mut state = self.state.write().await;
        if let Some(task) = state.tasks.get_mut(task_arn) {
            task.last_status = last_status.to_string();
            if last_status == "RUNNING" && task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
        }
    }

    pub async fn task(&self, task_arn: &str) -> Option<TaskDetail> {
        self.state.read().await.tasks.get(task_arn).cloned()
    }

    /// Make every call to `operation` fail with `error` until cleared.
    pub async fn fail_with(&self, operation: Operation, error: TaskError) {
        self.state.write().await.faults.insert(operation, error);
    }

    pub async fn clear_failure(&self, operation: Operation) {
        self.state.write().await.faults.remove(&operation);
    }

    /// Make the next `run_task` report per-item failures.
    pub async fn fail_next_run(&self, failures: Vec<ApiFailure>) {
        self.state.write().await.pending_run_failures = failures;
    }

    /// Number of calls made to `operation`, including failed ones.
    pub async fn call_count(&self, operation: Operation) -> u64 {
        self.state
            .read()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    fn next_task_arn(&self, cluster_name: &str) -> String {
        let counter = self.task_counter.fetch_add(1, Ordering::SeqCst);
        format!("{ARN_PREFIX}:task/{cluster_name}/{counter:032x}")
    }
}

impl Default for InMemoryTaskFacade {
    fn default() -> Self {
        Self::new()
    }
}

/// Record the call and surface any injected fault.
fn enter(state: &mut State, operation: Operation) -> Result<(), TaskError> {
    *state.calls.entry(operation).or_default() += 1;
    match state.faults.get(&operation) {
        Some(error) => Err(error.clone()),
        None => Ok(()),
    }
}

fn cluster_arn(cluster: &str) -> String {
    if cluster.starts_with("arn:") {
        cluster.to_string()
    } else {
        format!("{ARN_PREFIX}:cluster/{cluster}")
    }
}

fn cluster_name(cluster: &str) -> &str {
    cluster.rsplit('/').next().unwrap_or(cluster)
}

fn resolve_cluster(cluster: Option<&str>) -> String {
    cluster_arn(cluster.filter(|c| !c.is_empty()).unwrap_or(DEFAULT_CLUSTER))
}

fn new_cluster(arn: String, name: &str) -> ClusterDetail {
    ClusterDetail {
        arn,
        name: name.to_string(),
        status: "ACTIVE".to_string(),
        running_tasks_count: 0,
        pending_tasks_count: 0,
    }
}

fn find_task_definition<'a>(
    definitions: &'a BTreeMap<String, TaskDefinition>,
    reference: &str,
) -> Option<&'a TaskDefinition> {
    if let Some(def) = definitions.get(reference) {
        return Some(def);
    }
    if let Some(def) = definitions
        .values()
        .find(|def| def.family_revision() == reference)
    {
        return Some(def);
    }
    // Bare family resolves to the latest revision.
    definitions
        .values()
        .filter(|def| def.family == reference)
        .max_by_key(|def| def.revision)
}

#[async_trait]
impl TaskFacade for InMemoryTaskFacade {
    async fn list_tasks(
        &self,
        cluster: Option<&str>,
        started_by: Option<&str>,
    ) -> Result<Vec<String>, TaskError> {
        let mut state = self.state.write().await;
        enter(&mut state, Operation::ListTasks)?;

        let cluster = resolve_cluster(cluster);
        let arns = state
            .tasks
            .values()
            .filter(|task| task.cluster_arn.as_deref() == Some(cluster.as_str()))
            .filter(|task| task.desired_status != "STOPPED")
            .filter(|task| match started_by {
                Some(tag) => task.started_by.as_deref() == Some(tag),
                None => true,
            })
            .map(|task| task.arn.clone())
            .collect::<Vec<_>>();

        debug!(cluster = %cluster, task_count = arns.len(), "[MEMORY] Listed tasks");
        Ok(arns)
    }

    async fn describe_task(
        &self,
        task_arn: &str,
        cluster: Option<&str>,
    ) -> Result<Option<TaskDetail>, TaskError> {
        let mut state = self.state.write().await;
        enter(&mut state, Operation::DescribeTask)?;

        if state.vanished.contains(task_arn) {
            return Ok(None);
        }
        let cluster = resolve_cluster(cluster);
        Ok(state
            .tasks
            .get(task_arn)
            .filter(|task| task.cluster_arn.as_deref() == Some(cluster.as_str()))
            .cloned())
    }

    async fn run_task(
        &self,
        task_definition: &TaskDefinition,
        cluster: Option<&str>,
        group: Option<&str>,
        environment: &BTreeMap<String, String>,
        started_by: Option<&str>,
    ) -> Result<Vec<TaskDetail>, TaskError> {
        let mut state = self.state.write().await;
        enter(&mut state, Operation::RunTask)?;

        if !state.pending_run_failures.is_empty() {
            let failures = std::mem::take(&mut state.pending_run_failures);
            return Err(TaskError::ApiCallFailure { failures });
        }

        let cluster = resolve_cluster(cluster);
        if !state.clusters.contains_key(&cluster) {
            return Err(TaskError::ApiCallFailure {
                failures: vec![ApiFailure {
                    arn: Some(cluster),
                    reason: "MISSING".to_string(),
                    detail: Some("cluster not found".to_string()),
                }],
            });
        }

        let containers = if task_definition.containers.is_empty() {
            vec![task_definition.family.clone()]
        } else {
            task_definition.containers.clone()
        };
        let env_pairs: Vec<KeyValuePair> = environment
            .iter()
            .map(|(name, value)| KeyValuePair {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();

        let task = TaskDetail {
            arn: self.next_task_arn(cluster_name(&cluster)),
            cluster_arn: Some(cluster.clone()),
            task_definition_arn: task_definition.arn.clone(),
            group: group.filter(|g| !g.is_empty()).map(str::to_string),
            started_by: started_by.map(str::to_string),
            last_status: "PENDING".to_string(),
            desired_status: "RUNNING".to_string(),
            created_at: Some(Utc::now()),
            started_at: None,
            overrides: containers
                .into_iter()
                .map(|name| ContainerOverride {
                    name,
                    environment: env_pairs.clone(),
                })
                .collect(),
        };

        info!(
            task_arn = %task.arn,
            task_definition = %task_definition.arn,
            cluster = %cluster,
            "[MEMORY] Task started"
        );

        state.tasks.insert(task.arn.clone(), task.clone());
        Ok(vec![task])
    }

    async fn stop_task(
        &self,
        task_arn: &str,
        cluster: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), TaskError> {
        let mut state = self.state.write().await;
        enter(&mut state, Operation::StopTask)?;

        let cluster = resolve_cluster(cluster);
        match state.tasks.get_mut(task_arn) {
            Some(task) if task.cluster_arn.as_deref() == Some(cluster.as_str()) => {
                task.desired_status = "STOPPED".to_string();
                task.last_status = "STOPPED".to_string();
                info!(
                    task_arn = %task_arn,
                    reason = reason.unwrap_or(""),
                    "[MEMORY] Task stopped"
                );
            }
            _ => debug!(task_arn = %task_arn, "[MEMORY] Stop for unknown task ignored"),
        }
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<String>, TaskError> {
        let mut state = self.state.write().await;
        enter(&mut state, Operation::ListClusters)?;
        Ok(state.clusters.keys().cloned().collect())
    }

    async fn describe_cluster(
        &self,
        cluster_arn_or_name: &str,
    ) -> Result<Option<ClusterDetail>, TaskError> {
        let mut state = self.state.write().await;
        enter(&mut state, Operation::DescribeCluster)?;

        let arn = cluster_arn(cluster_arn_or_name);
        let Some(mut cluster) = state.clusters.get(&arn).cloned() else {
            return Ok(None);
        };

        let in_cluster = state
            .tasks
            .values()
            .filter(|task| task.cluster_arn.as_deref() == Some(arn.as_str()));
        for task in in_cluster {
            match task.last_status.as_str() {
                "RUNNING" => cluster.running_tasks_count += 1,
                "PROVISIONING" | "PENDING" | "ACTIVATING" => cluster.pending_tasks_count += 1,
                _ => {}
            }
        }
        Ok(Some(cluster))
    }

    async fn list_task_definitions(&self) -> Result<Vec<String>, TaskError> {
        let mut state = self.state.write().await;
        enter(&mut state, Operation::ListTaskDefinitions)?;
        Ok(state.task_definitions.keys().cloned().collect())
    }

    async fn describe_task_definition(
        &self,
        task_definition_arn: &str,
    ) -> Result<Option<TaskDefinition>, TaskError> {
        let mut state = self.state.write().await;
        enter(&mut state, Operation::DescribeTaskDefinition)?;
        Ok(find_task_definition(&state.task_definitions, task_definition_arn).cloned())
    }

    async fn test_connection(&self) -> TestConnectionResult {
        match self.list_clusters().await {
            Ok(_) => TestConnectionResult::ok(),
            Err(e) => TestConnectionResult::failed(e.to_string()),
        }
    }
}
