//! Backend data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub name: String,
    pub value: String,
}

/// Per-container overrides applied when a task was launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOverride {
    /// Container name within the task definition.
    pub name: String,

    #[serde(default)]
    pub environment: Vec<KeyValuePair>,
}

/// Full description of a remote task as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub arn: String,
    #[serde(default)]
    pub cluster_arn: Option<String>,
    pub task_definition_arn: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub started_by: Option<String>,

    /// Backend lifecycle status, e.g. `PENDING`, `RUNNING`, `STOPPED`.
    pub last_status: String,
    pub desired_status: String,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub overrides: Vec<ContainerOverride>,
}

impl TaskDetail {
    /// Value of an environment variable overridden on any container of the task.
    ///
    /// Containers are searched in launch order; the first match wins.
    pub fn overridden_container_env(&self, name: &str) -> Option<&str> {
        self.overrides
            .iter()
            .flat_map(|container| container.environment.iter())
            .find(|pair| pair.name == name)
            .map(|pair| pair.value.as_str())
    }
}

/// A versioned template describing how to run a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub arn: String,
    pub family: String,
    pub revision: u32,

    /// Container names, in definition order.
    #[serde(default)]
    pub containers: Vec<String>,
}

impl TaskDefinition {
    /// `family:revision`, the short form accepted wherever an arn is.
    pub fn family_revision(&self) -> String {
        format!("{}:{}", self.family, self.revision)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDetail {
    pub arn: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub running_tasks_count: u32,
    #[serde(default)]
    pub pending_tasks_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str, value: &str) -> KeyValuePair {
        KeyValuePair {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn task_with_overrides(overrides: Vec<ContainerOverride>) -> TaskDetail {
        TaskDetail {
            arn: "arn:task/abc".to_string(),
            cluster_arn: None,
            task_definition_arn: "arn:task-definition/agent:1".to_string(),
            group: None,
            started_by: None,
            last_status: "RUNNING".to_string(),
            desired_status: "RUNNING".to_string(),
            created_at: None,
            started_at: None,
            overrides,
        }
    }

    #[test]
    fn test_overridden_env_first_container_wins() {
        let task = task_with_overrides(vec![
            ContainerOverride {
                name: "sidecar".to_string(),
                environment: vec![env("OTHER", "x")],
            },
            ContainerOverride {
                name: "agent".to_string(),
                environment: vec![env("MARKER", "first")],
            },
            ContainerOverride {
                name: "agent-2".to_string(),
                environment: vec![env("MARKER", "second")],
            },
        ]);

        assert_eq!(task.overridden_container_env("MARKER"), Some("first"));
        assert_eq!(task.overridden_container_env("OTHER"), Some("x"));
        assert_eq!(task.overridden_container_env("MISSING"), None);
    }

    #[test]
    fn test_no_overrides() {
        let task = task_with_overrides(vec![]);
        assert_eq!(task.overridden_container_env("MARKER"), None);
    }

    #[test]
    fn test_task_detail_deserialize_defaults() {
        let task: TaskDetail = serde_json::from_value(serde_json::json!({
            "arn": "arn:task/1",
            "task_definition_arn": "arn:task-definition/agent:2",
            "last_status": "PENDING",
            "desired_status": "RUNNING"
        }))
        .unwrap();

        assert!(task.overrides.is_empty());
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_family_revision() {
        let def = TaskDefinition {
            arn: "arn:task-definition/agent:7".to_string(),
            family: "agent".to_string(),
            revision: 7,
            containers: vec!["agent".to_string()],
        };
        assert_eq!(def.family_revision(), "agent:7");
    }
}
