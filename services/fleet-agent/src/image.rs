//! Per-image instance registry and reconciliation.
//!
//! The registry:
//! - Tracks every instance of one image, keyed by instance id
//! - Rediscovers instances from the backend (`populate_instances`)
//! - Caches the last reconciliation error for passive observers
//!
//! The instance map is the only source of the instance count. Map updates
//! are per-key; no lock is held across a backend call.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use taskfleet_tasks::{TaskDetail, TaskError, TaskFacade};
use tracing::{debug, info, warn};

use crate::config::ImageConfig;
use crate::instance::{agent_name, InstanceRecord, IMAGE_ID_ENV, INSTANCE_ID_ENV};

/// Last reconciliation failure of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Human summary.
    pub message: String,

    /// Rendered cause.
    pub details: String,

    pub cause: TaskError,

    pub occurred_at: DateTime<Utc>,
}

impl ErrorInfo {
    fn populate_failed(cause: TaskError) -> Self {
        Self {
            message: "Failed to populate instances".to_string(),
            details: cause.to_string(),
            cause,
            occurred_at: Utc::now(),
        }
    }
}

/// Instance registry for one image.
pub struct ImageRegistry {
    config: Arc<ImageConfig>,
    facade: Arc<dyn TaskFacade>,
    instances: DashMap<String, Arc<InstanceRecord>>,
    current_error: ArcSwapOption<ErrorInfo>,
}

impl ImageRegistry {
    /// Create an empty registry.
    pub fn new(config: ImageConfig, facade: Arc<dyn TaskFacade>) -> Self {
        Self {
            config: Arc::new(config),
            facade,
            instances: DashMap::new(),
            current_error: ArcSwapOption::empty(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Display name. Images are named after their task definition.
    pub fn name(&self) -> &str {
        &self.config.task_definition
    }

    pub fn config(&self) -> &Arc<ImageConfig> {
        &self.config
    }

    pub fn instance_limit(&self) -> u32 {
        self.config.instance_limit
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn task_definition(&self) -> &str {
        &self.config.task_definition
    }

    pub fn cluster(&self) -> Option<&str> {
        self.config.cluster.as_deref()
    }

    pub fn task_group(&self) -> Option<&str> {
        self.config.task_group.as_deref()
    }

    pub fn agent_pool_id(&self) -> Option<i32> {
        self.config.agent_pool_id
    }

    /// Current instances. Each key is read atomically; the set as a whole
    /// may reflect a pass in progress.
    pub fn instances(&self) -> Vec<Arc<InstanceRecord>> {
        self.instances
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn find_instance_by_id(&self, instance_id: &str) -> Option<Arc<InstanceRecord>> {
        self.instances
            .get(instance_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Last reconciliation error, cleared by the next successful pass.
    pub fn error_info(&self) -> Option<Arc<ErrorInfo>> {
        self.current_error.load_full()
    }

    pub fn generate_agent_name(&self, instance_id: &str) -> String {
        agent_name(&self.config, instance_id)
    }

    /// Track an instance created outside discovery. Replaces any record with the same id.
    pub fn add_instance(&self, record: Arc<InstanceRecord>) {
        debug!(
            image_id = %self.config.id,
            instance_id = %record.instance_id(),
            "Adding instance"
        );
        self.instances
            .insert(record.instance_id().to_string(), record);
    }

    /// Stop tracking an instance. Absent ids are ignored.
    pub fn delete_instance(&self, instance_id: &str) -> Option<Arc<InstanceRecord>> {
        let removed = self.instances.remove(instance_id).map(|(_, record)| record);
        if removed.is_some() {
            debug!(image_id = %self.config.id, instance_id = %instance_id, "Deleted instance");
        }
        removed
    }

    /// Build a record for a freshly launched task.
    pub fn new_record(&self, instance_id: &str, task: TaskDetail) -> Arc<InstanceRecord> {
        Arc::new(self.build_record(instance_id, task))
    }

    fn build_record(&self, instance_id: &str, task: TaskDetail) -> InstanceRecord {
        InstanceRecord::new(
            instance_id,
            Arc::clone(&self.config),
            task,
            Arc::clone(&self.facade),
        )
    }

    /// Rediscover this image's instances from the backend.
    ///
    /// Lists tasks tagged `started_by` in the image's cluster, describes each
    /// one and upserts a record keyed by the task's instance id marker.
    /// Tasks without the marker, or marked for another image, are skipped.
    /// Records are never removed here. A replaced record hands its lifecycle
    /// to its successor, so Terminating survives a refresh.
    ///
    /// Tasks with an instance marker but no image marker are adopted by every
    /// image listing the same cluster and tag, and then count once per image
    /// towards the profile limit. Tasks launched by the coordinator always
    /// carry both markers.
    ///
    /// Any backend failure aborts the pass, is cached as the image's error
    /// and returned. Records written before the failure stay. A successful
    /// pass clears the cached error.
    pub async fn populate_instances(&self, started_by: &str) -> Result<(), TaskError> {
        match self.reconcile(started_by).await {
            Ok(()) => {
                self.current_error.store(None);
                Ok(())
            }
            Err(e) => {
                warn!(image_id = %self.config.id, error = %e, "Failed to populate instances");
                self.current_error
                    .store(Some(Arc::new(ErrorInfo::populate_failed(e.clone()))));
                Err(e)
            }
        }
    }

    async fn reconcile(&self, started_by: &str) -> Result<(), TaskError> {
        let cluster = self.cluster();
        let task_arns = self.facade.list_tasks(cluster, Some(started_by)).await?;

        let mut discovered = 0usize;
        let mut refreshed = 0usize;

        for task_arn in task_arns {
            let Some(task) = self.facade.describe_task(&task_arn, cluster).await? else {
                debug!(image_id = %self.config.id, task_arn = %task_arn, "Task vanished before describe");
                continue;
            };

            let Some(instance_id) = task
                .overridden_container_env(INSTANCE_ID_ENV)
                .map(str::to_string)
            else {
                warn!(
                    image_id = %self.config.id,
                    task_arn = %task.arn,
                    "Can't resolve instance id of task"
                );
                continue;
            };

            // Images sharing a cluster see each other's tasks.
            if let Some(owner) = task.overridden_container_env(IMAGE_ID_ENV) {
                if owner != self.config.id {
                    continue;
                }
            }

            let record = self.build_record(&instance_id, task);
            match self.instances.entry(instance_id) {
                Entry::Occupied(mut existing) => {
                    let record = record.succeeding(existing.get());
                    existing.insert(Arc::new(record));
                    refreshed += 1;
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(record));
                    discovered += 1;
                }
            }
        }

        if discovered > 0 {
            info!(
                image_id = %self.config.id,
                discovered,
                refreshed,
                instance_count = self.instance_count(),
                "Discovered instances"
            );
        } else {
            debug!(
                image_id = %self.config.id,
                refreshed,
                instance_count = self.instance_count(),
                "Instances reconciled"
            );
        }

        Ok(())
    }
}

impl std::fmt::Debug for ImageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRegistry")
            .field("id", &self.config.id)
            .field("instance_count", &self.instance_count())
            .field("has_error", &self.current_error.load().is_some())
            .finish()
    }
}
