//! Fleet coordinator.
//!
//! Owns the image registries of one cloud profile and is the entry point for
//! the fleet manager:
//! - Admission control (`can_start_new_instance`)
//! - Starting and terminating instances
//! - Reconciling every image against the backend

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use taskfleet_reconcile::{evaluate, AdmissionDecision, CapacitySnapshot};
use taskfleet_tasks::{TaskError, TaskFacade, TestConnectionResult};
use tracing::{debug, info, warn};

use crate::config::ImageConfig;
use crate::error::FleetError;
use crate::image::ImageRegistry;
use crate::instance::{
    InstanceRecord, AGENT_NAME_ENV, IMAGE_ID_ENV, INSTANCE_ID_ENV, PROFILE_ID_ENV,
    SERVER_UUID_ENV,
};

/// Profile-wide parameters.
#[derive(Debug, Clone)]
pub struct FleetParams {
    pub server_uuid: String,
    pub profile_id: String,

    /// Absent or non-positive means unlimited.
    pub profile_instance_limit: Option<i64>,
}

impl FleetParams {
    /// Tag set on every launched task and used to scope discovery.
    pub fn started_by(&self) -> String {
        format!("{}-{}", self.profile_id, self.server_uuid)
    }
}

/// Result of reconciling one image.
#[derive(Debug)]
pub struct PopulateOutcome {
    pub image_id: String,
    pub result: Result<(), TaskError>,
}

/// A configuration problem found by [`FleetCoordinator::check_images`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageProblem {
    pub image_id: String,
    pub message: String,
}

/// Coordinator over all images of a profile.
pub struct FleetCoordinator {
    images: Vec<Arc<ImageRegistry>>,
    facade: Arc<dyn TaskFacade>,
    params: FleetParams,
    started_by: String,
}

impl FleetCoordinator {
    /// Build a coordinator over existing registries.
    ///
    /// Image ids must be unique. An image may not share its name with an
    /// earlier image that already has instances, since agents of both would
    /// be indistinguishable.
    pub fn new(
        images: Vec<Arc<ImageRegistry>>,
        facade: Arc<dyn TaskFacade>,
        params: FleetParams,
    ) -> Result<Self, FleetError> {
        let mut ids = HashSet::new();
        for (index, image) in images.iter().enumerate() {
            if !ids.insert(image.id()) {
                return Err(FleetError::DuplicateImageId(image.id().to_string()));
            }

            let earlier = images[..index]
                .iter()
                .filter(|other| other.name() == image.name());
            for other in earlier {
                if other.instance_count() > 0 {
                    return Err(FleetError::DuplicateImageName {
                        name: image.name().to_string(),
                        existing: other.id().to_string(),
                    });
                }
                warn!(
                    image_id = %image.id(),
                    other_image_id = %other.id(),
                    name = %image.name(),
                    "Images share a name"
                );
            }
        }

        let started_by = params.started_by();
        info!(
            profile_id = %params.profile_id,
            image_count = images.len(),
            started_by = %started_by,
            "Fleet coordinator created"
        );

        Ok(Self {
            images,
            facade,
            params,
            started_by,
        })
    }

    /// Build a coordinator with fresh, empty registries.
    pub fn from_configs(
        configs: Vec<ImageConfig>,
        facade: Arc<dyn TaskFacade>,
        params: FleetParams,
    ) -> Result<Self, FleetError> {
        let images = configs
            .into_iter()
            .map(|config| Arc::new(ImageRegistry::new(config, Arc::clone(&facade))))
            .collect();
        Self::new(images, facade, params)
    }

    pub fn images(&self) -> &[Arc<ImageRegistry>] {
        &self.images
    }

    pub fn find_image_by_id(&self, image_id: &str) -> Option<&Arc<ImageRegistry>> {
        self.images.iter().find(|image| image.id() == image_id)
    }

    pub fn params(&self) -> &FleetParams {
        &self.params
    }

    pub fn started_by(&self) -> &str {
        &self.started_by
    }

    /// Instances tracked across every image.
    pub fn total_instance_count(&self) -> usize {
        self.images.iter().map(|image| image.instance_count()).sum()
    }

    /// Admission decision for an image, `None` if the image is unknown.
    pub fn admission(&self, image_id: &str) -> Option<AdmissionDecision> {
        let image = self.find_image_by_id(image_id)?;
        let snapshot = CapacitySnapshot {
            image_count: image.instance_count(),
            image_limit: image.instance_limit(),
            fleet_count: self.total_instance_count(),
        };
        Some(evaluate(&snapshot, self.params.profile_instance_limit))
    }

    /// Whether one more instance of the image may start. Unknown images are denied.
    pub fn can_start_new_instance(&self, image_id: &str) -> bool {
        match self.admission(image_id) {
            Some(decision) => {
                if !decision.is_allowed() {
                    debug!(image_id = %image_id, reason = decision.reason(), "Start denied");
                }
                decision.is_allowed()
            }
            None => {
                debug!(image_id = %image_id, "Start denied for unknown image");
                false
            }
        }
    }

    pub fn find_instance(&self, image_id: &str, instance_id: &str) -> Option<Arc<InstanceRecord>> {
        self.find_image_by_id(image_id)?
            .find_instance_by_id(instance_id)
    }

    /// Find the instance a provisioned agent belongs to.
    pub fn find_instance_by_agent_name(&self, agent_name: &str) -> Option<Arc<InstanceRecord>> {
        self.images.iter().find_map(|image| {
            image
                .instances()
                .into_iter()
                .find(|record| record.generate_agent_name() == agent_name)
        })
    }

    /// Launch a new instance of an image and start tracking it.
    ///
    /// `extra_env` is passed to every container; the fleet's own variables
    /// take precedence over it.
    pub async fn start_new_instance(
        &self,
        image_id: &str,
        extra_env: BTreeMap<String, String>,
    ) -> Result<Arc<InstanceRecord>, FleetError> {
        let image = self
            .find_image_by_id(image_id)
            .ok_or_else(|| FleetError::UnknownImage(image_id.to_string()))?;

        if let Some(decision) = self.admission(image_id).filter(|d| !d.is_allowed()) {
            return Err(FleetError::CapacityExceeded {
                image_id: image_id.to_string(),
                reason: decision.reason(),
            });
        }

        let task_definition = self
            .facade
            .describe_task_definition(image.task_definition())
            .await?
            .ok_or_else(|| FleetError::TaskDefinitionNotFound(image.task_definition().to_string()))?;

        let instance_id = uuid::Uuid::new_v4().to_string();
        let agent_name = image.generate_agent_name(&instance_id);

        let mut environment = extra_env;
        environment.insert(INSTANCE_ID_ENV.to_string(), instance_id.clone());
        environment.insert(AGENT_NAME_ENV.to_string(), agent_name.clone());
        environment.insert(IMAGE_ID_ENV.to_string(), image.id().to_string());
        environment.insert(PROFILE_ID_ENV.to_string(), self.params.profile_id.clone());
        environment.insert(SERVER_UUID_ENV.to_string(), self.params.server_uuid.clone());

        info!(
            image_id = %image.id(),
            instance_id = %instance_id,
            agent_name = %agent_name,
            task_definition = %task_definition.arn,
            "Starting instance"
        );

        let task = self
            .facade
            .run_task(
                &task_definition,
                image.cluster(),
                image.task_group(),
                &environment,
                Some(self.started_by.as_str()),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FleetError::NoTaskStarted(image.id().to_string()))?;

        let record = image.new_record(&instance_id, task);
        image.add_instance(Arc::clone(&record));

        info!(
            image_id = %image.id(),
            instance_id = %instance_id,
            task_arn = %record.task_arn(),
            "Instance started"
        );
        Ok(record)
    }

    /// Stop an instance's task and stop tracking it.
    pub async fn terminate_instance(&self, image_id: &str, instance_id: &str) -> Result<(), FleetError> {
        let image = self
            .find_image_by_id(image_id)
            .ok_or_else(|| FleetError::UnknownImage(image_id.to_string()))?;
        let record = image
            .find_instance_by_id(instance_id)
            .ok_or_else(|| FleetError::InstanceNotFound {
                image_id: image_id.to_string(),
                instance_id: instance_id.to_string(),
            })?;

        record.terminate().await?;
        image.delete_instance(instance_id);
        Ok(())
    }

    /// Reconcile every image concurrently. One image failing does not stop the others.
    pub async fn populate_all(&self) -> Vec<PopulateOutcome> {
        let passes = self.images.iter().map(|image| async move {
            PopulateOutcome {
                image_id: image.id().to_string(),
                result: image.populate_instances(&self.started_by).await,
            }
        });
        join_all(passes).await
    }

    /// Check that every image's task definition and cluster exist.
    pub async fn check_images(&self) -> Vec<ImageProblem> {
        let mut problems = Vec::new();

        for image in &self.images {
            let problem = |message: String| ImageProblem {
                image_id: image.id().to_string(),
                message,
            };

            match self.facade.describe_task_definition(image.task_definition()).await {
                Ok(Some(_)) => {}
                Ok(None) => problems.push(problem(format!(
                    "task definition {} not found",
                    image.task_definition()
                ))),
                Err(e) => problems.push(problem(e.to_string())),
            }

            if let Some(cluster) = image.cluster() {
                match self.facade.describe_cluster(cluster).await {
                    Ok(Some(_)) => {}
                    Ok(None) => problems.push(problem(format!("cluster {cluster} not found"))),
                    Err(e) => problems.push(problem(e.to_string())),
                }
            }
        }

        problems
    }

    pub async fn test_connection(&self) -> TestConnectionResult {
        self.facade.test_connection().await
    }
}
