//! Error types for the fleet agent.

use taskfleet_tasks::TaskError;
use thiserror::Error;

/// Fleet agent errors with standardized reason codes.
#[derive(Debug, Error)]
pub enum FleetError {
    /// No image with this id is registered.
    #[error("unknown image: {0}")]
    UnknownImage(String),

    /// Two configured images share an id.
    #[error("duplicate image id: {0}")]
    DuplicateImageId(String),

    /// An image shares its name with an image that already has instances.
    #[error("duplicate image name '{name}': image {existing} already has running instances")]
    DuplicateImageName { name: String, existing: String },

    /// Admission control denied the start.
    #[error("capacity exceeded for image {image_id}: {reason}")]
    CapacityExceeded {
        image_id: String,
        reason: &'static str,
    },

    /// The image's task definition could not be described.
    #[error("task definition not found: {0}")]
    TaskDefinitionNotFound(String),

    /// The backend accepted the launch but returned no task.
    #[error("no task started for image {0}")]
    NoTaskStarted(String),

    #[error("instance {instance_id} not found in image {image_id}")]
    InstanceNotFound {
        image_id: String,
        instance_id: String,
    },

    /// Backend call failed.
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl FleetError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            FleetError::UnknownImage(_) => "unknown_image",
            FleetError::DuplicateImageId(_) => "duplicate_image_id",
            FleetError::DuplicateImageName { .. } => "duplicate_image_name",
            FleetError::CapacityExceeded { .. } => "capacity_exceeded",
            FleetError::TaskDefinitionNotFound(_) => "task_definition_not_found",
            FleetError::NoTaskStarted(_) => "no_task_started",
            FleetError::InstanceNotFound { .. } => "instance_not_found",
            FleetError::Task(e) => e.reason_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_reason_code_passes_through() {
        let err: FleetError = TaskError::backend("RunTask", "throttled").into();
        assert_eq!(err.reason_code(), "backend_call_failed");
        assert_eq!(err.to_string(), "RunTask failed: throttled");
    }

    #[test]
    fn test_capacity_exceeded_display() {
        let err = FleetError::CapacityExceeded {
            image_id: "linux-small".to_string(),
            reason: "image_limit_reached",
        };
        assert_eq!(
            err.to_string(),
            "capacity exceeded for image linux-small: image_limit_reached"
        );
        assert_eq!(err.reason_code(), "capacity_exceeded");
    }
}
