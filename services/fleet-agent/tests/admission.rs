//! Admission control and coordinator construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use rstest::rstest;
use taskfleet_agent::config::ImageConfig;
use taskfleet_agent::coordinator::{FleetCoordinator, FleetParams};
use taskfleet_agent::image::ImageRegistry;
use taskfleet_agent::FleetError;
use taskfleet_tasks::{InMemoryTaskFacade, TaskDetail, TaskFacade};

fn image_config(id: &str, task_definition: &str, limit: u32) -> ImageConfig {
    ImageConfig {
        id: id.to_string(),
        task_definition: task_definition.to_string(),
        cluster: None,
        task_group: None,
        instance_limit: limit,
        agent_name_prefix: String::new(),
        agent_pool_id: None,
    }
}

fn params(profile_instance_limit: Option<i64>) -> FleetParams {
    FleetParams {
        server_uuid: "server-uuid".to_string(),
        profile_id: "profile-id".to_string(),
        profile_instance_limit,
    }
}

fn backend() -> Arc<dyn TaskFacade> {
    Arc::new(InMemoryTaskFacade::new())
}

fn fake_task(n: usize) -> TaskDetail {
    TaskDetail {
        arn: format!("arn:task/{n}"),
        cluster_arn: None,
        task_definition_arn: "arn:task-definition/image:1".to_string(),
        group: None,
        started_by: None,
        last_status: "RUNNING".to_string(),
        desired_status: "RUNNING".to_string(),
        created_at: None,
        started_at: None,
        overrides: vec![],
    }
}

/// A registry already tracking `count` instances.
fn registry(id: &str, name: &str, limit: u32, count: usize) -> Arc<ImageRegistry> {
    let registry = Arc::new(ImageRegistry::new(image_config(id, name, limit), backend()));
    for n in 0..count {
        let instance_id = format!("{id}-{n}");
        registry.add_instance(registry.new_record(&instance_id, fake_task(n)));
    }
    registry
}

#[rstest]
#[case::free_slot(1, 0, true)]
#[case::full(1, 1, false)]
#[case::zero_limit(0, 0, false)]
#[case::over_limit(2, 3, false)]
fn test_image_limit(#[case] limit: u32, #[case] count: usize, #[case] allowed: bool) {
    let coordinator =
        FleetCoordinator::new(vec![registry("image-1-id", "image", limit, count)], backend(), params(None))
            .unwrap();
    assert_eq!(coordinator.can_start_new_instance("image-1-id"), allowed);
}

#[test]
fn test_unknown_image() {
    let coordinator = FleetCoordinator::new(vec![], backend(), params(None)).unwrap();
    assert!(!coordinator.can_start_new_instance("image-1-id"));
}

#[test]
fn test_profile_limit() {
    let coordinator = FleetCoordinator::new(
        vec![registry("image-1-id", "image-1-name", 2, 1)],
        backend(),
        params(Some(1)),
    )
    .unwrap();
    assert!(!coordinator.can_start_new_instance("image-1-id"));
}

#[test]
fn test_profile_limit_spans_images() {
    let coordinator = FleetCoordinator::new(
        vec![
            registry("a", "image-a", 5, 2),
            registry("b", "image-b", 5, 1),
            registry("c", "image-c", 5, 0),
        ],
        backend(),
        params(Some(3)),
    )
    .unwrap();

    for id in ["a", "b", "c"] {
        assert!(!coordinator.can_start_new_instance(id), "image {id} admitted");
    }
}

#[rstest]
#[case(None)]
#[case(Some(0))]
#[case(Some(-1))]
fn test_non_positive_profile_limit_is_unlimited(#[case] limit: Option<i64>) {
    let coordinator = FleetCoordinator::new(
        vec![registry("a", "image-a", 100, 50), registry("b", "image-b", 100, 50)],
        backend(),
        params(limit),
    )
    .unwrap();
    assert!(coordinator.can_start_new_instance("a"));
}

#[test]
fn test_duplicate_image_name_without_instances() {
    let coordinator = FleetCoordinator::new(
        vec![
            registry("image-1-id", "image", 1, 0),
            registry("image-2-id", "image", 1, 0),
        ],
        backend(),
        params(None),
    );
    assert!(coordinator.is_ok());
}

#[test]
fn test_duplicate_image_name_with_instances() {
    let result = FleetCoordinator::new(
        vec![
            registry("image-1-id", "image", 2, 1),
            registry("image-2-id", "image", 2, 0),
        ],
        backend(),
        params(None),
    );

    match result {
        Err(FleetError::DuplicateImageName { name, existing }) => {
            assert_eq!(name, "image");
            assert_eq!(existing, "image-1-id");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("duplicate name accepted"),
    }
}

#[tokio::test]
async fn test_deleted_instance_frees_capacity() {
    let image = registry("image-1-id", "image", 1, 1);
    let coordinator =
        FleetCoordinator::new(vec![Arc::clone(&image)], backend(), params(None)).unwrap();
    assert!(!coordinator.can_start_new_instance("image-1-id"));

    image.delete_instance("image-1-id-0");
    image.delete_instance("image-1-id-0");
    assert!(coordinator.can_start_new_instance("image-1-id"));
}

#[tokio::test]
async fn test_start_rejected_by_profile_limit() {
    let backend = Arc::new(InMemoryTaskFacade::new().with_task_definition_named("agent:1", &[]));
    let coordinator = FleetCoordinator::from_configs(
        vec![
            image_config("a", "agent:1", 3),
            image_config("b", "agent:1", 3),
        ],
        backend,
        params(Some(2)),
    )
    .unwrap();

    coordinator.start_new_instance("a", BTreeMap::new()).await.unwrap();
    coordinator.start_new_instance("b", BTreeMap::new()).await.unwrap();
    let err = coordinator
        .start_new_instance("a", BTreeMap::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FleetError::CapacityExceeded { reason: "profile_limit_reached", .. }
    ));
    assert_eq!(coordinator.total_instance_count(), 2);
}

proptest! {
    #[test]
    fn prop_image_at_limit_is_denied(limit in 0u32..20, profile in proptest::option::of(-5i64..50)) {
        let coordinator = FleetCoordinator::new(
            vec![registry("img", "image", limit, limit as usize)],
            backend(),
            params(profile),
        )
        .unwrap();
        prop_assert!(!coordinator.can_start_new_instance("img"));
    }

    #[test]
    fn prop_unknown_image_is_denied(id in "[a-z0-9-]{1,16}") {
        let coordinator = FleetCoordinator::new(
            vec![registry("known", "image", 10, 0)],
            backend(),
            params(None),
        )
        .unwrap();
        prop_assume!(id != "known");
        prop_assert!(!coordinator.can_start_new_instance(&id));
    }
}
