//! taskfleet Fleet Agent Library
//!
//! The fleet agent presents remote tasks on a container-orchestration
//! backend as logical cloud instances for a fleet manager. It keeps a
//! registry of instances per image, reconciles it against the backend on a
//! timer, and answers admission-control queries.
//!
//! ## Architecture
//!
//! ```text
//! Reconciler (timer)
//! └── FleetCoordinator          (admission control, start/terminate)
//!     └── ImageRegistry(id)     (instances of one image, last error)
//!         └── InstanceRecord    (one remote task)
//! ```
//!
//! All backend access goes through [`taskfleet_tasks::TaskFacade`].
//!
//! ## Modules
//!
//! - `config`: Environment and fleet file configuration
//! - `coordinator`: Fleet-wide entry point
//! - `image`: Per-image registry and reconciliation
//! - `instance`: Instance records and lifecycle
//! - `reconciler`: Periodic reconciliation loop

pub mod config;
pub mod coordinator;
pub mod error;
pub mod image;
pub mod instance;
pub mod reconciler;

// Re-export commonly used types
pub use config::{Config, FleetFile, ImageConfig};
pub use coordinator::{FleetCoordinator, FleetParams, ImageProblem, PopulateOutcome};
pub use error::FleetError;
pub use image::{ErrorInfo, ImageRegistry};
pub use instance::{InstanceRecord, InstanceStatus, Lifecycle, INSTANCE_ID_ENV};
