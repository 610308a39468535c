//! Configuration for the fleet agent.
//!
//! Process settings come from environment variables; the image list and
//! profile limit come from a TOML fleet file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use taskfleet_reconcile::DEFAULT_RECONCILE_INTERVAL;

/// Fleet agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of the server owning this fleet. Part of the discovery tag.
    pub server_uuid: String,

    /// Cloud profile this agent manages. Part of the discovery tag.
    pub profile_id: String,

    /// Path of the TOML fleet file.
    pub fleet_file: PathBuf,

    /// Reconciliation interval in seconds.
    pub reconcile_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let server_uuid = std::env::var("TASKFLEET_SERVER_UUID")
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let profile_id =
            std::env::var("TASKFLEET_PROFILE_ID").unwrap_or_else(|_| "default".to_string());

        let fleet_file = std::env::var("TASKFLEET_CONFIG")
            .unwrap_or_else(|_| "/etc/taskfleet/fleet.toml".to_string())
            .into();

        let reconcile_interval_secs = match std::env::var("TASKFLEET_RECONCILE_INTERVAL") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("invalid TASKFLEET_RECONCILE_INTERVAL: {value}"))?,
            Err(_) => DEFAULT_RECONCILE_INTERVAL.as_secs(),
        };

        let log_level = std::env::var("TASKFLEET_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            server_uuid,
            profile_id,
            fleet_file,
            reconcile_interval_secs,
            log_level,
        })
    }
}

/// One image: the template instances are launched from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageConfig {
    /// Stable identifier, unique within the fleet.
    pub id: String,

    /// Task definition arn or `family[:revision]`.
    pub task_definition: String,

    #[serde(default)]
    pub cluster: Option<String>,

    #[serde(default)]
    pub task_group: Option<String>,

    /// Maximum instances of this image.
    pub instance_limit: u32,

    /// Prepended to the instance id to name provisioned agents.
    #[serde(default)]
    pub agent_name_prefix: String,

    #[serde(default)]
    pub agent_pool_id: Option<i32>,
}

/// Contents of the fleet file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetFile {
    /// Profile-wide instance limit. Absent or non-positive means unlimited.
    #[serde(default)]
    pub profile_instance_limit: Option<i64>,

    #[serde(default)]
    pub images: Vec<ImageConfig>,
}

impl FleetFile {
    /// Read and parse a fleet file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fleet file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid fleet file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut file: FleetFile = toml::from_str(raw)?;

        for image in &mut file.images {
            if image.id.trim().is_empty() {
                anyhow::bail!("image id cannot be empty");
            }
            if image.task_definition.trim().is_empty() {
                anyhow::bail!("image {} has an empty task_definition", image.id);
            }
            // Blank cluster or group means the backend default.
            image.cluster = image.cluster.take().filter(|c| !c.trim().is_empty());
            image.task_group = image.task_group.take().filter(|g| !g.trim().is_empty());
        }

        Ok(file)
    }
}
