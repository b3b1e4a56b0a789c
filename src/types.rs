use serde::Serialize;
use std::time::Duration;

/// A base image discovered as eligible for upgrade.
#[derive(Debug, Clone)]
pub struct BaseImageDescriptor {
    pub name: String,
    pub image_id: String,
    /// Provider-reported virtualization type, validated against the
    /// instance-type mapping at the start of the pipeline iteration.
    pub virtualization_type: String,
}

/// The temporary instance created for one pipeline iteration. Owned by
/// that iteration and reclaimed by its Terminate stage.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    pub instance_id: String,
    pub public_ip: String,
}

/// Run-wide configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub user: String,
    pub region: String,
    pub zone: String,
    pub keypair: String,
    pub key_path: Option<String>,
    pub security_group: String,
    pub vpc_subnet: String,
    pub ssh_password: Option<String>,
    pub sudo_password: Option<String>,
    pub launch_timeout: Duration,
    pub image_timeout: Duration,
    pub check_interval: Duration,
    pub preserve_on_failure: bool,
}

/// Parameters for launching the temporary upgrade instance.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub base_image_id: String,
    pub name: String,
    pub instance_type: String,
    pub zone: String,
    pub keypair: String,
    pub security_group: String,
    pub vpc_subnet: String,
}

/// Final state of one image's pipeline iteration.
#[derive(Debug, Serialize)]
pub struct ImageOutcome {
    pub base_image_id: String,
    pub base_image_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_image_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when a launched instance was left running (termination failure
    /// or --preserve-on-failure); needs manual cleanup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphaned_instance_id: Option<String>,
}

/// End-of-run report, printed as JSON.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub status: String,
    pub region: String,
    pub images_discovered: usize,
    pub images_upgraded: usize,
    pub images_failed: usize,
    pub total_execution_time_seconds: f64,
    pub outcomes: Vec<ImageOutcome>,
}
