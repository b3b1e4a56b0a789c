//! Error taxonomy for the upgrade run.

use thiserror::Error;

use crate::adapter::ExecError;

/// Errors that can occur during an AMI upgrade run.
///
/// `Configuration` is fatal to the whole run. Every other variant aborts a
/// single image's pipeline iteration; the run continues with the next
/// discovered image.
#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Image discovery failed: {0}")]
    Discovery(String),

    #[error("Instance launch failed: {0}")]
    Launch(String),

    #[error("Remote execution failed during {stage}: {source}")]
    RemoteExecution {
        stage: &'static str,
        #[source]
        source: ExecError,
    },

    #[error("Image snapshot failed: {0}")]
    Snapshot(String),

    #[error("Instance termination failed: {0}")]
    Termination(String),

    #[error(
        "Orphaned instance {instance_id}, manual cleanup required: \
         termination failed after a successful snapshot ({detail})"
    )]
    OrphanedInstance { instance_id: String, detail: String },

    #[error("Tagging failed: {0}")]
    Tagging(String),
}

impl UpgradeError {
    /// Short stable label for summaries and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            UpgradeError::Configuration(_) => "configuration",
            UpgradeError::Discovery(_) => "discovery",
            UpgradeError::RemoteExecution { stage, .. } => stage,
            UpgradeError::Launch(_) => "launch",
            UpgradeError::Snapshot(_) => "snapshot",
            UpgradeError::Termination(_) => "termination",
            UpgradeError::OrphanedInstance { .. } => "orphaned-instance",
            UpgradeError::Tagging(_) => "tagging",
        }
    }
}
