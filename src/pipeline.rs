//! Per-image upgrade pipeline.
//!
//! Each discovered base image goes through six ordered stages: launch a
//! temporary instance, bootstrap its tooling over SSH, upgrade its OS
//! packages, snapshot it into a new AMI, terminate the instance, and move
//! the `Upgrade` tag from the old image to the new one. Images are
//! processed strictly one at a time; a stage failure aborts that image's
//! iteration only.

use chrono::Utc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::adapter::{self, RemoteExecutor};
use crate::ec2::CloudProvider;
use crate::error::UpgradeError;
use crate::naming::{self, TagSet};
use crate::types::{
    BaseImageDescriptor, ImageOutcome, InstanceHandle, LaunchSpec, RunSummary, UpgradeRequest,
};

/// Pipeline stages in execution order. Each side-effecting stage declares
/// the action that compensates it, so rollback stays a local decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Launch,
    Bootstrap,
    SystemUpgrade,
    Snapshot,
    Terminate,
    Retag,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Launch => "launch",
            Stage::Bootstrap => "bootstrap",
            Stage::SystemUpgrade => "system-upgrade",
            Stage::Snapshot => "snapshot",
            Stage::Terminate => "termination",
            Stage::Retag => "tagging",
        }
    }

    /// The compensating action owed once this stage has run (or started).
    /// From Launch through Snapshot the temporary instance exists and must
    /// be reclaimed; Terminate and Retag leave nothing to compensate.
    pub fn compensation(self) -> Option<Stage> {
        match self {
            Stage::Launch | Stage::Bootstrap | Stage::SystemUpgrade | Stage::Snapshot => {
                Some(Stage::Terminate)
            }
            Stage::Terminate | Stage::Retag => None,
        }
    }
}

struct Upgraded {
    new_image_id: String,
    new_image_name: String,
}

struct Failure {
    stage: &'static str,
    error: UpgradeError,
    orphaned_instance_id: Option<String>,
    /// Set when the new image already exists despite the failure, so the
    /// operator can reconcile tags manually.
    new_image_id: Option<String>,
    new_image_name: Option<String>,
}

impl Failure {
    fn new(stage: &'static str, error: UpgradeError) -> Self {
        Self {
            stage,
            error,
            orphaned_instance_id: None,
            new_image_id: None,
            new_image_name: None,
        }
    }
}

pub struct Upgrader<'a, P, R> {
    request: &'a UpgradeRequest,
    provider: &'a P,
    remote: &'a R,
}

impl<'a, P: CloudProvider, R: RemoteExecutor> Upgrader<'a, P, R> {
    pub fn new(request: &'a UpgradeRequest, provider: &'a P, remote: &'a R) -> Self {
        Self {
            request,
            provider,
            remote,
        }
    }

    /// Discover upgradeable base images and run the pipeline against each
    /// one in turn. Discovery failure is fatal; per-image failures are
    /// recorded and the run continues.
    pub async fn run(&self) -> Result<RunSummary, UpgradeError> {
        let run_start = Instant::now();

        let images = self.provider.discover_upgradeable_images().await?;

        if images.is_empty() {
            info!(
                region = %self.request.region,
                "No base images tagged for upgrade, nothing to do"
            );
        }

        let mut outcomes = Vec::new();
        for descriptor in &images {
            info!(
                base_image_id = %descriptor.image_id,
                base_image_name = %descriptor.name,
                virtualization_type = %descriptor.virtualization_type,
                "Starting upgrade pipeline for base image"
            );

            let outcome = self.upgrade_image(descriptor).await;

            match &outcome.error {
                None => info!(
                    base_image_id = %outcome.base_image_id,
                    new_image_id = outcome.new_image_id.as_deref().unwrap_or(""),
                    new_image_name = outcome.new_image_name.as_deref().unwrap_or(""),
                    "Base image upgraded"
                ),
                Some(err) => error!(
                    base_image_id = %outcome.base_image_id,
                    failed_stage = outcome.failed_stage.as_deref().unwrap_or("unknown"),
                    orphaned_instance_id = outcome.orphaned_instance_id.as_deref().unwrap_or(""),
                    error = %err,
                    "Upgrade pipeline failed for base image, continuing with next"
                ),
            }

            outcomes.push(outcome);
        }

        let images_upgraded = outcomes.iter().filter(|o| o.status == "upgraded").count();
        let images_failed = outcomes.len() - images_upgraded;

        Ok(RunSummary {
            status: if images_failed == 0 {
                "success".to_string()
            } else {
                "partial-failure".to_string()
            },
            region: self.request.region.clone(),
            images_discovered: images.len(),
            images_upgraded,
            images_failed,
            total_execution_time_seconds: run_start.elapsed().as_secs_f64(),
            outcomes,
        })
    }

    async fn upgrade_image(&self, base: &BaseImageDescriptor) -> ImageOutcome {
        match self.try_upgrade_image(base).await {
            Ok(upgraded) => ImageOutcome {
                base_image_id: base.image_id.clone(),
                base_image_name: base.name.clone(),
                status: "upgraded".to_string(),
                new_image_id: Some(upgraded.new_image_id),
                new_image_name: Some(upgraded.new_image_name),
                failed_stage: None,
                error: None,
                orphaned_instance_id: None,
            },
            Err(failure) => ImageOutcome {
                base_image_id: base.image_id.clone(),
                base_image_name: base.name.clone(),
                status: "failed".to_string(),
                new_image_id: failure.new_image_id,
                new_image_name: failure.new_image_name,
                failed_stage: Some(failure.stage.to_string()),
                error: Some(failure.error.to_string()),
                orphaned_instance_id: failure.orphaned_instance_id,
            },
        }
    }

    async fn try_upgrade_image(&self, base: &BaseImageDescriptor) -> Result<Upgraded, Failure> {
        let started_at = Utc::now();
        let new_image_name = naming::image_name(&base.name, started_at);
        let tag_set = TagSet::from_image_name(&base.name);

        let instance_type = naming::instance_type_for(&base.virtualization_type)
            .map_err(|e| Failure::new(e.kind(), e))?;

        let spec = LaunchSpec {
            base_image_id: base.image_id.clone(),
            name: base.name.clone(),
            instance_type: instance_type.to_string(),
            zone: self.request.zone.clone(),
            keypair: self.request.keypair.clone(),
            security_group: self.request.security_group.clone(),
            vpc_subnet: self.request.vpc_subnet.clone(),
        };

        let handle = self
            .provider
            .start_instance(&spec)
            .await
            .map_err(|e| Failure::new(Stage::Launch.name(), e))?;

        // The instance exists from here on; its reclamation follows the
        // failing (or last completed) stage's compensation, never just the
        // success path. The readiness wait counts as part of Launch, so a
        // wait failure is reclaimed like any later stage failure.
        let work = self.run_on_instance(&handle, &new_image_name).await;

        let (failed_stage, work_error) = match work {
            Ok(new_image_id) => {
                if let Err(mut failure) =
                    self.reclaim_instance(&handle, Stage::Snapshot, false).await
                {
                    failure.new_image_id = Some(new_image_id);
                    failure.new_image_name = Some(new_image_name);
                    return Err(failure);
                }

                if let Err(mut failure) = self.retag(base, &new_image_id, &tag_set).await {
                    failure.new_image_id = Some(new_image_id);
                    failure.new_image_name = Some(new_image_name);
                    return Err(failure);
                }

                return Ok(Upgraded {
                    new_image_id,
                    new_image_name,
                });
            }
            Err((stage, error)) => (stage, error),
        };

        match self.reclaim_instance(&handle, failed_stage, true).await {
            Ok(()) => Err(Failure::new(failed_stage.name(), work_error)),
            Err(mut failure) => {
                // The stage error stays primary; the unreclaimed instance
                // is reported alongside it.
                failure.stage = failed_stage.name();
                failure.error = work_error;
                failure.orphaned_instance_id = Some(handle.instance_id.clone());
                Err(failure)
            }
        }
    }

    /// Readiness wait, bootstrap, system upgrade and snapshot against the
    /// started instance. Returns the new image id, or the stage that
    /// failed.
    async fn run_on_instance(
        &self,
        handle: &InstanceHandle,
        new_image_name: &str,
    ) -> Result<String, (Stage, UpgradeError)> {
        let handle = self
            .provider
            .wait_instance_running(handle)
            .await
            .map_err(|e| (Stage::Launch, e))?;

        let hosts = vec![handle.public_ip.clone()];

        let task = adapter::bootstrap_task();
        info!(
            stage = Stage::Bootstrap.name(),
            instance_id = %handle.instance_id,
            public_ip = %handle.public_ip,
            "Ensuring remote tooling is up to date"
        );
        self.remote
            .run(&hosts, &task)
            .await
            .and_then(|bag| bag.output(&handle.public_ip).map(|_| ()))
            .map_err(|source| {
                (
                    Stage::Bootstrap,
                    UpgradeError::RemoteExecution {
                        stage: "bootstrap",
                        source,
                    },
                )
            })?;

        let task = adapter::system_upgrade_task();
        info!(
            stage = Stage::SystemUpgrade.name(),
            instance_id = %handle.instance_id,
            public_ip = %handle.public_ip,
            "Running full OS package upgrade"
        );
        self.remote
            .run(&hosts, &task)
            .await
            .and_then(|bag| bag.output(&handle.public_ip).map(|_| ()))
            .map_err(|source| {
                (
                    Stage::SystemUpgrade,
                    UpgradeError::RemoteExecution {
                        stage: "system-upgrade",
                        source,
                    },
                )
            })?;

        info!(
            stage = Stage::Snapshot.name(),
            instance_id = %handle.instance_id,
            new_image_name = %new_image_name,
            "Snapshotting upgraded instance"
        );
        self.provider
            .create_image(&handle.instance_id, new_image_name)
            .await
            .map_err(|e| (Stage::Snapshot, e))
    }

    /// Run the compensating action for the stage that just finished or
    /// failed. With `--preserve-on-failure` a failed iteration keeps its
    /// instance running for inspection instead.
    async fn reclaim_instance(
        &self,
        handle: &InstanceHandle,
        after_stage: Stage,
        stage_failed: bool,
    ) -> Result<(), Failure> {
        if after_stage.compensation() != Some(Stage::Terminate) {
            return Ok(());
        }

        if stage_failed && self.request.preserve_on_failure {
            warn!(
                instance_id = %handle.instance_id,
                public_ip = %handle.public_ip,
                "Preserving failed instance for debugging as requested, manual cleanup required"
            );
            return Err(Failure {
                stage: after_stage.name(),
                error: UpgradeError::Termination("skipped, preserved on failure".to_string()),
                orphaned_instance_id: Some(handle.instance_id.clone()),
                new_image_id: None,
                new_image_name: None,
            });
        }

        info!(
            stage = Stage::Terminate.name(),
            instance_id = %handle.instance_id,
            "Reclaiming upgrade instance"
        );

        match self.provider.terminate_instance(&handle.instance_id).await {
            Ok(()) => Ok(()),
            Err(e) if !stage_failed => {
                // Snapshot already succeeded; this is the distinct
                // orphaned-instance condition.
                Err(Failure {
                    stage: "orphaned-instance",
                    error: UpgradeError::OrphanedInstance {
                        instance_id: handle.instance_id.clone(),
                        detail: e.to_string(),
                    },
                    orphaned_instance_id: Some(handle.instance_id.clone()),
                    new_image_id: None,
                    new_image_name: None,
                })
            }
            Err(e) => {
                // Logged here because the caller keeps the stage error as
                // primary and this detail would otherwise be lost.
                warn!(
                    instance_id = %handle.instance_id,
                    error = %e,
                    "Termination after stage failure also failed, instance left running"
                );
                Err(Failure {
                    stage: after_stage.name(),
                    error: e,
                    orphaned_instance_id: Some(handle.instance_id.clone()),
                    new_image_id: None,
                    new_image_name: None,
                })
            }
        }
    }

    async fn retag(
        &self,
        base: &BaseImageDescriptor,
        new_image_id: &str,
        tag_set: &TagSet,
    ) -> Result<(), Failure> {
        info!(
            stage = Stage::Retag.name(),
            new_image_id = %new_image_id,
            base_image_id = %base.image_id,
            "Moving upgrade eligibility to the new image"
        );

        self.provider
            .create_tags(new_image_id, &tag_set.upgradeable_tags())
            .await
            .map_err(|e| Failure::new(Stage::Retag.name(), e))?;

        self.provider
            .create_tags(&base.image_id, &naming::retired_tags())
            .await
            .map_err(|e| Failure::new(Stage::Retag.name(), e))?;

        Ok(())
    }
}
