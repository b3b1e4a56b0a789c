//! EC2 provider operations: image discovery, instance lifecycle, image
//! creation and tag bookkeeping.

mod client;
mod images;
mod instances;
mod tags;

pub use client::Ec2Client;

use async_trait::async_trait;

use crate::error::UpgradeError;
use crate::types::{BaseImageDescriptor, InstanceHandle, LaunchSpec};

/// Seam between the pipeline and the cloud provider.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// All base images tagged eligible for upgrade, collected once per
    /// run.
    async fn discover_upgradeable_images(&self)
    -> Result<Vec<BaseImageDescriptor>, UpgradeError>;

    /// Launch the temporary upgrade instance. The returned handle owns the
    /// instance from this point on; the caller reclaims it on every later
    /// failure, including a failed readiness wait.
    async fn start_instance(&self, spec: &LaunchSpec) -> Result<InstanceHandle, UpgradeError>;

    /// Wait until the started instance is running with a public IP.
    /// Returns the handle completed with that IP.
    async fn wait_instance_running(
        &self,
        handle: &InstanceHandle,
    ) -> Result<InstanceHandle, UpgradeError>;

    /// Snapshot the instance into a new AMI and wait until it is
    /// available. Returns the new image id.
    async fn create_image(&self, instance_id: &str, name: &str) -> Result<String, UpgradeError>;

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), UpgradeError>;

    async fn create_tags(
        &self,
        resource_id: &str,
        tags: &[(String, String)],
    ) -> Result<(), UpgradeError>;
}

#[async_trait]
impl CloudProvider for Ec2Client {
    async fn discover_upgradeable_images(
        &self,
    ) -> Result<Vec<BaseImageDescriptor>, UpgradeError> {
        self.find_upgradeable_images().await
    }

    async fn start_instance(&self, spec: &LaunchSpec) -> Result<InstanceHandle, UpgradeError> {
        self.run_upgrade_instance(spec).await
    }

    async fn wait_instance_running(
        &self,
        handle: &InstanceHandle,
    ) -> Result<InstanceHandle, UpgradeError> {
        self.wait_until_running(handle).await
    }

    async fn create_image(&self, instance_id: &str, name: &str) -> Result<String, UpgradeError> {
        let image_id = self.create_image_from_instance(instance_id, name).await?;
        self.wait_until_image_available(&image_id).await?;
        Ok(image_id)
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), UpgradeError> {
        self.terminate(instance_id).await
    }

    async fn create_tags(
        &self,
        resource_id: &str,
        tags: &[(String, String)],
    ) -> Result<(), UpgradeError> {
        self.apply_tags(resource_id, tags).await
    }
}
