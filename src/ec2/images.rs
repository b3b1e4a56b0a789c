use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::{Filter, ImageState};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::Ec2Client;
use crate::error::UpgradeError;
use crate::types::BaseImageDescriptor;

/// Tag marking a base image as eligible for upgrade.
const UPGRADE_TAG_KEY: &str = "Upgrade";
const UPGRADE_TAG_ELIGIBLE: &str = "YES";

impl Ec2Client {
    /// Discover base images tagged `Upgrade=YES` owned by this account.
    /// Collected once; the sequence is stable for the duration of the run.
    pub(super) async fn find_upgradeable_images(
        &self,
    ) -> Result<Vec<BaseImageDescriptor>, UpgradeError> {
        info!(
            region = %self.region,
            tag = format!("{}={}", UPGRADE_TAG_KEY, UPGRADE_TAG_ELIGIBLE),
            "Discovering upgradeable base images"
        );

        let response = self
            .client
            .describe_images()
            .owners("self")
            .filters(
                Filter::builder()
                    .name(format!("tag:{}", UPGRADE_TAG_KEY))
                    .values(UPGRADE_TAG_ELIGIBLE)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                UpgradeError::Discovery(format!(
                    "DescribeImages failed: {}",
                    DisplayErrorContext(e)
                ))
            })?;

        let mut descriptors = Vec::new();
        for image in response.images() {
            let (Some(image_id), Some(name)) = (image.image_id(), image.name()) else {
                warn!(
                    image_id = image.image_id().unwrap_or("unknown"),
                    "Skipping discovered image without id or name"
                );
                continue;
            };

            let virtualization_type = image
                .virtualization_type()
                .map(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();

            debug!(
                image_id = %image_id,
                name = %name,
                virtualization_type = %virtualization_type,
                "Discovered upgradeable base image"
            );

            descriptors.push(BaseImageDescriptor {
                name: name.to_string(),
                image_id: image_id.to_string(),
                virtualization_type,
            });
        }

        info!(
            region = %self.region,
            image_count = descriptors.len(),
            "Base image discovery completed"
        );

        Ok(descriptors)
    }

    /// Request image creation from the upgraded instance. The new image id
    /// comes from the typed response field; its absence is an explicit
    /// error.
    pub(super) async fn create_image_from_instance(
        &self,
        instance_id: &str,
        name: &str,
    ) -> Result<String, UpgradeError> {
        info!(
            instance_id = %instance_id,
            image_name = %name,
            region = %self.region,
            "Creating image from upgraded instance"
        );

        let response = self
            .client
            .create_image()
            .instance_id(instance_id)
            .name(name)
            .send()
            .await
            .map_err(|e| {
                UpgradeError::Snapshot(format!("CreateImage failed: {}", DisplayErrorContext(e)))
            })?;

        let image_id = response.image_id().ok_or_else(|| {
            UpgradeError::Snapshot(format!(
                "CreateImage for instance {} returned no image id",
                instance_id
            ))
        })?;

        info!(
            instance_id = %instance_id,
            new_image_id = %image_id,
            "Image creation initiated"
        );

        Ok(image_id.to_string())
    }

    /// Poll until the image is available, bounded by the run's image
    /// timeout.
    pub(super) async fn wait_until_image_available(
        &self,
        image_id: &str,
    ) -> Result<(), UpgradeError> {
        let wait_start = Instant::now();
        let mut checks_performed = 0u32;

        info!(
            image_id = %image_id,
            timeout_seconds = self.image_timeout.as_secs(),
            "Waiting for image to become available"
        );

        loop {
            if wait_start.elapsed() >= self.image_timeout {
                return Err(UpgradeError::Snapshot(format!(
                    "image {} not available after {:.0}s",
                    image_id,
                    wait_start.elapsed().as_secs_f64()
                )));
            }

            let response = self
                .client
                .describe_images()
                .image_ids(image_id)
                .send()
                .await
                .map_err(|e| {
                    UpgradeError::Snapshot(format!(
                        "DescribeImages failed while waiting for {}: {}",
                        image_id,
                        DisplayErrorContext(e)
                    ))
                })?;

            let state = response
                .images()
                .first()
                .and_then(|i| i.state())
                .cloned()
                .unwrap_or(ImageState::Pending);

            checks_performed += 1;
            debug!(
                image_id = %image_id,
                state = %state.as_str(),
                check_number = checks_performed,
                "Image state check"
            );

            match state {
                ImageState::Available => {
                    info!(
                        image_id = %image_id,
                        checks_performed,
                        duration_seconds = wait_start.elapsed().as_secs_f64(),
                        "Image is available"
                    );
                    return Ok(());
                }
                ImageState::Failed | ImageState::Error | ImageState::Invalid => {
                    return Err(UpgradeError::Snapshot(format!(
                        "image {} entered state {}",
                        image_id,
                        state.as_str()
                    )));
                }
                _ => {
                    tokio::time::sleep(self.poll_interval()).await;
                }
            }
        }
    }

    pub(super) fn poll_interval(&self) -> Duration {
        self.check_interval
    }
}
