use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, InstanceNetworkInterfaceSpecification, InstanceStateName,
    InstanceType, Placement, ResourceType, Tag, TagSpecification, VolumeType,
};
use std::time::Instant;
use tracing::{debug, info};

use super::Ec2Client;
use crate::error::UpgradeError;
use crate::types::{InstanceHandle, LaunchSpec};

const ROOT_DEVICE_NAME: &str = "/dev/sda1";
const ROOT_VOLUME_SIZE_GIB: i32 = 20;

impl Ec2Client {
    /// Launch the temporary upgrade instance from the base image.
    pub(super) async fn run_upgrade_instance(
        &self,
        spec: &LaunchSpec,
    ) -> Result<InstanceHandle, UpgradeError> {
        let instance_type: InstanceType = spec.instance_type.parse().map_err(|_| {
            UpgradeError::Launch(format!("invalid instance type '{}'", spec.instance_type))
        })?;

        info!(
            base_image_id = %spec.base_image_id,
            instance_type = %spec.instance_type,
            zone = %spec.zone,
            "Launching upgrade instance"
        );

        let response = self
            .client
            .run_instances()
            .image_id(&spec.base_image_id)
            .instance_type(instance_type)
            .min_count(1)
            .max_count(1)
            .key_name(&spec.keypair)
            .placement(Placement::builder().availability_zone(&spec.zone).build())
            .network_interfaces(
                InstanceNetworkInterfaceSpecification::builder()
                    .device_index(0)
                    .subnet_id(&spec.vpc_subnet)
                    .groups(&spec.security_group)
                    .associate_public_ip_address(true)
                    .delete_on_termination(true)
                    .build(),
            )
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(ROOT_DEVICE_NAME)
                    .ebs(
                        EbsBlockDevice::builder()
                            .volume_size(ROOT_VOLUME_SIZE_GIB)
                            .volume_type(VolumeType::Gp3)
                            .delete_on_termination(true)
                            .build(),
                    )
                    .build(),
            )
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .tags(Tag::builder().key("Name").value(&spec.name).build())
                    .tags(Tag::builder().key("State").value("upgrading").build())
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                UpgradeError::Launch(format!("RunInstances failed: {}", DisplayErrorContext(e)))
            })?;

        let instance_id = response
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .ok_or_else(|| {
                UpgradeError::Launch("RunInstances returned no instance".to_string())
            })?
            .to_string();

        info!(instance_id = %instance_id, "Upgrade instance launched");

        Ok(InstanceHandle {
            instance_id,
            public_ip: String::new(),
        })
    }

    /// Poll until the instance is running with a public IP, bounded by the
    /// run's launch timeout.
    pub(super) async fn wait_until_running(
        &self,
        handle: &InstanceHandle,
    ) -> Result<InstanceHandle, UpgradeError> {
        let wait_start = Instant::now();

        info!(
            instance_id = %handle.instance_id,
            timeout_seconds = self.launch_timeout.as_secs(),
            "Waiting for instance to be running"
        );

        loop {
            if wait_start.elapsed() >= self.launch_timeout {
                return Err(UpgradeError::Launch(format!(
                    "instance {} not running after {:.0}s",
                    handle.instance_id,
                    wait_start.elapsed().as_secs_f64()
                )));
            }

            let response = self
                .client
                .describe_instances()
                .instance_ids(&handle.instance_id)
                .send()
                .await
                .map_err(|e| {
                    UpgradeError::Launch(format!(
                        "DescribeInstances failed while waiting for {}: {}",
                        handle.instance_id,
                        DisplayErrorContext(e)
                    ))
                })?;

            // DescribeInstances is eventually consistent right after
            // RunInstances; an empty reservation is not-yet-visible, not
            // gone.
            let Some(instance) = response
                .reservations()
                .first()
                .and_then(|r| r.instances().first())
            else {
                debug!(
                    instance_id = %handle.instance_id,
                    "Instance not visible in DescribeInstances yet"
                );
                tokio::time::sleep(self.poll_interval()).await;
                continue;
            };

            let state = instance
                .state()
                .and_then(|s| s.name())
                .cloned()
                .unwrap_or(InstanceStateName::Pending);

            match state {
                InstanceStateName::Running => {
                    let Some(public_ip) = instance.public_ip_address() else {
                        debug!(
                            instance_id = %handle.instance_id,
                            "Instance running, public IP not assigned yet"
                        );
                        tokio::time::sleep(self.poll_interval()).await;
                        continue;
                    };

                    info!(
                        instance_id = %handle.instance_id,
                        public_ip = %public_ip,
                        duration_seconds = wait_start.elapsed().as_secs_f64(),
                        "Instance is running"
                    );

                    return Ok(InstanceHandle {
                        instance_id: handle.instance_id.clone(),
                        public_ip: public_ip.to_string(),
                    });
                }
                InstanceStateName::Pending => {
                    debug!(instance_id = %handle.instance_id, "Instance still pending");
                    tokio::time::sleep(self.poll_interval()).await;
                }
                other => {
                    return Err(UpgradeError::Launch(format!(
                        "instance {} entered unexpected state {}",
                        handle.instance_id,
                        other.as_str()
                    )));
                }
            }
        }
    }

    pub(super) async fn terminate(&self, instance_id: &str) -> Result<(), UpgradeError> {
        info!(
            instance_id = %instance_id,
            region = %self.region,
            api_action = "TerminateInstances",
            "Terminating upgrade instance"
        );

        self.client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| {
                UpgradeError::Termination(format!(
                    "TerminateInstances failed for {}: {}",
                    instance_id,
                    DisplayErrorContext(e)
                ))
            })?;

        Ok(())
    }
}
