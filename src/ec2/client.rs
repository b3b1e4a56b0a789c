use aws_config::BehaviorVersion;
use aws_sdk_ec2::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::UpgradeError;
use crate::types::UpgradeRequest;

pub struct Ec2Client {
    pub(super) client: Client,
    pub(super) region: String,
    pub(super) launch_timeout: Duration,
    pub(super) image_timeout: Duration,
    pub(super) check_interval: Duration,
}

impl Ec2Client {
    /// Creates an EC2 client bound to the run's region.
    pub async fn new(request: &UpgradeRequest) -> Result<Self, UpgradeError> {
        info!(region = %request.region, "Initializing AWS SDK configuration");

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(request.region.clone()))
            .load()
            .await;
        let client = Client::new(&config);

        info!(
            region = %request.region,
            "AWS EC2 client initialized successfully"
        );

        Ok(Self {
            client,
            region: request.region.clone(),
            launch_timeout: request.launch_timeout,
            image_timeout: request.image_timeout,
            check_interval: request.check_interval,
        })
    }

    /// Test EC2 API connectivity with a DescribeRegions call before any
    /// side-effecting work starts.
    pub async fn test_connectivity(&self) -> Result<(), UpgradeError> {
        debug!(region = %self.region, "Testing EC2 API connectivity");

        let start_time = std::time::Instant::now();

        self.client.describe_regions().send().await.map_err(|e| {
            UpgradeError::Configuration(format!(
                "failed to connect to the EC2 API in {}: {}",
                self.region,
                aws_sdk_ec2::error::DisplayErrorContext(e)
            ))
        })?;

        info!(
            region = %self.region,
            response_time_ms = start_time.elapsed().as_millis(),
            "EC2 API connectivity test successful"
        );

        Ok(())
    }
}
