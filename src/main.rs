use anyhow::Result;
use tracing::{error, info};

use ami_upgrade::adapter::SshExecutor;
use ami_upgrade::config::Config;
use ami_upgrade::ec2::Ec2Client;
use ami_upgrade::logging;
use ami_upgrade::pipeline::Upgrader;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args();
    logging::init(&config.log_format, config.log_level());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT"),
        build_date = env!("BUILD_DATE"),
        "AMI upgrade run starting"
    );

    config.display();
    let request = config.to_request();

    let ec2 = match Ec2Client::new(&request).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to initialize EC2 client");
            std::process::exit(1);
        }
    };

    // Fail the whole run up front rather than mid-pipeline.
    if let Err(e) = ec2.test_connectivity().await {
        error!(error = %e, "EC2 API connectivity check failed");
        std::process::exit(1);
    }

    let ssh = SshExecutor::new(&request);
    let upgrader = Upgrader::new(&request, &ec2, &ssh);

    match upgrader.run().await {
        Ok(summary) => {
            info!(
                region = %summary.region,
                images_discovered = summary.images_discovered,
                images_upgraded = summary.images_upgraded,
                images_failed = summary.images_failed,
                total_execution_seconds = summary.total_execution_time_seconds,
                "Upgrade run completed"
            );

            println!("{}", serde_json::to_string_pretty(&summary)?);

            if summary.images_failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Upgrade run failed");
            std::process::exit(1);
        }
    }
}
