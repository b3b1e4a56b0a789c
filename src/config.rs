use clap::Parser;
use std::time::Duration;

use crate::types::UpgradeRequest;

/// Rolling AMI upgrade automation for EC2 base images tagged Upgrade=YES.
#[derive(Parser, Debug, Clone)]
#[command(name = "ami-upgrade", version, about)]
pub struct Config {
    /// Remote user for SSH access to the upgrade instance
    #[arg(short = 'u', long, env = "UPGRADE_USER")]
    pub user: String,

    /// AWS region to discover and upgrade images in
    #[arg(short = 'r', long, env = "AWS_REGION")]
    pub region: String,

    /// Availability zone for the temporary upgrade instance
    #[arg(short = 'z', long, env = "UPGRADE_ZONE")]
    pub zone: String,

    /// Security group id attached to the upgrade instance
    #[arg(short = 's', long, env = "UPGRADE_SECURITY_GROUP")]
    pub security_group: String,

    /// VPC subnet id the upgrade instance is launched into
    #[arg(short = 'v', long, env = "UPGRADE_VPC_SUBNET")]
    pub vpc_subnet: String,

    /// EC2 key pair name for the upgrade instance
    #[arg(short = 'k', long, env = "UPGRADE_KEYPAIR")]
    pub keypair: String,

    /// Local path to the private key matching the key pair
    #[arg(short = 'e', long, env = "UPGRADE_KEYFILE")]
    pub keyfile: Option<String>,

    /// Sudo password for privilege escalation on the instance
    #[arg(short = 'd', long, env = "UPGRADE_SUDO_PASS", hide_env_values = true)]
    pub sudo_pass: Option<String>,

    /// SSH password, when key authentication is not used
    #[arg(short = 'p', long, env = "UPGRADE_SSH_PASS", hide_env_values = true)]
    pub ssh_pass: Option<String>,

    /// Verbosity: 0 = info, 1 = debug, 2+ = trace
    #[arg(short = 'i', long, default_value = "0")]
    pub verbosity: u8,

    /// Log format: json or pretty
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Maximum wait for the instance to be running, in seconds
    #[arg(long, default_value = "600")]
    pub launch_timeout: u64,

    /// Maximum wait for the new image to become available, in seconds
    #[arg(long, default_value = "1800")]
    pub image_timeout: u64,

    /// Poll interval for instance and image state checks, in seconds
    #[arg(long, default_value = "15")]
    pub check_interval: u64,

    /// Keep the instance running when a stage fails, for debugging
    #[arg(long, default_value = "false")]
    pub preserve_on_failure: bool,
}

impl Config {
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Run-wide immutable request, built once after parse-time validation.
    pub fn to_request(&self) -> UpgradeRequest {
        UpgradeRequest {
            user: self.user.clone(),
            region: self.region.clone(),
            zone: self.zone.clone(),
            keypair: self.keypair.clone(),
            key_path: self.keyfile.clone(),
            security_group: self.security_group.clone(),
            vpc_subnet: self.vpc_subnet.clone(),
            ssh_password: self.ssh_pass.clone(),
            sudo_password: self.sudo_pass.clone(),
            launch_timeout: Duration::from_secs(self.launch_timeout),
            image_timeout: Duration::from_secs(self.image_timeout),
            check_interval: Duration::from_secs(self.check_interval),
            preserve_on_failure: self.preserve_on_failure,
        }
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn display(&self) {
        tracing::info!(
            user = %self.user,
            region = %self.region,
            zone = %self.zone,
            security_group = %self.security_group,
            vpc_subnet = %self.vpc_subnet,
            keypair = %self.keypair,
            keyfile = self.keyfile.as_deref().unwrap_or("none"),
            ssh_auth = if self.ssh_pass.is_some() { "password" } else { "key" },
            launch_timeout_seconds = self.launch_timeout,
            image_timeout_seconds = self.image_timeout,
            check_interval_seconds = self.check_interval,
            preserve_on_failure = self.preserve_on_failure,
            "Configuration initialized"
        );

        if self.preserve_on_failure {
            tracing::warn!(
                "PRESERVE ON FAILURE ENABLED - failed iterations leave their instance running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_ARGS: &[&str] = &[
        "ami-upgrade",
        "-u",
        "admin",
        "-r",
        "eu-west-1",
        "-z",
        "eu-west-1a",
        "-s",
        "sg-123",
        "-v",
        "subnet-123",
        "-k",
        "upgrade-key",
    ];

    #[test]
    fn test_all_required_fields_parse() {
        let config = Config::try_parse_from(FULL_ARGS).unwrap();
        assert_eq!(config.user, "admin");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.zone, "eu-west-1a");
        assert_eq!(config.security_group, "sg-123");
        assert_eq!(config.vpc_subnet, "subnet-123");
        assert_eq!(config.keypair, "upgrade-key");
    }

    #[test]
    fn test_optional_fields_default() {
        let config = Config::try_parse_from(FULL_ARGS).unwrap();
        assert_eq!(config.verbosity, 0);
        assert!(config.keyfile.is_none());
        assert!(config.ssh_pass.is_none());
        assert!(config.sudo_pass.is_none());
        assert!(!config.preserve_on_failure);
    }

    #[test]
    fn test_missing_region_is_rejected_naming_the_field() {
        // Rejection happens at parse time, before any provider client can
        // be constructed or called. The env fallback would mask the
        // missing flag, so clear it for this test.
        unsafe { std::env::remove_var("AWS_REGION") };
        let args: Vec<&str> = FULL_ARGS
            .iter()
            .copied()
            .filter(|a| *a != "-r" && *a != "eu-west-1")
            .collect();
        let err = Config::try_parse_from(args).unwrap_err();
        assert!(err.to_string().contains("--region"));
    }

    #[test]
    fn test_each_required_field_is_enforced() {
        for (flag, value, long) in [
            ("-u", "admin", "--user"),
            ("-z", "eu-west-1a", "--zone"),
            ("-s", "sg-123", "--security-group"),
            ("-v", "subnet-123", "--vpc-subnet"),
            ("-k", "upgrade-key", "--keypair"),
        ] {
            let args: Vec<&str> = FULL_ARGS
                .iter()
                .copied()
                .filter(|a| *a != flag && *a != value)
                .collect();
            let err = Config::try_parse_from(args).unwrap_err();
            assert!(
                err.to_string().contains(long),
                "expected parse error naming {}, got: {}",
                long,
                err
            );
        }
    }

    #[test]
    fn test_verbosity_maps_to_log_level() {
        let mut config = Config::try_parse_from(FULL_ARGS).unwrap();
        assert_eq!(config.log_level(), "info");
        config.verbosity = 1;
        assert_eq!(config.log_level(), "debug");
        config.verbosity = 5;
        assert_eq!(config.log_level(), "trace");
    }

    #[test]
    fn test_to_request_carries_all_fields() {
        let mut args: Vec<&str> = FULL_ARGS.to_vec();
        args.extend(["-e", "/keys/upgrade.pem", "--preserve-on-failure"]);
        let request = Config::try_parse_from(args).unwrap().to_request();
        assert_eq!(request.user, "admin");
        assert_eq!(request.key_path.as_deref(), Some("/keys/upgrade.pem"));
        assert_eq!(request.launch_timeout, Duration::from_secs(600));
        assert!(request.preserve_on_failure);
    }
}
