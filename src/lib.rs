pub mod adapter;
pub mod config;
pub mod ec2;
pub mod error;
pub mod logging;
pub mod naming;
pub mod pipeline;
pub mod types;
