//! Converge AWS Client
//!
//! [`AwsClient`] implements [`converge_cloud::CloudClient`] on top of the
//! official AWS SDK: Auto Scaling for launch configurations, EC2 for VPCs,
//! subnets, gateways, VPN connections, security groups and tags. Credentials
//! come from the SDK's default provider chain.

pub mod client;
pub mod error;

pub use client::AwsClient;
pub use error::{classify, map_sdk_error};
