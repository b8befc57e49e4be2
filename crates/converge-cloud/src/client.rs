//! Remote API client abstraction
//!
//! One [`CloudClient`] is a handle to the cloud control plane of a single
//! region. Concrete backends (AWS SDK, in-memory) implement this trait; the
//! reconciler only ever talks to the trait.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

/// Describe-call filter: matches objects whose `name` attribute has any of `values`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Filter on the `Name` tag
    pub fn tag_name(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new("tag:Name", values)
    }
}

/// One page of a paginated describe call
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Launch configuration as returned by the list call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfigurationInfo {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: Option<String>,
    /// Security group identifiers
    pub security_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcInfo {
    pub vpc_id: String,
    pub cidr_block: String,
    pub instance_tenancy: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl VpcInfo {
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetInfo {
    pub subnet_id: String,
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl SubnetInfo {
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupInfo {
    pub group_id: String,
    pub group_name: String,
    pub vpc_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternetGatewayInfo {
    pub internet_gateway_id: String,
    /// Identifiers of the VPCs the gateway is attached to
    pub attachments: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl InternetGatewayInfo {
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnGatewayInfo {
    pub vpn_gateway_id: String,
    pub gateway_type: String,
    pub availability_zone: Option<String>,
    pub state: String,
    /// Identifiers of attached VPCs; detached attachments are left out
    pub attachments: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl VpnGatewayInfo {
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerGatewayInfo {
    pub customer_gateway_id: String,
    pub gateway_type: String,
    pub ip_address: String,
    pub bgp_asn: String,
    pub state: String,
    pub tags: BTreeMap<String, String>,
}

impl CustomerGatewayInfo {
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnConnectionInfo {
    pub vpn_connection_id: String,
    pub connection_type: String,
    pub vpn_gateway_id: Option<String>,
    pub customer_gateway_id: Option<String>,
    /// Static route destination CIDR blocks
    pub routes: Vec<String>,
    pub static_routes_only: bool,
    pub state: String,
    pub tags: BTreeMap<String, String>,
}

impl VpnConnectionInfo {
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }
}

/// VPN objects stay visible in describe calls for a while after deletion
pub fn is_deleted_state(state: &str) -> bool {
    matches!(state, "deleted" | "deleting")
}

/// Create payload for a launch configuration
///
/// Optional fields are `None` when they must be omitted from the request.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateLaunchConfiguration {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub security_group_ids: Vec<String>,
    /// Base64-encoded user data
    pub user_data: Option<String>,
    pub key_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateVpc {
    pub cidr_block: String,
    pub instance_tenancy: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubnet {
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateVpnGateway {
    pub gateway_type: String,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateCustomerGateway {
    pub gateway_type: String,
    pub ip_address: String,
    pub bgp_asn: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateVpnConnection {
    pub connection_type: String,
    pub vpn_gateway_id: String,
    pub customer_gateway_id: String,
    pub static_routes_only: bool,
}

/// Per-region handle to the cloud control plane
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Region this handle talks to
    fn region(&self) -> &str;

    /// Check that credentials are valid for this region
    async fn check_auth(&self) -> Result<AuthStatus>;

    async fn describe_launch_configurations(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<LaunchConfigurationInfo>>;

    async fn describe_vpcs(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<VpcInfo>>;

    async fn describe_subnets(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<SubnetInfo>>;

    async fn describe_security_groups(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<SecurityGroupInfo>>;

    async fn create_launch_configuration(&self, request: &CreateLaunchConfiguration) -> Result<()>;

    /// Fails with [`CloudError::RemoteNotFound`] when no such configuration exists
    async fn delete_launch_configuration(&self, name: &str) -> Result<()>;

    /// Returns the new VPC identifier
    async fn create_vpc(&self, request: &CreateVpc) -> Result<String>;

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()>;

    /// Returns the new subnet identifier
    async fn create_subnet(&self, request: &CreateSubnet) -> Result<String>;

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;

    async fn describe_internet_gateways(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<InternetGatewayInfo>>;

    /// Returns the new gateway identifier
    async fn create_internet_gateway(&self) -> Result<String>;

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()>;

    async fn describe_vpn_gateways(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<VpnGatewayInfo>>;

    /// Returns the new gateway identifier
    async fn create_vpn_gateway(&self, request: &CreateVpnGateway) -> Result<String>;

    async fn attach_vpn_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;

    async fn detach_vpn_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;

    async fn delete_vpn_gateway(&self, gateway_id: &str) -> Result<()>;

    async fn describe_customer_gateways(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<CustomerGatewayInfo>>;

    /// Returns the new gateway identifier
    async fn create_customer_gateway(&self, request: &CreateCustomerGateway) -> Result<String>;

    async fn delete_customer_gateway(&self, gateway_id: &str) -> Result<()>;

    async fn describe_vpn_connections(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<VpnConnectionInfo>>;

    /// Returns the new connection identifier
    async fn create_vpn_connection(&self, request: &CreateVpnConnection) -> Result<String>;

    async fn create_vpn_connection_route(
        &self,
        connection_id: &str,
        destination_cidr_block: &str,
    ) -> Result<()>;

    async fn delete_vpn_connection(&self, connection_id: &str) -> Result<()>;

    async fn create_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<()>;

    async fn delete_tags(&self, resource_id: &str, keys: &[String]) -> Result<()>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Drain a paginated describe call
pub async fn paginate<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = fetch(token.clone()).await?;
        items.extend(page.items);
        match page.next_token {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                return Err(CloudError::InvalidConfig(format!(
                    "pagination token {} repeated",
                    next
                )));
            }
            Some(next) => token = Some(next),
            None => return Ok(items),
        }
    }
}

/// Client handles for every configured region
#[derive(Clone, Default)]
pub struct RegionClients {
    clients: BTreeMap<String, Arc<dyn CloudClient>>,
}

impl RegionClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: Arc<dyn CloudClient>) {
        self.clients.insert(client.region().to_string(), client);
    }

    pub fn with(mut self, client: Arc<dyn CloudClient>) -> Self {
        self.insert(client);
        self
    }

    /// The same handles minus the given regions
    pub fn without(&self, regions: &BTreeSet<&str>) -> Self {
        Self {
            clients: self
                .clients
                .iter()
                .filter(|(region, _)| !regions.contains(region.as_str()))
                .map(|(region, client)| (region.clone(), Arc::clone(client)))
                .collect(),
        }
    }

    pub fn get(&self, region: &str) -> Result<&Arc<dyn CloudClient>> {
        self.clients
            .get(region)
            .ok_or_else(|| CloudError::RegionNotConfigured(region.to_string()))
    }

    /// Configured regions in sorted order
    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CloudClient>> {
        self.clients.values()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}

impl std::fmt::Debug for RegionClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionClients")
            .field("regions", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}
