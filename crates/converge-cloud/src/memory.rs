//! In-process cloud backend
//!
//! [`InMemoryCloud`] implements [`CloudClient`] over plain collections. It
//! understands the same describe filters as the real API, paginates, counts
//! remote calls and can be told to fail, which makes it the backend for
//! tests and dry runs.

use crate::client::{
    is_deleted_state, AuthStatus, CloudClient, CreateCustomerGateway, CreateLaunchConfiguration,
    CreateSubnet, CreateVpc, CreateVpnConnection, CreateVpnGateway, CustomerGatewayInfo, Filter,
    InternetGatewayInfo, LaunchConfigurationInfo, Page, SecurityGroupInfo, SubnetInfo,
    VpcInfo, VpnConnectionInfo, VpnGatewayInfo,
};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

const DEFAULT_PAGE_SIZE: usize = 50;
const DEFAULT_GATEWAY_TYPE: &str = "ipsec.1";

#[derive(Debug, Clone)]
enum Failure {
    Api(String),
    Auth(String),
}

impl Failure {
    fn from_error(error: CloudError) -> Self {
        match error.root() {
            CloudError::AuthenticationFailed { message, .. } => Failure::Auth(message.clone()),
            CloudError::Api { message, .. } => Failure::Api(message.clone()),
            other => Failure::Api(other.to_string()),
        }
    }

    fn to_error(&self, region: &str) -> CloudError {
        match self {
            Failure::Api(message) => CloudError::api(region, message),
            Failure::Auth(message) => CloudError::AuthenticationFailed {
                region: region.to_string(),
                message: message.clone(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct State {
    launch_configurations: Vec<LaunchConfigurationInfo>,
    user_data: BTreeMap<String, Option<String>>,
    create_requests: Vec<CreateLaunchConfiguration>,
    vpcs: Vec<VpcInfo>,
    subnets: Vec<SubnetInfo>,
    security_groups: Vec<SecurityGroupInfo>,
    internet_gateways: Vec<InternetGatewayInfo>,
    vpn_gateways: Vec<VpnGatewayInfo>,
    customer_gateways: Vec<CustomerGatewayInfo>,
    vpn_connections: Vec<VpnConnectionInfo>,
    next_id: u32,
    list_failure: Option<Failure>,
    mutation_failure: Option<Failure>,
    auth_failure: Option<Failure>,
}

impl State {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    fn tags_mut(&mut self, id: &str) -> Option<&mut BTreeMap<String, String>> {
        let State {
            vpcs,
            subnets,
            internet_gateways,
            vpn_gateways,
            customer_gateways,
            vpn_connections,
            ..
        } = self;
        if let Some(vpc) = vpcs.iter_mut().find(|v| v.vpc_id == id) {
            return Some(&mut vpc.tags);
        }
        if let Some(subnet) = subnets.iter_mut().find(|s| s.subnet_id == id) {
            return Some(&mut subnet.tags);
        }
        if let Some(gw) = internet_gateways
            .iter_mut()
            .find(|g| g.internet_gateway_id == id)
        {
            return Some(&mut gw.tags);
        }
        if let Some(gw) = vpn_gateways.iter_mut().find(|g| g.vpn_gateway_id == id) {
            return Some(&mut gw.tags);
        }
        if let Some(gw) = customer_gateways
            .iter_mut()
            .find(|g| g.customer_gateway_id == id)
        {
            return Some(&mut gw.tags);
        }
        vpn_connections
            .iter_mut()
            .find(|c| c.vpn_connection_id == id)
            .map(|c| &mut c.tags)
    }

    fn live_vpn_gateway(&mut self, id: &str) -> Option<&mut VpnGatewayInfo> {
        self.vpn_gateways
            .iter_mut()
            .find(|g| g.vpn_gateway_id == id && !is_deleted_state(&g.state))
    }

    fn live_customer_gateway(&mut self, id: &str) -> Option<&mut CustomerGatewayInfo> {
        self.customer_gateways
            .iter_mut()
            .find(|g| g.customer_gateway_id == id && !is_deleted_state(&g.state))
    }

    fn live_vpn_connection(&mut self, id: &str) -> Option<&mut VpnConnectionInfo> {
        self.vpn_connections
            .iter_mut()
            .find(|c| c.vpn_connection_id == id && !is_deleted_state(&c.state))
    }

    fn connection_uses(&self, gateway_id: &str) -> bool {
        self.vpn_connections.iter().any(|c| {
            !is_deleted_state(&c.state)
                && (c.vpn_gateway_id.as_deref() == Some(gateway_id)
                    || c.customer_gateway_id.as_deref() == Some(gateway_id))
        })
    }
}

/// In-memory implementation of one region's control plane
#[derive(Debug)]
pub struct InMemoryCloud {
    region: String,
    page_size: usize,
    calls: AtomicUsize,
    state: Mutex<State>,
}

impl InMemoryCloud {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            page_size: DEFAULT_PAGE_SIZE,
            calls: AtomicUsize::new(0),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of remote calls issued so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Make every describe call fail with this error
    pub fn fail_listing(&self, error: CloudError) {
        self.state().list_failure = Some(Failure::from_error(error));
    }

    /// Make every create/delete/tag call fail with this error
    pub fn fail_mutations(&self, error: CloudError) {
        self.state().mutation_failure = Some(Failure::from_error(error));
    }

    /// Make the credential check report "not authenticated"
    pub fn fail_auth(&self, message: impl Into<String>) {
        self.state().auth_failure = Some(Failure::Auth(message.into()));
    }

    /// Make the credential check itself fail with this error
    pub fn fail_auth_check(&self, error: CloudError) {
        self.state().auth_failure = Some(Failure::from_error(error));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.list_failure = None;
        state.mutation_failure = None;
        state.auth_failure = None;
    }

    /// Seed a VPC; returns its identifier
    pub fn add_vpc(&self, name: &str, cidr_block: &str) -> String {
        let mut state = self.state();
        let vpc_id = state.allocate_id("vpc");
        state.vpcs.push(VpcInfo {
            vpc_id: vpc_id.clone(),
            cidr_block: cidr_block.to_string(),
            instance_tenancy: Some("default".to_string()),
            tags: BTreeMap::from([("Name".to_string(), name.to_string())]),
        });
        vpc_id
    }

    /// Seed a subnet; returns its identifier
    pub fn add_subnet(
        &self,
        name: &str,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: Option<&str>,
    ) -> String {
        let mut state = self.state();
        let subnet_id = state.allocate_id("subnet");
        state.subnets.push(SubnetInfo {
            subnet_id: subnet_id.clone(),
            vpc_id: vpc_id.to_string(),
            cidr_block: cidr_block.to_string(),
            availability_zone: availability_zone.map(str::to_string),
            tags: BTreeMap::from([("Name".to_string(), name.to_string())]),
        });
        subnet_id
    }

    /// Seed a security group; returns its identifier
    pub fn add_security_group(&self, name: &str, vpc_id: Option<&str>) -> String {
        let mut state = self.state();
        let group_id = state.allocate_id("sg");
        state.security_groups.push(SecurityGroupInfo {
            group_id: group_id.clone(),
            group_name: name.to_string(),
            vpc_id: vpc_id.map(str::to_string),
        });
        group_id
    }

    /// Seed a launch configuration referencing security group identifiers
    pub fn add_launch_configuration(
        &self,
        name: &str,
        image_id: &str,
        instance_type: &str,
        group_ids: &[&str],
    ) {
        self.state().launch_configurations.push(LaunchConfigurationInfo {
            name: name.to_string(),
            image_id: image_id.to_string(),
            instance_type: instance_type.to_string(),
            key_name: None,
            security_groups: group_ids.iter().map(|id| id.to_string()).collect(),
        });
    }

    /// Seed an internet gateway, optionally attached; returns its identifier
    pub fn add_internet_gateway(&self, name: &str, vpc_id: Option<&str>) -> String {
        let mut state = self.state();
        let gateway_id = state.allocate_id("igw");
        state.internet_gateways.push(InternetGatewayInfo {
            internet_gateway_id: gateway_id.clone(),
            attachments: vpc_id.map(str::to_string).into_iter().collect(),
            tags: BTreeMap::from([("Name".to_string(), name.to_string())]),
        });
        gateway_id
    }

    /// Seed a VPN gateway, optionally attached; returns its identifier
    pub fn add_vpn_gateway(&self, name: &str, vpc_id: Option<&str>) -> String {
        let mut state = self.state();
        let gateway_id = state.allocate_id("vgw");
        state.vpn_gateways.push(VpnGatewayInfo {
            vpn_gateway_id: gateway_id.clone(),
            gateway_type: DEFAULT_GATEWAY_TYPE.to_string(),
            availability_zone: None,
            state: "available".to_string(),
            attachments: vpc_id.map(str::to_string).into_iter().collect(),
            tags: BTreeMap::from([("Name".to_string(), name.to_string())]),
        });
        gateway_id
    }

    /// Seed a customer gateway; returns its identifier
    pub fn add_customer_gateway(&self, name: &str, ip_address: &str, bgp_asn: &str) -> String {
        let mut state = self.state();
        let gateway_id = state.allocate_id("cgw");
        state.customer_gateways.push(CustomerGatewayInfo {
            customer_gateway_id: gateway_id.clone(),
            gateway_type: DEFAULT_GATEWAY_TYPE.to_string(),
            ip_address: ip_address.to_string(),
            bgp_asn: bgp_asn.to_string(),
            state: "available".to_string(),
            tags: BTreeMap::from([("Name".to_string(), name.to_string())]),
        });
        gateway_id
    }

    pub fn internet_gateways(&self) -> Vec<InternetGatewayInfo> {
        self.state().internet_gateways.clone()
    }

    /// VPN gateways including deleted ones
    pub fn vpn_gateways(&self) -> Vec<VpnGatewayInfo> {
        self.state().vpn_gateways.clone()
    }

    /// Customer gateways including deleted ones
    pub fn customer_gateways(&self) -> Vec<CustomerGatewayInfo> {
        self.state().customer_gateways.clone()
    }

    /// VPN connections including deleted ones
    pub fn vpn_connections(&self) -> Vec<VpnConnectionInfo> {
        self.state().vpn_connections.clone()
    }

    pub fn launch_configurations(&self) -> Vec<LaunchConfigurationInfo> {
        self.state().launch_configurations.clone()
    }

    /// Create payloads received so far
    pub fn create_requests(&self) -> Vec<CreateLaunchConfiguration> {
        self.state().create_requests.clone()
    }

    pub fn vpcs(&self) -> Vec<VpcInfo> {
        self.state().vpcs.clone()
    }

    pub fn subnets(&self) -> Vec<SubnetInfo> {
        self.state().subnets.clone()
    }

    pub fn security_groups(&self) -> Vec<SecurityGroupInfo> {
        self.state().security_groups.clone()
    }

    fn begin_list(&self) -> Result<MutexGuard<'_, State>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if let Some(failure) = &state.list_failure {
            return Err(failure.to_error(&self.region));
        }
        Ok(state)
    }

    fn begin_mutation(&self) -> Result<MutexGuard<'_, State>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if let Some(failure) = &state.mutation_failure {
            return Err(failure.to_error(&self.region));
        }
        Ok(state)
    }

    fn page<T: Clone>(&self, items: Vec<T>, next_token: Option<String>) -> Result<Page<T>> {
        let start = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| CloudError::api(&self.region, format!("invalid token {}", token)))?,
            None => 0,
        };
        let end = (start + self.page_size).min(items.len());
        let next_token = (end < items.len()).then(|| end.to_string());
        Ok(Page {
            items: items.get(start..end).unwrap_or(&[]).to_vec(),
            next_token,
        })
    }

    fn not_found(&self, id: &str) -> CloudError {
        CloudError::RemoteNotFound {
            region: self.region.clone(),
            id: id.to_string(),
        }
    }

    fn rejected(&self, message: String) -> CloudError {
        CloudError::api(&self.region, message)
    }
}

/// Apply describe filters; every filter must match one of the object's values
fn matches<F>(filters: &[Filter], region: &str, mut attribute: F) -> Result<bool>
where
    F: FnMut(&str) -> Option<Vec<String>>,
{
    for filter in filters {
        let values = attribute(&filter.name).ok_or_else(|| {
            CloudError::api(region, format!("unsupported filter {}", filter.name))
        })?;
        if !values.iter().any(|v| filter.values.contains(v)) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn one(value: &str) -> Option<Vec<String>> {
    Some(vec![value.to_string()])
}

fn tag_filter(tags: &BTreeMap<String, String>, name: &str) -> Option<Vec<String>> {
    name.strip_prefix("tag:")
        .map(|key| tags.get(key).cloned().into_iter().collect())
}

#[async_trait]
impl CloudClient for InMemoryCloud {
    fn region(&self) -> &str {
        &self.region
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.state().auth_failure {
            Some(Failure::Auth(message)) => Ok(AuthStatus::failed(message.clone())),
            Some(failure) => Err(failure.to_error(&self.region)),
            None => Ok(AuthStatus::ok(format!("in-memory ({})", self.region))),
        }
    }

    async fn describe_launch_configurations(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<LaunchConfigurationInfo>> {
        let items = self.begin_list()?.launch_configurations.clone();
        self.page(items, next_token)
    }

    async fn describe_vpcs(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<VpcInfo>> {
        let state = self.begin_list()?;
        let mut items = Vec::new();
        for vpc in &state.vpcs {
            let keep = matches(filters, &self.region, |name| match name {
                "vpc-id" => one(&vpc.vpc_id),
                "cidr" => one(&vpc.cidr_block),
                other => tag_filter(&vpc.tags, other),
            })?;
            if keep {
                items.push(vpc.clone());
            }
        }
        drop(state);
        self.page(items, next_token)
    }

    async fn describe_subnets(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<SubnetInfo>> {
        let state = self.begin_list()?;
        let mut items = Vec::new();
        for subnet in &state.subnets {
            let keep = matches(filters, &self.region, |name| match name {
                "subnet-id" => one(&subnet.subnet_id),
                "vpc-id" => one(&subnet.vpc_id),
                other => tag_filter(&subnet.tags, other),
            })?;
            if keep {
                items.push(subnet.clone());
            }
        }
        drop(state);
        self.page(items, next_token)
    }

    async fn describe_security_groups(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<SecurityGroupInfo>> {
        let state = self.begin_list()?;
        let mut items = Vec::new();
        for group in &state.security_groups {
            let keep = matches(filters, &self.region, |name| match name {
                "group-id" => one(&group.group_id),
                "group-name" => one(&group.group_name),
                "vpc-id" => Some(group.vpc_id.iter().cloned().collect()),
                _ => None,
            })?;
            if keep {
                items.push(group.clone());
            }
        }
        drop(state);
        self.page(items, next_token)
    }

    async fn create_launch_configuration(&self, request: &CreateLaunchConfiguration) -> Result<()> {
        let mut state = self.begin_mutation()?;
        state.create_requests.push(request.clone());

        if state
            .launch_configurations
            .iter()
            .any(|c| c.name == request.name)
        {
            return Err(CloudError::api(
                &self.region,
                format!("AlreadyExists: launch configuration {} already exists", request.name),
            ));
        }
        if let Some(unknown) = request
            .security_group_ids
            .iter()
            .find(|id| !state.security_groups.iter().any(|g| &g.group_id == *id))
        {
            return Err(CloudError::api(
                &self.region,
                format!("InvalidGroup.NotFound: {}", unknown),
            ));
        }

        state.launch_configurations.push(LaunchConfigurationInfo {
            name: request.name.clone(),
            image_id: request.image_id.clone(),
            instance_type: request.instance_type.clone(),
            key_name: request.key_name.clone(),
            security_groups: request.security_group_ids.clone(),
        });
        state
            .user_data
            .insert(request.name.clone(), request.user_data.clone());
        Ok(())
    }

    async fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let before = state.launch_configurations.len();
        state.launch_configurations.retain(|c| c.name != name);
        if state.launch_configurations.len() == before {
            return Err(self.not_found(name));
        }
        state.user_data.remove(name);
        Ok(())
    }

    async fn create_vpc(&self, request: &CreateVpc) -> Result<String> {
        let mut state = self.begin_mutation()?;
        let vpc_id = state.allocate_id("vpc");
        state.vpcs.push(VpcInfo {
            vpc_id: vpc_id.clone(),
            cidr_block: request.cidr_block.clone(),
            instance_tenancy: Some(
                request
                    .instance_tenancy
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
            ),
            tags: BTreeMap::new(),
        });
        Ok(vpc_id)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let attached = |attachments: &Vec<String>| attachments.iter().any(|a| a == vpc_id);
        if state.subnets.iter().any(|s| s.vpc_id == vpc_id)
            || state
                .internet_gateways
                .iter()
                .any(|g| attached(&g.attachments))
            || state
                .vpn_gateways
                .iter()
                .any(|g| !is_deleted_state(&g.state) && attached(&g.attachments))
        {
            return Err(CloudError::api(
                &self.region,
                format!("DependencyViolation: vpc {} has dependencies", vpc_id),
            ));
        }
        let before = state.vpcs.len();
        state.vpcs.retain(|v| v.vpc_id != vpc_id);
        if state.vpcs.len() == before {
            return Err(self.not_found(vpc_id));
        }
        Ok(())
    }

    async fn create_subnet(&self, request: &CreateSubnet) -> Result<String> {
        let mut state = self.begin_mutation()?;
        if !state.vpcs.iter().any(|v| v.vpc_id == request.vpc_id) {
            return Err(CloudError::api(
                &self.region,
                format!("InvalidVpcID.NotFound: {}", request.vpc_id),
            ));
        }
        let subnet_id = state.allocate_id("subnet");
        state.subnets.push(SubnetInfo {
            subnet_id: subnet_id.clone(),
            vpc_id: request.vpc_id.clone(),
            cidr_block: request.cidr_block.clone(),
            availability_zone: request.availability_zone.clone(),
            tags: BTreeMap::new(),
        });
        Ok(subnet_id)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let before = state.subnets.len();
        state.subnets.retain(|s| s.subnet_id != subnet_id);
        if state.subnets.len() == before {
            return Err(self.not_found(subnet_id));
        }
        Ok(())
    }

    async fn describe_internet_gateways(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<InternetGatewayInfo>> {
        let state = self.begin_list()?;
        let mut items = Vec::new();
        for gw in &state.internet_gateways {
            let keep = matches(filters, &self.region, |name| match name {
                "internet-gateway-id" => one(&gw.internet_gateway_id),
                "attachment.vpc-id" => Some(gw.attachments.clone()),
                other => tag_filter(&gw.tags, other),
            })?;
            if keep {
                items.push(gw.clone());
            }
        }
        drop(state);
        self.page(items, next_token)
    }

    async fn create_internet_gateway(&self) -> Result<String> {
        let mut state = self.begin_mutation()?;
        let gateway_id = state.allocate_id("igw");
        state.internet_gateways.push(InternetGatewayInfo {
            internet_gateway_id: gateway_id.clone(),
            attachments: Vec::new(),
            tags: BTreeMap::new(),
        });
        Ok(gateway_id)
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        if !state.vpcs.iter().any(|v| v.vpc_id == vpc_id) {
            return Err(self.rejected(format!("InvalidVpcID.NotFound: {}", vpc_id)));
        }
        let Some(gw) = state
            .internet_gateways
            .iter_mut()
            .find(|g| g.internet_gateway_id == gateway_id)
        else {
            return Err(self.not_found(gateway_id));
        };
        if !gw.attachments.is_empty() {
            return Err(self.rejected(format!(
                "Resource.AlreadyAssociated: {} is already attached",
                gateway_id
            )));
        }
        gw.attachments.push(vpc_id.to_string());
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let Some(gw) = state
            .internet_gateways
            .iter_mut()
            .find(|g| g.internet_gateway_id == gateway_id)
        else {
            return Err(self.not_found(gateway_id));
        };
        if !gw.attachments.iter().any(|a| a == vpc_id) {
            return Err(self.rejected(format!(
                "Gateway.NotAttached: {} is not attached to {}",
                gateway_id, vpc_id
            )));
        }
        gw.attachments.retain(|a| a != vpc_id);
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let Some(index) = state
            .internet_gateways
            .iter()
            .position(|g| g.internet_gateway_id == gateway_id)
        else {
            return Err(self.not_found(gateway_id));
        };
        if !state.internet_gateways[index].attachments.is_empty() {
            return Err(self.rejected(format!(
                "DependencyViolation: {} is still attached",
                gateway_id
            )));
        }
        state.internet_gateways.remove(index);
        Ok(())
    }

    async fn describe_vpn_gateways(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<VpnGatewayInfo>> {
        let state = self.begin_list()?;
        let mut items = Vec::new();
        for gw in &state.vpn_gateways {
            let keep = matches(filters, &self.region, |name| match name {
                "vpn-gateway-id" => one(&gw.vpn_gateway_id),
                "attachment.vpc-id" => Some(gw.attachments.clone()),
                "state" => one(&gw.state),
                "type" => one(&gw.gateway_type),
                other => tag_filter(&gw.tags, other),
            })?;
            if keep {
                items.push(gw.clone());
            }
        }
        drop(state);
        self.page(items, next_token)
    }

    async fn create_vpn_gateway(&self, request: &CreateVpnGateway) -> Result<String> {
        let mut state = self.begin_mutation()?;
        let gateway_id = state.allocate_id("vgw");
        state.vpn_gateways.push(VpnGatewayInfo {
            vpn_gateway_id: gateway_id.clone(),
            gateway_type: request.gateway_type.clone(),
            availability_zone: request.availability_zone.clone(),
            state: "available".to_string(),
            attachments: Vec::new(),
            tags: BTreeMap::new(),
        });
        Ok(gateway_id)
    }

    async fn attach_vpn_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        if !state.vpcs.iter().any(|v| v.vpc_id == vpc_id) {
            return Err(self.rejected(format!("InvalidVpcID.NotFound: {}", vpc_id)));
        }
        let Some(gw) = state.live_vpn_gateway(gateway_id) else {
            return Err(self.not_found(gateway_id));
        };
        if !gw.attachments.is_empty() {
            return Err(self.rejected(format!(
                "VpnGatewayAttachmentLimitExceeded: {} is already attached",
                gateway_id
            )));
        }
        gw.attachments.push(vpc_id.to_string());
        Ok(())
    }

    async fn detach_vpn_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let Some(gw) = state.live_vpn_gateway(gateway_id) else {
            return Err(self.not_found(gateway_id));
        };
        if !gw.attachments.iter().any(|a| a == vpc_id) {
            return Err(self.rejected(format!(
                "InvalidVpnGatewayAttachment.NotFound: {} is not attached to {}",
                gateway_id, vpc_id
            )));
        }
        gw.attachments.retain(|a| a != vpc_id);
        Ok(())
    }

    async fn delete_vpn_gateway(&self, gateway_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let in_use = state.connection_uses(gateway_id);
        let Some(gw) = state.live_vpn_gateway(gateway_id) else {
            return Err(self.not_found(gateway_id));
        };
        if !gw.attachments.is_empty() || in_use {
            return Err(self.rejected(format!(
                "IncorrectState: {} is attached or in use",
                gateway_id
            )));
        }
        gw.state = "deleted".to_string();
        Ok(())
    }

    async fn describe_customer_gateways(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<CustomerGatewayInfo>> {
        let state = self.begin_list()?;
        let mut items = Vec::new();
        for gw in &state.customer_gateways {
            let keep = matches(filters, &self.region, |name| match name {
                "customer-gateway-id" => one(&gw.customer_gateway_id),
                "ip-address" => one(&gw.ip_address),
                "bgp-asn" => one(&gw.bgp_asn),
                "state" => one(&gw.state),
                other => tag_filter(&gw.tags, other),
            })?;
            if keep {
                items.push(gw.clone());
            }
        }
        drop(state);
        self.page(items, next_token)
    }

    async fn create_customer_gateway(&self, request: &CreateCustomerGateway) -> Result<String> {
        let mut state = self.begin_mutation()?;
        let gateway_id = state.allocate_id("cgw");
        state.customer_gateways.push(CustomerGatewayInfo {
            customer_gateway_id: gateway_id.clone(),
            gateway_type: request.gateway_type.clone(),
            ip_address: request.ip_address.clone(),
            bgp_asn: request.bgp_asn.to_string(),
            state: "available".to_string(),
            tags: BTreeMap::new(),
        });
        Ok(gateway_id)
    }

    async fn delete_customer_gateway(&self, gateway_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let in_use = state.connection_uses(gateway_id);
        let Some(gw) = state.live_customer_gateway(gateway_id) else {
            return Err(self.not_found(gateway_id));
        };
        if in_use {
            return Err(self.rejected(format!(
                "IncorrectState: {} is in use by a VPN connection",
                gateway_id
            )));
        }
        gw.state = "deleted".to_string();
        Ok(())
    }

    async fn describe_vpn_connections(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<VpnConnectionInfo>> {
        let state = self.begin_list()?;
        let mut items = Vec::new();
        for conn in &state.vpn_connections {
            let keep = matches(filters, &self.region, |name| match name {
                "vpn-connection-id" => one(&conn.vpn_connection_id),
                "vpn-gateway-id" => Some(conn.vpn_gateway_id.iter().cloned().collect()),
                "customer-gateway-id" => Some(conn.customer_gateway_id.iter().cloned().collect()),
                "state" => one(&conn.state),
                other => tag_filter(&conn.tags, other),
            })?;
            if keep {
                items.push(conn.clone());
            }
        }
        drop(state);
        self.page(items, next_token)
    }

    async fn create_vpn_connection(&self, request: &CreateVpnConnection) -> Result<String> {
        let mut state = self.begin_mutation()?;
        if state.live_vpn_gateway(&request.vpn_gateway_id).is_none() {
            return Err(self.rejected(format!(
                "InvalidVpnGatewayID.NotFound: {}",
                request.vpn_gateway_id
            )));
        }
        if state
            .live_customer_gateway(&request.customer_gateway_id)
            .is_none()
        {
            return Err(self.rejected(format!(
                "InvalidCustomerGatewayID.NotFound: {}",
                request.customer_gateway_id
            )));
        }
        let connection_id = state.allocate_id("vpn");
        state.vpn_connections.push(VpnConnectionInfo {
            vpn_connection_id: connection_id.clone(),
            connection_type: request.connection_type.clone(),
            vpn_gateway_id: Some(request.vpn_gateway_id.clone()),
            customer_gateway_id: Some(request.customer_gateway_id.clone()),
            routes: Vec::new(),
            static_routes_only: request.static_routes_only,
            state: "available".to_string(),
            tags: BTreeMap::new(),
        });
        Ok(connection_id)
    }

    async fn create_vpn_connection_route(
        &self,
        connection_id: &str,
        destination_cidr_block: &str,
    ) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let Some(conn) = state.live_vpn_connection(connection_id) else {
            return Err(self.not_found(connection_id));
        };
        if !conn.static_routes_only {
            return Err(self.rejected(format!(
                "InvalidVpnConnection.InvalidType: {} does not use static routes",
                connection_id
            )));
        }
        if !conn.routes.iter().any(|r| r == destination_cidr_block) {
            conn.routes.push(destination_cidr_block.to_string());
        }
        Ok(())
    }

    async fn delete_vpn_connection(&self, connection_id: &str) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let Some(conn) = state.live_vpn_connection(connection_id) else {
            return Err(self.not_found(connection_id));
        };
        conn.state = "deleted".to_string();
        Ok(())
    }

    async fn create_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let Some(existing) = state.tags_mut(resource_id) else {
            return Err(self.not_found(resource_id));
        };
        existing.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete_tags(&self, resource_id: &str, keys: &[String]) -> Result<()> {
        let mut state = self.begin_mutation()?;
        let Some(existing) = state.tags_mut(resource_id) else {
            return Err(self.not_found(resource_id));
        };
        for key in keys {
            existing.remove(key);
        }
        Ok(())
    }
}
