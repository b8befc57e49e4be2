//! Live state discovery across regions
//!
//! Each `(kind, region)` scan is a side-effect-free read, so scans fan out
//! with bounded concurrency. A failing region is reported and contributes
//! nothing to the inventory; only authentication failures abort discovery.

use crate::client::{
    is_deleted_state, paginate, CloudClient, CustomerGatewayInfo, InternetGatewayInfo,
    LaunchConfigurationInfo, RegionClients, SubnetInfo, VpcInfo, VpnConnectionInfo,
    VpnGatewayInfo,
};
use crate::error::Result;
use crate::inventory::Inventory;
use crate::model::{is_reserved_tag, LiveRecord, ResourceKind};
use crate::resolver;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A region whose scan failed for one kind
///
/// `kind` is `None` when the region's credential check failed and no kind
/// was scanned there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionFailure {
    pub region: String,
    pub kind: Option<ResourceKind>,
    pub error: String,
}

impl RegionFailure {
    pub fn credential_check(region: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            region: region.into(),
            kind: None,
            error: error.to_string(),
        }
    }
}

impl std::fmt::Display for RegionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Some(kind) => write!(
                f,
                "{} discovery failed in region {}: {}",
                kind.label(),
                self.region,
                self.error
            ),
            None => write!(
                f,
                "credential check failed in region {}: {}",
                self.region, self.error
            ),
        }
    }
}

/// Records and per-region failures from one discovery pass
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Sorted by (kind, region, name)
    pub records: Vec<LiveRecord>,
    pub failures: Vec<RegionFailure>,
}

impl Discovery {
    pub fn into_inventory(self) -> (Inventory, Vec<RegionFailure>) {
        (Inventory::from_records(self.records), self.failures)
    }

    pub fn failed_regions(&self) -> BTreeSet<&str> {
        self.failures.iter().map(|f| f.region.as_str()).collect()
    }
}

/// Discover every live instance of `kind` in all configured regions
pub async fn discover(
    kind: ResourceKind,
    clients: &RegionClients,
    concurrency: usize,
) -> Result<Discovery> {
    discover_kinds(&[kind], clients, concurrency).await
}

/// Discover several kinds, scanning every `(kind, region)` pair concurrently
pub async fn discover_kinds(
    kinds: &[ResourceKind],
    clients: &RegionClients,
    concurrency: usize,
) -> Result<Discovery> {
    let scans: Vec<(ResourceKind, Arc<dyn CloudClient>)> = kinds
        .iter()
        .flat_map(|kind| clients.iter().map(move |client| (*kind, Arc::clone(client))))
        .collect();

    let results: Vec<_> = stream::iter(scans)
        .map(|(kind, client)| async move {
            let region = client.region().to_string();
            tracing::debug!("Listing {} resources in region {}", kind, region);
            let result = discover_region(kind, client.as_ref()).await;
            (kind, region, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut discovery = Discovery::default();
    for (kind, region, result) in results {
        match result {
            Ok(records) => {
                tracing::debug!(
                    "Found {} {} resources in region {}",
                    records.len(),
                    kind,
                    region
                );
                discovery.records.extend(records);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "{} discovery failed in region {}, treating it as empty: {}",
                    kind.label(),
                    region,
                    e
                );
                discovery.failures.push(RegionFailure {
                    region,
                    kind: Some(kind),
                    error: e.to_string(),
                });
            }
        }
    }

    discovery.records.sort_by_key(LiveRecord::key);
    discovery
        .failures
        .sort_by(|a, b| (a.kind, &a.region).cmp(&(b.kind, &b.region)));
    Ok(discovery)
}

/// List and normalize one kind in one region
pub async fn discover_region(kind: ResourceKind, client: &dyn CloudClient) -> Result<Vec<LiveRecord>> {
    let region = client.region();

    match kind {
        ResourceKind::LaunchConfiguration => {
            let configs = paginate(|token| client.describe_launch_configurations(token)).await?;
            let group_ids: Vec<String> = configs
                .iter()
                .flat_map(|c| c.security_groups.iter().cloned())
                .collect();
            let group_names = resolver::group_names_by_id(client, &group_ids).await?;

            Ok(configs
                .iter()
                .map(|config| launch_configuration_record(region, config, &group_names))
                .collect())
        }
        ResourceKind::Vpc => {
            let vpcs = paginate(|token| client.describe_vpcs(&[], token)).await?;
            Ok(vpcs
                .iter()
                .filter_map(|vpc| vpc_record(region, vpc))
                .collect())
        }
        ResourceKind::Subnet => {
            let subnets = paginate(|token| client.describe_subnets(&[], token)).await?;
            let vpc_ids: Vec<String> = subnets.iter().map(|s| s.vpc_id.clone()).collect();
            let vpc_names = resolver::vpc_names_by_id(client, &vpc_ids).await?;

            Ok(subnets
                .iter()
                .filter_map(|subnet| subnet_record(region, subnet, &vpc_names))
                .collect())
        }
        ResourceKind::InternetGateway => {
            let gateways = paginate(|token| client.describe_internet_gateways(&[], token)).await?;
            let vpc_ids: Vec<String> = gateways
                .iter()
                .flat_map(|g| g.attachments.iter().cloned())
                .collect();
            let vpc_names = resolver::vpc_names_by_id(client, &vpc_ids).await?;

            Ok(gateways
                .iter()
                .filter_map(|gw| internet_gateway_record(region, gw, &vpc_names))
                .collect())
        }
        ResourceKind::VpnGateway => {
            let gateways = paginate(|token| client.describe_vpn_gateways(&[], token)).await?;
            let gateways: Vec<VpnGatewayInfo> = gateways
                .into_iter()
                .filter(|g| !is_deleted_state(&g.state))
                .collect();
            let vpc_ids: Vec<String> = gateways
                .iter()
                .flat_map(|g| g.attachments.iter().cloned())
                .collect();
            let vpc_names = resolver::vpc_names_by_id(client, &vpc_ids).await?;

            Ok(gateways
                .iter()
                .filter_map(|gw| vpn_gateway_record(region, gw, &vpc_names))
                .collect())
        }
        ResourceKind::CustomerGateway => {
            let gateways = paginate(|token| client.describe_customer_gateways(&[], token)).await?;
            Ok(gateways
                .iter()
                .filter(|g| !is_deleted_state(&g.state))
                .filter_map(|gw| customer_gateway_record(region, gw))
                .collect())
        }
        ResourceKind::Vpn => {
            let connections = paginate(|token| client.describe_vpn_connections(&[], token)).await?;
            let connections: Vec<VpnConnectionInfo> = connections
                .into_iter()
                .filter(|c| !is_deleted_state(&c.state))
                .collect();
            let vgw_ids: Vec<String> = connections
                .iter()
                .filter_map(|c| c.vpn_gateway_id.clone())
                .collect();
            let cgw_ids: Vec<String> = connections
                .iter()
                .filter_map(|c| c.customer_gateway_id.clone())
                .collect();
            let gateway_names = GatewayNames {
                vpn: resolver::vpn_gateway_names_by_id(client, &vgw_ids).await?,
                customer: resolver::customer_gateway_names_by_id(client, &cgw_ids).await?,
            };

            Ok(connections
                .iter()
                .filter_map(|conn| vpn_record(region, conn, &gateway_names))
                .collect())
        }
    }
}

/// Gateway identifier to name maps used to expose VPN references by name
#[derive(Debug, Default)]
pub struct GatewayNames {
    pub vpn: BTreeMap<String, String>,
    pub customer: BTreeMap<String, String>,
}

fn name_tag<'a>(
    kind: ResourceKind,
    id: &str,
    tags: &'a BTreeMap<String, String>,
    region: &str,
) -> Option<&'a str> {
    let name = tags.get("Name").map(String::as_str);
    if name.is_none() {
        tracing::debug!("Skipping unnamed {} {} in region {}", kind.label(), id, region);
    }
    name
}

/// Normalize a launch configuration; security groups are exposed by name
pub fn launch_configuration_record(
    region: &str,
    config: &LaunchConfigurationInfo,
    group_names: &BTreeMap<String, String>,
) -> LiveRecord {
    let groups: Vec<&str> = config
        .security_groups
        .iter()
        .map(|id| group_names.get(id).unwrap_or(id).as_str())
        .collect();

    let mut record = LiveRecord::new(ResourceKind::LaunchConfiguration, &config.name, region)
        .with_attribute("image_id", json!(config.image_id))
        .with_attribute("instance_type", json!(config.instance_type))
        .with_attribute("security_groups", json!(groups));

    if let Some(key_name) = config.key_name.as_deref().filter(|k| !k.is_empty()) {
        record = record.with_attribute("key_name", json!(key_name));
    }
    record
}

/// Normalize a VPC; VPCs without a `Name` tag cannot be matched and are skipped
pub fn vpc_record(region: &str, vpc: &VpcInfo) -> Option<LiveRecord> {
    let Some(name) = vpc.name() else {
        tracing::debug!("Skipping unnamed VPC {} in region {}", vpc.vpc_id, region);
        return None;
    };

    Some(
        LiveRecord::new(ResourceKind::Vpc, name, region)
            .with_id(&vpc.vpc_id)
            .with_attribute("cidr_block", json!(vpc.cidr_block))
            .with_attribute(
                "instance_tenancy",
                json!(vpc.instance_tenancy.as_deref().unwrap_or("default")),
            )
            .with_attribute("tags", json!(user_tags(&vpc.tags))),
    )
}

/// Normalize a subnet; its VPC is exposed by name
pub fn subnet_record(
    region: &str,
    subnet: &SubnetInfo,
    vpc_names: &BTreeMap<String, String>,
) -> Option<LiveRecord> {
    let Some(name) = subnet.name() else {
        tracing::debug!(
            "Skipping unnamed subnet {} in region {}",
            subnet.subnet_id,
            region
        );
        return None;
    };

    let vpc = vpc_names.get(&subnet.vpc_id).unwrap_or(&subnet.vpc_id);
    let mut record = LiveRecord::new(ResourceKind::Subnet, name, region)
        .with_id(&subnet.subnet_id)
        .with_attribute("vpc", json!(vpc))
        .with_attribute("cidr_block", json!(subnet.cidr_block))
        .with_attribute("tags", json!(user_tags(&subnet.tags)));

    if let Some(az) = &subnet.availability_zone {
        record = record.with_attribute("availability_zone", json!(az));
    }
    Some(record)
}

/// Normalize an internet gateway; its attached VPC is exposed by name
pub fn internet_gateway_record(
    region: &str,
    gateway: &InternetGatewayInfo,
    vpc_names: &BTreeMap<String, String>,
) -> Option<LiveRecord> {
    let kind = ResourceKind::InternetGateway;
    let name = name_tag(kind, &gateway.internet_gateway_id, &gateway.tags, region)?;

    let mut record = LiveRecord::new(kind, name, region)
        .with_id(&gateway.internet_gateway_id)
        .with_attribute("tags", json!(user_tags(&gateway.tags)));
    if let Some(vpc_id) = gateway.attachments.first() {
        let vpc = vpc_names.get(vpc_id).unwrap_or(vpc_id);
        record = record.with_attribute("vpc", json!(vpc));
    }
    Some(record)
}

pub fn vpn_gateway_record(
    region: &str,
    gateway: &VpnGatewayInfo,
    vpc_names: &BTreeMap<String, String>,
) -> Option<LiveRecord> {
    let kind = ResourceKind::VpnGateway;
    let name = name_tag(kind, &gateway.vpn_gateway_id, &gateway.tags, region)?;

    let mut record = LiveRecord::new(kind, name, region)
        .with_id(&gateway.vpn_gateway_id)
        .with_attribute("type", json!(gateway.gateway_type))
        .with_attribute("tags", json!(user_tags(&gateway.tags)));
    if let Some(vpc_id) = gateway.attachments.first() {
        let vpc = vpc_names.get(vpc_id).unwrap_or(vpc_id);
        record = record.with_attribute("vpc", json!(vpc));
    }
    if let Some(az) = &gateway.availability_zone {
        record = record.with_attribute("availability_zone", json!(az));
    }
    Some(record)
}

pub fn customer_gateway_record(region: &str, gateway: &CustomerGatewayInfo) -> Option<LiveRecord> {
    let kind = ResourceKind::CustomerGateway;
    let name = name_tag(kind, &gateway.customer_gateway_id, &gateway.tags, region)?;

    Some(
        LiveRecord::new(kind, name, region)
            .with_id(&gateway.customer_gateway_id)
            .with_attribute("type", json!(gateway.gateway_type))
            .with_attribute("ip_address", json!(gateway.ip_address))
            .with_attribute("bgp_asn", json!(gateway.bgp_asn))
            .with_attribute("tags", json!(user_tags(&gateway.tags))),
    )
}

/// Normalize a VPN connection; both gateways are exposed by name
pub fn vpn_record(
    region: &str,
    connection: &VpnConnectionInfo,
    gateway_names: &GatewayNames,
) -> Option<LiveRecord> {
    let kind = ResourceKind::Vpn;
    let name = name_tag(kind, &connection.vpn_connection_id, &connection.tags, region)?;

    let mut routes = connection.routes.clone();
    routes.sort();
    let mut record = LiveRecord::new(kind, name, region)
        .with_id(&connection.vpn_connection_id)
        .with_attribute("type", json!(connection.connection_type))
        .with_attribute("static_routes", json!(connection.static_routes_only))
        .with_attribute("routes", json!(routes))
        .with_attribute("tags", json!(user_tags(&connection.tags)));

    if let Some(id) = &connection.vpn_gateway_id {
        let gateway = gateway_names.vpn.get(id).unwrap_or(id);
        record = record.with_attribute("vpn_gateway", json!(gateway));
    }
    if let Some(id) = &connection.customer_gateway_id {
        let gateway = gateway_names.customer.get(id).unwrap_or(id);
        record = record.with_attribute("customer_gateway", json!(gateway));
    }
    Some(record)
}

/// Tags the user manages: `Name` is the resource key and `aws:` tags are reserved
pub fn user_tags(tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    tags.iter()
        .filter(|(k, _)| !is_reserved_tag(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
