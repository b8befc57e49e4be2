//! Name resolution for references
//!
//! Turns human-readable security group, VPC and gateway names into provider
//! identifiers (for create calls), and identifiers back into names (for
//! discovery). Every lookup that expects one match treats several matches
//! as an [`CloudError::Ambiguous`] error instead of picking one.

use crate::client::{is_deleted_state, paginate, CloudClient, Filter};
use crate::error::{CloudError, Result};
use std::collections::{BTreeMap, HashSet};

/// Maximum number of values the remote API accepts in one filter
const FILTER_VALUE_LIMIT: usize = 200;

/// Deduplicate names preserving first occurrence and drop empty entries
pub fn normalize_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.as_ref().trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_string()))
        .map(str::to_string)
        .collect()
}

fn exactly_one(
    what: &'static str,
    name: &str,
    region: &str,
    mut ids: Vec<String>,
) -> Result<String> {
    ids.sort();
    ids.dedup();

    match ids.len() {
        0 => Err(CloudError::NotFound {
            what,
            name: name.to_string(),
            region: region.to_string(),
        }),
        1 => Ok(ids.remove(0)),
        _ => Err(CloudError::Ambiguous {
            what,
            name: name.to_string(),
            region: region.to_string(),
            candidates: ids,
        }),
    }
}

/// Resolve a VPC name (its `Name` tag) to exactly one VPC identifier
pub async fn resolve_vpc_id(client: &dyn CloudClient, vpc_name: &str) -> Result<String> {
    let filters = [Filter::tag_name([vpc_name])];
    let vpcs = paginate(|token| client.describe_vpcs(&filters, token)).await?;
    let ids = vpcs.into_iter().map(|v| v.vpc_id).collect();
    exactly_one("VPC", vpc_name, client.region(), ids)
}

/// Resolve a VPN gateway name to one gateway that is not deleted
pub async fn resolve_vpn_gateway_id(client: &dyn CloudClient, name: &str) -> Result<String> {
    let filters = [Filter::tag_name([name])];
    let gateways = paginate(|token| client.describe_vpn_gateways(&filters, token)).await?;
    let ids = gateways
        .into_iter()
        .filter(|g| !is_deleted_state(&g.state))
        .map(|g| g.vpn_gateway_id)
        .collect();
    exactly_one("VPN gateway", name, client.region(), ids)
}

/// Resolve a customer gateway name to one gateway that is not deleted
pub async fn resolve_customer_gateway_id(client: &dyn CloudClient, name: &str) -> Result<String> {
    let filters = [Filter::tag_name([name])];
    let gateways = paginate(|token| client.describe_customer_gateways(&filters, token)).await?;
    let ids = gateways
        .into_iter()
        .filter(|g| !is_deleted_state(&g.state))
        .map(|g| g.customer_gateway_id)
        .collect();
    exactly_one("customer gateway", name, client.region(), ids)
}

/// Resolve security group names to group identifiers, optionally scoped by VPC
///
/// An empty name list resolves to no identifiers without any remote call.
/// Identifiers come back in the order the names were given.
pub async fn resolve_group_ids<S: AsRef<str>>(
    client: &dyn CloudClient,
    names: &[S],
    vpc_name: Option<&str>,
) -> Result<Vec<String>> {
    let names = normalize_names(names);
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let vpc_id = match vpc_name {
        Some(vpc_name) => Some(resolve_vpc_id(client, vpc_name).await?),
        None => None,
    };

    let mut groups = Vec::new();
    for chunk in names.chunks(FILTER_VALUE_LIMIT) {
        let mut filters = vec![Filter::new("group-name", chunk.iter().cloned())];
        if let Some(vpc_id) = &vpc_id {
            filters.push(Filter::new("vpc-id", [vpc_id.clone()]));
        }
        groups.extend(paginate(|token| client.describe_security_groups(&filters, token)).await?);
    }

    let mut by_name: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for group in &groups {
        let ids = by_name.entry(group.group_name.as_str()).or_default();
        if !ids.contains(&group.group_id.as_str()) {
            ids.push(group.group_id.as_str());
        }
    }

    let mut resolved = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in &names {
        match by_name.get(name.as_str()).map(Vec::as_slice) {
            None | Some([]) => missing.push(name.clone()),
            Some([id]) => resolved.push(id.to_string()),
            Some(ids) => {
                return Err(CloudError::Ambiguous {
                    what: "security group",
                    name: name.clone(),
                    region: client.region().to_string(),
                    candidates: ids.iter().map(|id| id.to_string()).collect(),
                });
            }
        }
    }

    if !missing.is_empty() {
        return Err(CloudError::UnresolvedGroups {
            region: client.region().to_string(),
            missing,
        });
    }

    tracing::debug!(
        "Resolved security groups {:?} to {:?} in region {}",
        names,
        resolved,
        client.region()
    );
    Ok(resolved)
}

/// Map security group identifiers to group names
///
/// Identifiers the remote API no longer knows are absent from the result.
pub async fn group_names_by_id(
    client: &dyn CloudClient,
    ids: &[String],
) -> Result<BTreeMap<String, String>> {
    let ids = normalize_names(ids);
    let mut names = BTreeMap::new();

    for chunk in ids.chunks(FILTER_VALUE_LIMIT) {
        let filters = [Filter::new("group-id", chunk.iter().cloned())];
        let groups = paginate(|token| client.describe_security_groups(&filters, token)).await?;
        names.extend(groups.into_iter().map(|g| (g.group_id, g.group_name)));
    }

    Ok(names)
}

/// Map VPC identifiers to VPC names; unnamed VPCs are absent from the result
pub async fn vpc_names_by_id(
    client: &dyn CloudClient,
    ids: &[String],
) -> Result<BTreeMap<String, String>> {
    let ids = normalize_names(ids);
    let mut names = BTreeMap::new();

    for chunk in ids.chunks(FILTER_VALUE_LIMIT) {
        let filters = [Filter::new("vpc-id", chunk.iter().cloned())];
        let vpcs = paginate(|token| client.describe_vpcs(&filters, token)).await?;
        for vpc in vpcs {
            if let Some(name) = vpc.name() {
                names.insert(vpc.vpc_id.clone(), name.to_string());
            }
        }
    }

    Ok(names)
}

/// Map VPN gateway identifiers to gateway names
pub async fn vpn_gateway_names_by_id(
    client: &dyn CloudClient,
    ids: &[String],
) -> Result<BTreeMap<String, String>> {
    let ids = normalize_names(ids);
    let mut names = BTreeMap::new();

    for chunk in ids.chunks(FILTER_VALUE_LIMIT) {
        let filters = [Filter::new("vpn-gateway-id", chunk.iter().cloned())];
        let gateways = paginate(|token| client.describe_vpn_gateways(&filters, token)).await?;
        for gateway in gateways {
            if let Some(name) = gateway.name() {
                names.insert(gateway.vpn_gateway_id.clone(), name.to_string());
            }
        }
    }

    Ok(names)
}

/// Map customer gateway identifiers to gateway names
pub async fn customer_gateway_names_by_id(
    client: &dyn CloudClient,
    ids: &[String],
) -> Result<BTreeMap<String, String>> {
    let ids = normalize_names(ids);
    let mut names = BTreeMap::new();

    for chunk in ids.chunks(FILTER_VALUE_LIMIT) {
        let filters = [Filter::new("customer-gateway-id", chunk.iter().cloned())];
        let gateways = paginate(|token| client.describe_customer_gateways(&filters, token)).await?;
        for gateway in gateways {
            if let Some(name) = gateway.name() {
                names.insert(gateway.customer_gateway_id.clone(), name.to_string());
            }
        }
    }

    Ok(names)
}
