//! Per-kind field schema with read-only markers
//!
//! Every kind publishes the fields it manages and how each may change.
//! The planner diffs declared against live attributes through this table,
//! so an attempt to change a read-only field surfaces as a [`Drift`] entry
//! rather than as a failed remote call.

use crate::model::{is_reserved_tag, Attributes, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// How a field may change after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    /// Set at creation only; a different desired value needs destroy+recreate
    ReadOnly,
    /// Changed in place by a separate mutator call
    Updatable,
    /// Sent on create but never reported back by discovery
    WriteOnly,
}

/// How declared and live values are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Exact,
    /// List compared as a set
    Unordered,
    /// String map compared key by key
    Map,
    /// Boolean that may be written as a string
    Flag,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub mutability: Mutability,
    pub comparison: Comparison,
}

const fn field(name: &'static str, mutability: Mutability, comparison: Comparison) -> FieldSpec {
    FieldSpec {
        name,
        mutability,
        comparison,
    }
}

const LAUNCH_CONFIGURATION_FIELDS: &[FieldSpec] = &[
    field("image_id", Mutability::ReadOnly, Comparison::Exact),
    field("instance_type", Mutability::ReadOnly, Comparison::Exact),
    field("key_name", Mutability::ReadOnly, Comparison::Exact),
    field("security_groups", Mutability::ReadOnly, Comparison::Unordered),
    field("user_data", Mutability::WriteOnly, Comparison::Exact),
    field("vpc", Mutability::WriteOnly, Comparison::Exact),
];

const VPC_FIELDS: &[FieldSpec] = &[
    field("cidr_block", Mutability::ReadOnly, Comparison::Exact),
    field("instance_tenancy", Mutability::ReadOnly, Comparison::Exact),
    field("tags", Mutability::Updatable, Comparison::Map),
];

const SUBNET_FIELDS: &[FieldSpec] = &[
    field("vpc", Mutability::ReadOnly, Comparison::Exact),
    field("cidr_block", Mutability::ReadOnly, Comparison::Exact),
    field("availability_zone", Mutability::ReadOnly, Comparison::Exact),
    field("tags", Mutability::Updatable, Comparison::Map),
];

const INTERNET_GATEWAY_FIELDS: &[FieldSpec] = &[
    field("vpc", Mutability::ReadOnly, Comparison::Exact),
    field("tags", Mutability::Updatable, Comparison::Map),
];

const CUSTOMER_GATEWAY_FIELDS: &[FieldSpec] = &[
    field("type", Mutability::ReadOnly, Comparison::Exact),
    field("ip_address", Mutability::ReadOnly, Comparison::Exact),
    field("bgp_asn", Mutability::ReadOnly, Comparison::Exact),
    field("tags", Mutability::Updatable, Comparison::Map),
];

const VPN_GATEWAY_FIELDS: &[FieldSpec] = &[
    field("vpc", Mutability::ReadOnly, Comparison::Exact),
    field("type", Mutability::ReadOnly, Comparison::Exact),
    field("availability_zone", Mutability::ReadOnly, Comparison::Exact),
    field("tags", Mutability::Updatable, Comparison::Map),
];

const VPN_FIELDS: &[FieldSpec] = &[
    field("vpn_gateway", Mutability::ReadOnly, Comparison::Exact),
    field("customer_gateway", Mutability::ReadOnly, Comparison::Exact),
    field("type", Mutability::ReadOnly, Comparison::Exact),
    field("static_routes", Mutability::ReadOnly, Comparison::Flag),
    field("routes", Mutability::ReadOnly, Comparison::Unordered),
    field("tags", Mutability::Updatable, Comparison::Map),
];

/// Fields managed for a kind
pub fn fields(kind: ResourceKind) -> &'static [FieldSpec] {
    match kind {
        ResourceKind::LaunchConfiguration => LAUNCH_CONFIGURATION_FIELDS,
        ResourceKind::Vpc => VPC_FIELDS,
        ResourceKind::Subnet => SUBNET_FIELDS,
        ResourceKind::InternetGateway => INTERNET_GATEWAY_FIELDS,
        ResourceKind::CustomerGateway => CUSTOMER_GATEWAY_FIELDS,
        ResourceKind::VpnGateway => VPN_GATEWAY_FIELDS,
        ResourceKind::Vpn => VPN_FIELDS,
    }
}

pub fn field_spec(kind: ResourceKind, name: &str) -> Option<&'static FieldSpec> {
    fields(kind).iter().find(|f| f.name == name)
}

/// Fields a create call cannot do without
pub fn required_fields(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::LaunchConfiguration => &["image_id", "instance_type"],
        ResourceKind::Vpc => &["cidr_block"],
        ResourceKind::Subnet => &["vpc", "cidr_block"],
        ResourceKind::InternetGateway | ResourceKind::VpnGateway => &[],
        ResourceKind::CustomerGateway => &["ip_address", "bgp_asn"],
        ResourceKind::Vpn => &["vpn_gateway", "customer_gateway"],
    }
}

/// One field whose desired value differs from the live value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drift {
    pub field: String,
    pub mutability: Mutability,
    pub desired: Value,
    pub actual: Option<Value>,
}

impl Drift {
    pub fn is_read_only(&self) -> bool {
        self.mutability == Mutability::ReadOnly
    }
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let actual = self
            .actual
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(unset)".to_string());
        write!(f, "{}: {} => {}", self.field, actual, self.desired)?;
        if self.is_read_only() {
            write!(f, " (read-only)")?;
        }
        Ok(())
    }
}

/// Compare declared attributes against a live record's attributes
///
/// Only fields the declaration sets are compared; unset fields are left
/// unmanaged. Write-only fields are never compared.
pub fn diff(kind: ResourceKind, declared: &Attributes, live: &Attributes) -> Vec<Drift> {
    let mut drift = Vec::new();

    for spec in fields(kind) {
        if spec.mutability == Mutability::WriteOnly {
            continue;
        }
        let Some(desired) = declared.get(spec.name).and_then(|v| normalize(spec, v)) else {
            continue;
        };
        let actual = live.get(spec.name).and_then(|v| normalize(spec, v));

        let differs = match (&actual, spec.comparison) {
            (None, Comparison::Map) => desired.as_object().is_some_and(|m| !m.is_empty()),
            (None, Comparison::Unordered) => desired.as_array().is_some_and(|a| !a.is_empty()),
            (None, Comparison::Exact | Comparison::Flag) => true,
            (Some(actual), _) => *actual != desired,
        };

        if differs {
            drift.push(Drift {
                field: spec.name.to_string(),
                mutability: spec.mutability,
                desired,
                actual,
            });
        }
    }

    drift
}

/// Canonical form of a field value; `None` means "unset"
fn normalize(spec: &FieldSpec, value: &Value) -> Option<Value> {
    match spec.comparison {
        Comparison::Exact => match value {
            Value::String(s) if !s.is_empty() => Some(Value::String(s.clone())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(true) => Some(Value::String("true".to_string())),
            _ => None,
        },
        Comparison::Unordered => {
            let items: BTreeSet<String> = match value {
                Value::Array(items) => items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                Value::String(s) if !s.is_empty() => BTreeSet::from([s.clone()]),
                _ => return None,
            };
            Some(Value::Array(items.into_iter().map(Value::String).collect()))
        }
        Comparison::Flag => match value {
            Value::Bool(b) => Some(Value::String(b.to_string())),
            Value::String(s) if s.eq_ignore_ascii_case("true") => {
                Some(Value::String("true".to_string()))
            }
            Value::String(s) if s.eq_ignore_ascii_case("false") => {
                Some(Value::String("false".to_string()))
            }
            _ => None,
        },
        Comparison::Map => {
            let Value::Object(map) = value else {
                return None;
            };
            let normalized: BTreeMap<String, Value> = map
                .iter()
                .filter(|(k, _)| !is_reserved_tag(k))
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), Value::String(v))
                })
                .collect();
            Some(Value::Object(normalized.into_iter().collect()))
        }
    }
}
