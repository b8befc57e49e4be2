//! Declared and live resource records

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind-specific attribute set
///
/// Values stay in their declared JSON shape; the kind schema decides how
/// each field is compared and encoded.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Tag keys the reconciler owns or the provider reserves
///
/// `Name` carries the resource key and `aws:` tags are read-only on the
/// remote side, so neither is ever part of a resource's user tags.
pub fn is_reserved_tag(key: &str) -> bool {
    key == "Name" || key.starts_with("aws:")
}

/// Desired or observed lifecycle of a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

impl std::fmt::Display for Ensure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ensure::Present => write!(f, "present"),
            Ensure::Absent => write!(f, "absent"),
        }
    }
}

/// Resource kinds the reconciler knows how to discover and mutate
///
/// Declaration order is dependency order: a kind may reference kinds
/// declared before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    InternetGateway,
    CustomerGateway,
    VpnGateway,
    Vpn,
    LaunchConfiguration,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Vpc,
        ResourceKind::Subnet,
        ResourceKind::InternetGateway,
        ResourceKind::CustomerGateway,
        ResourceKind::VpnGateway,
        ResourceKind::Vpn,
        ResourceKind::LaunchConfiguration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::LaunchConfiguration => "launch_configuration",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::CustomerGateway => "customer_gateway",
            ResourceKind::VpnGateway => "vpn_gateway",
            ResourceKind::Vpn => "vpn",
        }
    }

    /// Human-readable label used in operator notices
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::LaunchConfiguration => "launch configuration",
            ResourceKind::Vpc => "VPC",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet gateway",
            ResourceKind::CustomerGateway => "customer gateway",
            ResourceKind::VpnGateway => "VPN gateway",
            ResourceKind::Vpn => "VPN",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "launch_configuration" | "launch-configuration" => Ok(ResourceKind::LaunchConfiguration),
            "vpc" => Ok(ResourceKind::Vpc),
            "subnet" => Ok(ResourceKind::Subnet),
            "internet_gateway" | "internet-gateway" => Ok(ResourceKind::InternetGateway),
            "customer_gateway" | "customer-gateway" => Ok(ResourceKind::CustomerGateway),
            "vpn_gateway" | "vpn-gateway" => Ok(ResourceKind::VpnGateway),
            "vpn" => Ok(ResourceKind::Vpn),
            other => Err(CloudError::InvalidConfig(format!(
                "unknown resource kind: {}",
                other
            ))),
        }
    }
}

/// Identity of a resource: names are unique per kind within a region
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub region: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, region: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            region: region.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.region, self.name)
    }
}

/// User intent for one resource, supplied by the manifest layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredResource {
    pub kind: ResourceKind,
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub ensure: Ensure,
    /// Everything else in the declaration is a kind-specific attribute
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl DeclaredResource {
    pub fn new(kind: ResourceKind, name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            region: region.into(),
            ensure: Ensure::Present,
            attributes: Attributes::new(),
        }
    }

    pub fn with_ensure(mut self, ensure: Ensure) -> Self {
        self.ensure = ensure;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, &self.region, &self.name)
    }

    /// Get an attribute as a specific type
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a string attribute, treating `null`, `false` and `""` as absent
    pub fn optional_str(&self, key: &str) -> Option<String> {
        match self.attributes.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn required_str(&self, key: &'static str) -> Result<String> {
        self.optional_str(key).ok_or(CloudError::MissingAttribute {
            kind: self.kind,
            attribute: key,
        })
    }

    /// Get a list of strings; a scalar is treated as a one-element list and
    /// `null` or empty entries are dropped
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.attributes.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(serde_json::Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Get a boolean attribute; `"true"` and `"false"` strings are accepted
    pub fn flag(&self, key: &str) -> bool {
        match self.attributes.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Get a map of user tags; non-string values are stringified and
    /// reserved keys dropped
    pub fn tags(&self) -> BTreeMap<String, String> {
        match self.attributes.get("tags") {
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .filter(|(k, _)| !is_reserved_tag(k))
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Normalized snapshot of one remote object for the current cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveRecord {
    pub kind: ResourceKind,
    pub name: String,
    pub region: String,
    pub ensure: Ensure,
    /// Provider identifier (`vpc-…`, `igw-…`, `vpn-…`); launch configurations
    /// are addressed by name and carry none
    pub id: Option<String>,
    pub attributes: Attributes,
}

impl LiveRecord {
    pub fn new(kind: ResourceKind, name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            region: region.into(),
            ensure: Ensure::Present,
            id: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, &self.region, &self.name)
    }

    /// Identifier used by delete calls
    pub fn remote_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declared_from_yaml_shape() {
        let declared: DeclaredResource = serde_json::from_value(json!({
            "kind": "launch_configuration",
            "name": "cfg-1",
            "region": "us-east-1",
            "image_id": "ami-1",
            "security_groups": ["web"],
        }))
        .unwrap();

        assert_eq!(declared.ensure, Ensure::Present);
        assert_eq!(declared.kind, ResourceKind::LaunchConfiguration);
        assert_eq!(declared.optional_str("image_id").as_deref(), Some("ami-1"));
        assert_eq!(declared.string_list("security_groups"), vec!["web"]);
        assert!(!declared.attributes.contains_key("name"));
    }

    #[test]
    fn test_optional_str_treats_false_as_absent() {
        let declared = DeclaredResource::new(ResourceKind::LaunchConfiguration, "cfg", "r")
            .with_attribute("key_name", json!(false))
            .with_attribute("empty", json!(""));
        assert_eq!(declared.optional_str("key_name"), None);
        assert_eq!(declared.optional_str("empty"), None);
        assert!(declared.required_str("image_id").is_err());
    }

    #[test]
    fn test_string_list_drops_nulls_and_accepts_scalar() {
        let declared = DeclaredResource::new(ResourceKind::LaunchConfiguration, "cfg", "r")
            .with_attribute("groups", json!(["web", null, "", "db"]))
            .with_attribute("single", json!("ssh"));
        assert_eq!(declared.string_list("groups"), vec!["web", "db"]);
        assert_eq!(declared.string_list("single"), vec!["ssh"]);
        assert!(declared.string_list("missing").is_empty());
    }

    #[test]
    fn test_flag_accepts_bool_and_string() {
        let declared = DeclaredResource::new(ResourceKind::Vpn, "vpn", "r")
            .with_attribute("static_routes", json!(true))
            .with_attribute("quoted", json!("true"))
            .with_attribute("off", json!(false));
        assert!(declared.flag("static_routes"));
        assert!(declared.flag("quoted"));
        assert!(!declared.flag("off"));
        assert!(!declared.flag("missing"));
    }

    #[test]
    fn test_tags_drop_reserved_keys() {
        let declared = DeclaredResource::new(ResourceKind::Vpc, "main", "r").with_attribute(
            "tags",
            json!({"Name": "other", "aws:cloudformation:stack-name": "x", "team": "net", "tier": 1}),
        );
        let tags = declared.tags();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["team"], "net");
        assert_eq!(tags["tier"], "1");
        assert!(is_reserved_tag("Name"));
        assert!(!is_reserved_tag("name"));
    }

    #[test]
    fn test_kind_parse_and_display() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("router".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_remote_id_falls_back_to_name() {
        let lc = LiveRecord::new(ResourceKind::LaunchConfiguration, "cfg-1", "r");
        assert_eq!(lc.remote_id(), "cfg-1");
        let vpc = LiveRecord::new(ResourceKind::Vpc, "main", "r").with_id("vpc-1");
        assert_eq!(vpc.remote_id(), "vpc-1");
    }
}
