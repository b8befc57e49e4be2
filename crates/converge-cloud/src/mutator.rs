//! Create, destroy and in-place update of live resources
//!
//! These are the only operations that change remote state. Each one issues
//! its remote calls and, only once they succeed, records the outcome in the
//! cycle's [`Inventory`].

use crate::client::{
    paginate, CloudClient, CreateCustomerGateway, CreateLaunchConfiguration, CreateSubnet,
    CreateVpc, CreateVpnConnection, CreateVpnGateway, Filter,
};
use crate::error::{CloudError, Result};
use crate::inventory::Inventory;
use crate::model::{is_reserved_tag, DeclaredResource, Ensure, LiveRecord, ResourceKind};
use crate::resolver;
use crate::schema::{Drift, Mutability};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use std::collections::BTreeMap;

/// Gateway and connection type when the declaration leaves it out
pub const DEFAULT_VPN_TYPE: &str = "ipsec.1";

/// Executes mutations against one region
pub struct Mutator<'a> {
    client: &'a dyn CloudClient,
}

impl<'a> Mutator<'a> {
    pub fn new(client: &'a dyn CloudClient) -> Self {
        Self { client }
    }

    fn check_region(&self, region: &str) -> Result<()> {
        if self.client.region() != region {
            return Err(CloudError::InvalidConfig(format!(
                "client for region {} cannot manage resources in region {}",
                self.client.region(),
                region
            )));
        }
        Ok(())
    }

    /// Create a declared resource and record it as present
    pub async fn create(
        &self,
        declared: &DeclaredResource,
        inventory: &mut Inventory,
    ) -> Result<LiveRecord> {
        let context = |e: CloudError| e.for_resource(declared.kind, &declared.name, &declared.region);

        if declared.ensure == Ensure::Absent {
            return Err(context(CloudError::InvalidConfig(
                "refusing to create a resource declared absent".to_string(),
            )));
        }
        self.check_region(&declared.region).map_err(context)?;

        tracing::info!(
            "Starting {} {} in region {}",
            declared.kind.label(),
            declared.name,
            declared.region
        );

        let record = match declared.kind {
            ResourceKind::LaunchConfiguration => self.create_launch_configuration(declared).await,
            ResourceKind::Vpc => self.create_vpc(declared).await,
            ResourceKind::Subnet => self.create_subnet(declared).await,
            ResourceKind::InternetGateway => self.create_internet_gateway(declared).await,
            ResourceKind::VpnGateway => self.create_vpn_gateway(declared).await,
            ResourceKind::CustomerGateway => self.create_customer_gateway(declared).await,
            ResourceKind::Vpn => self.create_vpn(declared).await,
        }
        .map_err(context)?;

        inventory.mark_present(record.clone());
        Ok(record)
    }

    /// Destroy a live resource and record it as absent
    ///
    /// Destroying something that is already absent, locally or remotely, succeeds.
    pub async fn destroy(&self, live: &LiveRecord, inventory: &mut Inventory) -> Result<()> {
        let key = live.key();
        if live.ensure == Ensure::Absent || !inventory.exists(&key) {
            tracing::debug!(
                "{} {} in region {} is already absent",
                live.kind.label(),
                live.name,
                live.region
            );
            return Ok(());
        }

        let context = |e: CloudError| e.for_resource(live.kind, &live.name, &live.region);
        self.check_region(&live.region).map_err(context)?;

        tracing::info!(
            "Deleting {} {} in region {}",
            live.kind.label(),
            live.name,
            live.region
        );

        let result = match live.kind {
            ResourceKind::LaunchConfiguration => {
                self.client.delete_launch_configuration(&live.name).await
            }
            kind => {
                let id = require_id(live).map_err(context)?;
                match self.detach_all(kind, id).await {
                    Ok(()) => self.delete_remote(kind, id).await,
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_remote_not_found() => {
                tracing::debug!(
                    "{} {} in region {} was already deleted",
                    live.kind.label(),
                    live.name,
                    live.region
                );
            }
            Err(e) => return Err(context(e)),
        }

        inventory.mark_absent(&key);
        Ok(())
    }

    /// Apply updatable drift in place
    pub async fn update(
        &self,
        live: &LiveRecord,
        drift: &[&Drift],
        inventory: &mut Inventory,
    ) -> Result<()> {
        let context = |e: CloudError| e.for_resource(live.kind, &live.name, &live.region);
        self.check_region(&live.region).map_err(context)?;

        for d in drift {
            if d.mutability != Mutability::Updatable {
                return Err(context(CloudError::InvalidAttribute {
                    attribute: field_name(&d.field),
                    message: "field cannot be changed in place".to_string(),
                }));
            }

            match d.field.as_str() {
                "tags" => {
                    tracing::info!(
                        "Updating tags of {} {} in region {}",
                        live.kind.label(),
                        live.name,
                        live.region
                    );
                    self.update_tags(live, d).await.map_err(context)?;
                    inventory.update_attribute(&live.key(), "tags", d.desired.clone());
                }
                other => {
                    return Err(context(CloudError::InvalidAttribute {
                        attribute: field_name(other),
                        message: "no in-place update available".to_string(),
                    }));
                }
            }
        }
        Ok(())
    }

    async fn create_launch_configuration(&self, declared: &DeclaredResource) -> Result<LiveRecord> {
        let image_id = declared.required_str("image_id")?;
        let instance_type = declared.required_str("instance_type")?;
        let groups = resolver::normalize_names(&declared.string_list("security_groups"));
        let vpc = declared.optional_str("vpc");

        let group_ids = resolver::resolve_group_ids(self.client, &groups, vpc.as_deref()).await?;

        let request = CreateLaunchConfiguration {
            name: declared.name.clone(),
            image_id: image_id.clone(),
            instance_type: instance_type.clone(),
            security_group_ids: group_ids,
            user_data: declared.optional_str("user_data").map(|data| BASE64.encode(data)),
            key_name: declared.optional_str("key_name"),
        };
        self.client.create_launch_configuration(&request).await?;

        let mut record =
            LiveRecord::new(ResourceKind::LaunchConfiguration, &declared.name, &declared.region)
                .with_attribute("image_id", json!(image_id))
                .with_attribute("instance_type", json!(instance_type))
                .with_attribute("security_groups", json!(groups));
        if let Some(key_name) = request.key_name {
            record = record.with_attribute("key_name", json!(key_name));
        }
        Ok(record)
    }

    async fn create_vpc(&self, declared: &DeclaredResource) -> Result<LiveRecord> {
        let request = CreateVpc {
            cidr_block: declared.required_str("cidr_block")?,
            instance_tenancy: declared.optional_str("instance_tenancy"),
        };
        let vpc_id = self.client.create_vpc(&request).await?;

        let tags = declared.tags();
        self.tag_or_roll_back(ResourceKind::Vpc, &vpc_id, &declared.name, &tags)
            .await?;

        Ok(LiveRecord::new(ResourceKind::Vpc, &declared.name, &declared.region)
            .with_id(vpc_id)
            .with_attribute("cidr_block", json!(request.cidr_block))
            .with_attribute(
                "instance_tenancy",
                json!(request.instance_tenancy.as_deref().unwrap_or("default")),
            )
            .with_attribute("tags", json!(tags)))
    }

    async fn create_subnet(&self, declared: &DeclaredResource) -> Result<LiveRecord> {
        let vpc = declared.required_str("vpc")?;
        let vpc_id = resolver::resolve_vpc_id(self.client, &vpc).await?;
        let request = CreateSubnet {
            vpc_id,
            cidr_block: declared.required_str("cidr_block")?,
            availability_zone: declared.optional_str("availability_zone"),
        };
        let subnet_id = self.client.create_subnet(&request).await?;

        let tags = declared.tags();
        self.tag_or_roll_back(ResourceKind::Subnet, &subnet_id, &declared.name, &tags)
            .await?;

        let mut record = LiveRecord::new(ResourceKind::Subnet, &declared.name, &declared.region)
            .with_id(subnet_id)
            .with_attribute("vpc", json!(vpc))
            .with_attribute("cidr_block", json!(request.cidr_block))
            .with_attribute("tags", json!(tags));
        if let Some(az) = request.availability_zone {
            record = record.with_attribute("availability_zone", json!(az));
        }
        Ok(record)
    }

    async fn create_internet_gateway(&self, declared: &DeclaredResource) -> Result<LiveRecord> {
        let kind = ResourceKind::InternetGateway;
        let vpc = declared.optional_str("vpc");
        let vpc_id = match &vpc {
            Some(vpc) => Some(resolver::resolve_vpc_id(self.client, vpc).await?),
            None => None,
        };

        let gateway_id = self.client.create_internet_gateway().await?;
        let tags = declared.tags();
        self.tag_or_roll_back(kind, &gateway_id, &declared.name, &tags)
            .await?;
        if let Some(vpc_id) = &vpc_id {
            if let Err(e) = self.client.attach_internet_gateway(&gateway_id, vpc_id).await {
                self.roll_back(kind, &gateway_id).await;
                return Err(e);
            }
        }

        let mut record = LiveRecord::new(kind, &declared.name, &declared.region)
            .with_id(gateway_id)
            .with_attribute("tags", json!(tags));
        if let Some(vpc) = vpc {
            record = record.with_attribute("vpc", json!(vpc));
        }
        Ok(record)
    }

    async fn create_vpn_gateway(&self, declared: &DeclaredResource) -> Result<LiveRecord> {
        let kind = ResourceKind::VpnGateway;
        let vpc = declared.optional_str("vpc");
        let vpc_id = match &vpc {
            Some(vpc) => Some(resolver::resolve_vpc_id(self.client, vpc).await?),
            None => None,
        };

        let request = CreateVpnGateway {
            gateway_type: declared
                .optional_str("type")
                .unwrap_or_else(|| DEFAULT_VPN_TYPE.to_string()),
            availability_zone: declared.optional_str("availability_zone"),
        };
        let gateway_id = self.client.create_vpn_gateway(&request).await?;
        let tags = declared.tags();
        self.tag_or_roll_back(kind, &gateway_id, &declared.name, &tags)
            .await?;
        if let Some(vpc_id) = &vpc_id {
            if let Err(e) = self.client.attach_vpn_gateway(&gateway_id, vpc_id).await {
                self.roll_back(kind, &gateway_id).await;
                return Err(e);
            }
        }

        let mut record = LiveRecord::new(kind, &declared.name, &declared.region)
            .with_id(gateway_id)
            .with_attribute("type", json!(request.gateway_type))
            .with_attribute("tags", json!(tags));
        if let Some(vpc) = vpc {
            record = record.with_attribute("vpc", json!(vpc));
        }
        if let Some(az) = request.availability_zone {
            record = record.with_attribute("availability_zone", json!(az));
        }
        Ok(record)
    }

    async fn create_customer_gateway(&self, declared: &DeclaredResource) -> Result<LiveRecord> {
        let kind = ResourceKind::CustomerGateway;
        let bgp_asn = declared.required_str("bgp_asn")?;
        let request = CreateCustomerGateway {
            gateway_type: declared
                .optional_str("type")
                .unwrap_or_else(|| DEFAULT_VPN_TYPE.to_string()),
            ip_address: declared.required_str("ip_address")?,
            bgp_asn: bgp_asn
                .parse::<i32>()
                .map_err(|e| CloudError::InvalidAttribute {
                    attribute: "bgp_asn",
                    message: format!("{} is not an ASN: {}", bgp_asn, e),
                })?,
        };

        let gateway_id = self.client.create_customer_gateway(&request).await?;
        let tags = declared.tags();
        self.tag_or_roll_back(kind, &gateway_id, &declared.name, &tags)
            .await?;

        Ok(LiveRecord::new(kind, &declared.name, &declared.region)
            .with_id(gateway_id)
            .with_attribute("type", json!(request.gateway_type))
            .with_attribute("ip_address", json!(request.ip_address))
            .with_attribute("bgp_asn", json!(request.bgp_asn.to_string()))
            .with_attribute("tags", json!(tags)))
    }

    async fn create_vpn(&self, declared: &DeclaredResource) -> Result<LiveRecord> {
        let kind = ResourceKind::Vpn;
        let vpn_gateway = declared.required_str("vpn_gateway")?;
        let customer_gateway = declared.required_str("customer_gateway")?;
        let static_routes = declared.flag("static_routes");
        let mut routes = resolver::normalize_names(&declared.string_list("routes"));
        routes.sort();
        if !routes.is_empty() && !static_routes {
            return Err(CloudError::InvalidAttribute {
                attribute: "routes",
                message: "routes need static_routes: true".to_string(),
            });
        }

        let request = CreateVpnConnection {
            connection_type: declared
                .optional_str("type")
                .unwrap_or_else(|| DEFAULT_VPN_TYPE.to_string()),
            vpn_gateway_id: resolver::resolve_vpn_gateway_id(self.client, &vpn_gateway).await?,
            customer_gateway_id: resolver::resolve_customer_gateway_id(
                self.client,
                &customer_gateway,
            )
            .await?,
            static_routes_only: static_routes,
        };
        let connection_id = self.client.create_vpn_connection(&request).await?;
        let tags = declared.tags();
        self.tag_or_roll_back(kind, &connection_id, &declared.name, &tags)
            .await?;
        for route in &routes {
            if let Err(e) = self
                .client
                .create_vpn_connection_route(&connection_id, route)
                .await
            {
                self.roll_back(kind, &connection_id).await;
                return Err(e);
            }
        }

        Ok(LiveRecord::new(kind, &declared.name, &declared.region)
            .with_id(connection_id)
            .with_attribute("type", json!(request.connection_type))
            .with_attribute("vpn_gateway", json!(vpn_gateway))
            .with_attribute("customer_gateway", json!(customer_gateway))
            .with_attribute("static_routes", json!(static_routes))
            .with_attribute("routes", json!(routes))
            .with_attribute("tags", json!(tags)))
    }

    /// Name tag plus user tags on a freshly created object
    async fn tag_new(&self, id: &str, name: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let mut all = tags.clone();
        all.insert("Name".to_string(), name.to_string());
        self.client.create_tags(id, &all).await
    }

    /// An object without its `Name` tag is invisible to discovery, so it is
    /// deleted again when tagging fails
    async fn tag_or_roll_back(
        &self,
        kind: ResourceKind,
        id: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        if let Err(e) = self.tag_new(id, name, tags).await {
            self.roll_back(kind, id).await;
            return Err(e);
        }
        Ok(())
    }

    async fn roll_back(&self, kind: ResourceKind, id: &str) {
        if let Err(e) = self.delete_remote(kind, id).await {
            tracing::warn!("Failed to roll back {} {}: {}", kind.label(), id, e);
        }
    }

    /// Delete by provider identifier (launch configurations use their name)
    async fn delete_remote(&self, kind: ResourceKind, id: &str) -> Result<()> {
        match kind {
            ResourceKind::LaunchConfiguration => self.client.delete_launch_configuration(id).await,
            ResourceKind::Vpc => self.client.delete_vpc(id).await,
            ResourceKind::Subnet => self.client.delete_subnet(id).await,
            ResourceKind::InternetGateway => self.client.delete_internet_gateway(id).await,
            ResourceKind::VpnGateway => self.client.delete_vpn_gateway(id).await,
            ResourceKind::CustomerGateway => self.client.delete_customer_gateway(id).await,
            ResourceKind::Vpn => self.client.delete_vpn_connection(id).await,
        }
    }

    /// Gateways must be detached from their VPCs before they can be deleted
    async fn detach_all(&self, kind: ResourceKind, id: &str) -> Result<()> {
        match kind {
            ResourceKind::InternetGateway => {
                let filters = [Filter::new("internet-gateway-id", [id])];
                let gateways =
                    paginate(|token| self.client.describe_internet_gateways(&filters, token))
                        .await?;
                for vpc_id in gateways.iter().flat_map(|g| g.attachments.iter()) {
                    tolerate_not_found(self.client.detach_internet_gateway(id, vpc_id).await)?;
                }
            }
            ResourceKind::VpnGateway => {
                let filters = [Filter::new("vpn-gateway-id", [id])];
                let gateways =
                    paginate(|token| self.client.describe_vpn_gateways(&filters, token)).await?;
                for vpc_id in gateways.iter().flat_map(|g| g.attachments.iter()) {
                    tolerate_not_found(self.client.detach_vpn_gateway(id, vpc_id).await)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn update_tags(&self, live: &LiveRecord, drift: &Drift) -> Result<()> {
        let id = require_id(live)?;
        let desired = string_map(&drift.desired);
        let actual = drift.actual.as_ref().map(string_map).unwrap_or_default();

        let changed: BTreeMap<String, String> = desired
            .iter()
            .filter(|(k, v)| actual.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let removed: Vec<String> = actual
            .keys()
            .filter(|k| !desired.contains_key(*k) && !is_reserved_tag(k))
            .cloned()
            .collect();

        if !changed.is_empty() {
            self.client.create_tags(id, &changed).await?;
        }
        if !removed.is_empty() {
            self.client.delete_tags(id, &removed).await?;
        }
        Ok(())
    }
}

fn tolerate_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_remote_not_found() => Ok(()),
        other => other,
    }
}

fn require_id(live: &LiveRecord) -> Result<&str> {
    live.id.as_deref().ok_or_else(|| {
        CloudError::InvalidConfig(format!(
            "{} {} has no provider identifier",
            live.kind.label(),
            live.name
        ))
    })
}

fn string_map(value: &serde_json::Value) -> BTreeMap<String, String> {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Schema field name with a static lifetime for error reporting
fn field_name(field: &str) -> &'static str {
    ResourceKind::ALL
        .iter()
        .flat_map(|kind| crate::schema::fields(*kind))
        .find(|spec| spec.name == field)
        .map(|spec| spec.name)
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCloud;
    use crate::schema;

    fn launch_configuration() -> DeclaredResource {
        DeclaredResource::new(ResourceKind::LaunchConfiguration, "cfg-1", "us-east-1")
            .with_attribute("image_id", json!("ami-1"))
            .with_attribute("instance_type", json!("t2.micro"))
            .with_attribute("security_groups", json!(["web"]))
    }

    #[tokio::test]
    async fn test_create_launch_configuration_payload() {
        let cloud = InMemoryCloud::new("us-east-1");
        let web = cloud.add_security_group("web", None);
        let mut inventory = Inventory::new();

        let declared = launch_configuration()
            .with_attribute("user_data", json!("#!/bin/sh\necho hi\n"))
            .with_attribute("key_name", json!(false));
        let record = Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .unwrap();

        let request = &cloud.create_requests()[0];
        assert_eq!(request.security_group_ids, vec![web]);
        assert_eq!(request.key_name, None);
        let encoded = request.user_data.as_deref().unwrap();
        assert_eq!(BASE64.decode(encoded).unwrap(), b"#!/bin/sh\necho hi\n");

        assert_eq!(record.ensure, Ensure::Present);
        assert!(inventory.exists(&declared.key()));
        assert!(!record.attributes.contains_key("user_data"));
    }

    #[tokio::test]
    async fn test_create_without_groups_sends_empty_list() {
        let cloud = InMemoryCloud::new("us-east-1");
        let mut inventory = Inventory::new();
        let declared = launch_configuration()
            .with_attribute("security_groups", json!(null))
            .with_attribute("key_name", json!("deploy"));

        Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .unwrap();

        let request = &cloud.create_requests()[0];
        assert!(request.security_group_ids.is_empty());
        assert_eq!(request.user_data, None);
        assert_eq!(request.key_name.as_deref(), Some("deploy"));
    }

    #[tokio::test]
    async fn test_create_with_unknown_vpc_fails_with_context() {
        let cloud = InMemoryCloud::new("us-east-1");
        cloud.add_security_group("web", None);
        let mut inventory = Inventory::new();
        let declared = launch_configuration().with_attribute("vpc", json!("missing"));

        let err = Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .unwrap_err();

        assert!(matches!(err.root(), CloudError::NotFound { what: "VPC", .. }));
        let message = err.to_string();
        assert!(message.contains("cfg-1"));
        assert!(message.contains("us-east-1"));
        assert!(cloud.launch_configurations().is_empty());
        assert!(inventory.is_empty());
    }

    #[tokio::test]
    async fn test_create_missing_required_attribute() {
        let cloud = InMemoryCloud::new("us-east-1");
        let mut inventory = Inventory::new();
        let declared = DeclaredResource::new(ResourceKind::Vpc, "main", "us-east-1");

        let err = Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            CloudError::MissingAttribute {
                attribute: "cidr_block",
                ..
            }
        ));
        assert_eq!(cloud.calls(), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_absent_declaration() {
        let cloud = InMemoryCloud::new("us-east-1");
        let mut inventory = Inventory::new();
        let declared = launch_configuration().with_ensure(Ensure::Absent);

        assert!(Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .is_err());
        assert_eq!(cloud.calls(), 0);
    }

    #[tokio::test]
    async fn test_create_vpc_and_subnet_are_tagged() {
        let cloud = InMemoryCloud::new("sa-east-1");
        let mut inventory = Inventory::new();
        let mutator = Mutator::new(&cloud);

        let vpc = DeclaredResource::new(ResourceKind::Vpc, "env-vpc", "sa-east-1")
            .with_attribute("cidr_block", json!("10.0.0.0/16"))
            .with_attribute("tags", json!({"department": "engineering"}));
        let record = mutator.create(&vpc, &mut inventory).await.unwrap();
        let vpc_id = record.id.clone().unwrap();

        let live = &cloud.vpcs()[0];
        assert_eq!(live.vpc_id, vpc_id);
        assert_eq!(live.name(), Some("env-vpc"));
        assert_eq!(live.tags["department"], "engineering");

        let subnet = DeclaredResource::new(ResourceKind::Subnet, "env-subnet", "sa-east-1")
            .with_attribute("vpc", json!("env-vpc"))
            .with_attribute("cidr_block", json!("10.0.0.0/24"))
            .with_attribute("availability_zone", json!("sa-east-1a"));
        mutator.create(&subnet, &mut inventory).await.unwrap();

        let live = &cloud.subnets()[0];
        assert_eq!(live.vpc_id, vpc_id);
        assert_eq!(live.name(), Some("env-subnet"));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let cloud = InMemoryCloud::new("us-east-1");
        cloud.add_launch_configuration("cfg-1", "ami-1", "t2.micro", &[]);
        let live = LiveRecord::new(ResourceKind::LaunchConfiguration, "cfg-1", "us-east-1");
        let mut inventory = Inventory::from_records([live.clone()]);
        let mutator = Mutator::new(&cloud);

        mutator.destroy(&live, &mut inventory).await.unwrap();
        assert!(!inventory.exists(&live.key()));
        assert!(cloud.launch_configurations().is_empty());

        // already absent locally: no remote call at all
        cloud.reset_calls();
        mutator.destroy(&live, &mut inventory).await.unwrap();
        assert_eq!(cloud.calls(), 0);

        // present locally but gone remotely: remote not-found is tolerated
        let mut stale = Inventory::from_records([live.clone()]);
        mutator.destroy(&live, &mut stale).await.unwrap();
        assert!(!stale.exists(&live.key()));
    }

    #[tokio::test]
    async fn test_destroy_failure_keeps_record_present() {
        let cloud = InMemoryCloud::new("us-east-1");
        cloud.add_launch_configuration("cfg-1", "ami-1", "t2.micro", &[]);
        cloud.fail_mutations(CloudError::api("us-east-1", "ResourceInUse"));
        let live = LiveRecord::new(ResourceKind::LaunchConfiguration, "cfg-1", "us-east-1");
        let mut inventory = Inventory::from_records([live.clone()]);

        let err = Mutator::new(&cloud)
            .destroy(&live, &mut inventory)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ResourceInUse"));
        assert!(inventory.exists(&live.key()));
    }

    #[tokio::test]
    async fn test_update_tags_in_place() {
        let cloud = InMemoryCloud::new("us-east-1");
        let vpc_id = cloud.add_vpc("main", "10.0.0.0/16");
        let tags = BTreeMap::from([
            ("project".to_string(), "cloud".to_string()),
            ("department".to_string(), "ops".to_string()),
        ]);
        cloud.create_tags(&vpc_id, &tags).await.unwrap();

        let live = LiveRecord::new(ResourceKind::Vpc, "main", "us-east-1")
            .with_id(&vpc_id)
            .with_attribute("tags", json!(tags));
        let declared = DeclaredResource::new(ResourceKind::Vpc, "main", "us-east-1")
            .with_attribute("tags", json!({"department": "engineering", "foo": "bar"}));
        let drift = schema::diff(ResourceKind::Vpc, &declared.attributes, &live.attributes);
        let mut inventory = Inventory::from_records([live.clone()]);

        let drift_refs: Vec<&Drift> = drift.iter().collect();
        Mutator::new(&cloud)
            .update(&live, &drift_refs, &mut inventory)
            .await
            .unwrap();

        let remote = &cloud.vpcs()[0].tags;
        assert_eq!(remote["department"], "engineering");
        assert_eq!(remote["foo"], "bar");
        assert!(!remote.contains_key("project"));
        assert_eq!(remote["Name"], "main");

        let updated = inventory.present(&live.key()).unwrap();
        assert!(schema::diff(ResourceKind::Vpc, &declared.attributes, &updated.attributes).is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_read_only_drift() {
        let cloud = InMemoryCloud::new("us-east-1");
        let live = LiveRecord::new(ResourceKind::Vpc, "main", "us-east-1").with_id("vpc-1");
        let drift = Drift {
            field: "cidr_block".to_string(),
            mutability: Mutability::ReadOnly,
            desired: json!("10.1.0.0/16"),
            actual: Some(json!("10.0.0.0/16")),
        };
        let mut inventory = Inventory::from_records([live.clone()]);

        let err = Mutator::new(&cloud)
            .update(&live, &[&drift], &mut inventory)
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            CloudError::InvalidAttribute {
                attribute: "cidr_block",
                ..
            }
        ));
        assert_eq!(cloud.calls(), 0);
    }

    fn vpn_environment(cloud: &InMemoryCloud) -> String {
        let vpc_id = cloud.add_vpc("env-vpc", "10.0.0.0/16");
        cloud.add_vpn_gateway("env-vgw", Some(&vpc_id));
        cloud.add_customer_gateway("env-cgw", "203.0.113.12", "65000");
        vpc_id
    }

    #[tokio::test]
    async fn test_create_internet_gateway_attaches_to_vpc() {
        let cloud = InMemoryCloud::new("us-east-1");
        let vpc_id = cloud.add_vpc("env-vpc", "10.0.0.0/16");
        let mut inventory = Inventory::new();

        let declared = DeclaredResource::new(ResourceKind::InternetGateway, "env-igw", "us-east-1")
            .with_attribute("vpc", json!("env-vpc"))
            .with_attribute("tags", json!({"department": "engineering"}));
        let record = Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .unwrap();

        let live = &cloud.internet_gateways()[0];
        assert_eq!(live.attachments, vec![vpc_id]);
        assert_eq!(live.name(), Some("env-igw"));
        assert_eq!(live.tags["department"], "engineering");
        assert_eq!(record.get::<String>("vpc").unwrap(), "env-vpc");
    }

    #[tokio::test]
    async fn test_create_vpn_adds_static_routes() {
        let cloud = InMemoryCloud::new("us-east-1");
        vpn_environment(&cloud);
        let mut inventory = Inventory::new();

        let declared = DeclaredResource::new(ResourceKind::Vpn, "env-vpn", "us-east-1")
            .with_attribute("vpn_gateway", json!("env-vgw"))
            .with_attribute("customer_gateway", json!("env-cgw"))
            .with_attribute("static_routes", json!("true"))
            .with_attribute("routes", json!("0.0.0.0/0"));
        let record = Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .unwrap();

        let live = &cloud.vpn_connections()[0];
        assert_eq!(live.connection_type, DEFAULT_VPN_TYPE);
        assert!(live.static_routes_only);
        assert_eq!(live.routes, vec!["0.0.0.0/0"]);
        assert_eq!(live.name(), Some("env-vpn"));

        let drift = schema::diff(ResourceKind::Vpn, &declared.attributes, &record.attributes);
        assert!(drift.is_empty(), "{drift:?}");
    }

    #[tokio::test]
    async fn test_routes_without_static_routing_are_rejected_before_any_call() {
        let cloud = InMemoryCloud::new("us-east-1");
        vpn_environment(&cloud);
        cloud.reset_calls();
        let mut inventory = Inventory::new();

        let declared = DeclaredResource::new(ResourceKind::Vpn, "env-vpn", "us-east-1")
            .with_attribute("vpn_gateway", json!("env-vgw"))
            .with_attribute("customer_gateway", json!("env-cgw"))
            .with_attribute("routes", json!(["0.0.0.0/0"]));
        let err = Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .unwrap_err();

        assert!(matches!(
            err.root(),
            CloudError::InvalidAttribute {
                attribute: "routes",
                ..
            }
        ));
        assert_eq!(cloud.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_bgp_asn() {
        let cloud = InMemoryCloud::new("us-east-1");
        let mut inventory = Inventory::new();
        let declared = DeclaredResource::new(ResourceKind::CustomerGateway, "env-cgw", "us-east-1")
            .with_attribute("ip_address", json!("203.0.113.12"))
            .with_attribute("bgp_asn", json!("private"));

        let err = Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            CloudError::InvalidAttribute {
                attribute: "bgp_asn",
                ..
            }
        ));
        assert_eq!(cloud.calls(), 0);
    }

    #[tokio::test]
    async fn test_gateway_for_unknown_vpc_is_never_created() {
        let cloud = InMemoryCloud::new("us-east-1");
        let mut inventory = Inventory::new();

        let declared = DeclaredResource::new(ResourceKind::VpnGateway, "env-vgw", "us-east-1")
            .with_attribute("vpc", json!("env-vpc"));
        let err = Mutator::new(&cloud)
            .create(&declared, &mut inventory)
            .await
            .unwrap_err();

        assert!(matches!(err.root(), CloudError::NotFound { what: "VPC", .. }));
        assert!(cloud.vpn_gateways().is_empty());
        assert!(inventory.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_attached_gateway_detaches_first() {
        let cloud = InMemoryCloud::new("us-east-1");
        let vpc_id = cloud.add_vpc("env-vpc", "10.0.0.0/16");
        let gateway_id = cloud.add_internet_gateway("env-igw", Some(&vpc_id));
        let live = LiveRecord::new(ResourceKind::InternetGateway, "env-igw", "us-east-1")
            .with_id(&gateway_id);
        let mut inventory = Inventory::from_records([live.clone()]);

        Mutator::new(&cloud)
            .destroy(&live, &mut inventory)
            .await
            .unwrap();

        assert!(cloud.internet_gateways().is_empty());
        assert!(!inventory.exists(&live.key()));
        cloud.delete_vpc(&vpc_id).await.unwrap();
    }
}
