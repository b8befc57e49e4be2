//! EC2 and Auto Scaling backed [`CloudClient`]

use crate::error::map_sdk_error;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::types::{
    AttachmentStatus, Filter as Ec2Filter, GatewayType, Tag, Tenancy,
    VpnConnectionOptionsSpecification,
};
use converge_cloud::client::{
    is_deleted_state, CreateCustomerGateway, CreateLaunchConfiguration, CreateSubnet, CreateVpc,
    CreateVpnConnection, CreateVpnGateway, CustomerGatewayInfo, InternetGatewayInfo,
    LaunchConfigurationInfo, SecurityGroupInfo, SubnetInfo, VpcInfo, VpnConnectionInfo,
    VpnGatewayInfo,
};
use converge_cloud::{AuthStatus, CloudClient, CloudError, Filter, Page, RegionClients, Result};
use futures_util::future;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Client for one AWS region
#[derive(Clone)]
pub struct AwsClient {
    region: String,
    ec2: aws_sdk_ec2::Client,
    autoscaling: aws_sdk_autoscaling::Client,
}

impl AwsClient {
    /// Load credentials from the default provider chain for `region`
    pub async fn connect(region: impl Into<String>) -> Self {
        let region = region.into();
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;

        tracing::debug!("Loaded AWS configuration for region {}", region);

        Self {
            ec2: aws_sdk_ec2::Client::new(&config),
            autoscaling: aws_sdk_autoscaling::Client::new(&config),
            region,
        }
    }

    /// Build clients for every region
    pub async fn connect_all<S: AsRef<str>>(regions: &[S]) -> RegionClients {
        let clients =
            future::join_all(regions.iter().map(|r| AwsClient::connect(r.as_ref()))).await;
        clients.into_iter().fold(RegionClients::new(), |acc, client| {
            acc.with(Arc::new(client))
        })
    }

    fn error<E, R>(
        &self,
        target: Option<&str>,
        err: aws_sdk_ec2::error::SdkError<E, R>,
    ) -> CloudError
    where
        E: aws_sdk_ec2::error::ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug + 'static,
    {
        map_sdk_error(&self.region, target, err)
    }
}

fn ec2_filters(filters: &[Filter]) -> Option<Vec<Ec2Filter>> {
    if filters.is_empty() {
        return None;
    }
    Some(
        filters
            .iter()
            .map(|f| {
                Ec2Filter::builder()
                    .name(&f.name)
                    .set_values(Some(f.values.clone()))
                    .build()
            })
            .collect(),
    )
}

fn tag_map(tags: &[Tag]) -> BTreeMap<String, String> {
    tags.iter()
        .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
        .collect()
}

/// Attachments that still hold the VPC; detached ones linger in responses
fn is_attached(state: Option<&AttachmentStatus>) -> bool {
    !matches!(state, Some(AttachmentStatus::Detached | AttachmentStatus::Detaching))
}

fn missing(region: &str, what: &str) -> CloudError {
    CloudError::api(region, format!("response is missing {}", what))
}

#[async_trait]
impl CloudClient for AwsClient {
    fn region(&self) -> &str {
        &self.region
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        tracing::debug!("Probing EC2 credentials in region {}", self.region);
        match self.ec2.describe_regions().send().await {
            Ok(_) => Ok(AuthStatus::ok(format!("aws ({})", self.region))),
            Err(e) => match self.error(None, e) {
                CloudError::AuthenticationFailed { message, .. } => Ok(AuthStatus::failed(message)),
                other => Err(other),
            },
        }
    }

    async fn describe_launch_configurations(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<LaunchConfigurationInfo>> {
        let output = self
            .autoscaling
            .describe_launch_configurations()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        let items = output
            .launch_configurations()
            .iter()
            .map(|lc| LaunchConfigurationInfo {
                name: lc.launch_configuration_name().to_string(),
                image_id: lc.image_id().to_string(),
                instance_type: lc.instance_type().to_string(),
                key_name: lc.key_name().map(str::to_string),
                security_groups: lc.security_groups().to_vec(),
            })
            .collect();

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn describe_vpcs(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<VpcInfo>> {
        let output = self
            .ec2
            .describe_vpcs()
            .set_filters(ec2_filters(filters))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        let mut items = Vec::new();
        for vpc in output.vpcs() {
            items.push(VpcInfo {
                vpc_id: vpc
                    .vpc_id()
                    .ok_or_else(|| missing(&self.region, "VpcId"))?
                    .to_string(),
                cidr_block: vpc.cidr_block().unwrap_or_default().to_string(),
                instance_tenancy: vpc.instance_tenancy().map(|t| t.as_str().to_string()),
                tags: tag_map(vpc.tags()),
            });
        }

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn describe_subnets(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<SubnetInfo>> {
        let output = self
            .ec2
            .describe_subnets()
            .set_filters(ec2_filters(filters))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        let mut items = Vec::new();
        for subnet in output.subnets() {
            items.push(SubnetInfo {
                subnet_id: subnet
                    .subnet_id()
                    .ok_or_else(|| missing(&self.region, "SubnetId"))?
                    .to_string(),
                vpc_id: subnet.vpc_id().unwrap_or_default().to_string(),
                cidr_block: subnet.cidr_block().unwrap_or_default().to_string(),
                availability_zone: subnet.availability_zone().map(str::to_string),
                tags: tag_map(subnet.tags()),
            });
        }

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn describe_security_groups(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<SecurityGroupInfo>> {
        let output = self
            .ec2
            .describe_security_groups()
            .set_filters(ec2_filters(filters))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        let mut items = Vec::new();
        for group in output.security_groups() {
            items.push(SecurityGroupInfo {
                group_id: group
                    .group_id()
                    .ok_or_else(|| missing(&self.region, "GroupId"))?
                    .to_string(),
                group_name: group.group_name().unwrap_or_default().to_string(),
                vpc_id: group.vpc_id().map(str::to_string),
            });
        }

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn create_launch_configuration(&self, request: &CreateLaunchConfiguration) -> Result<()> {
        tracing::debug!(
            "CreateLaunchConfiguration {} in region {}",
            request.name,
            self.region
        );
        self.autoscaling
            .create_launch_configuration()
            .launch_configuration_name(&request.name)
            .image_id(&request.image_id)
            .instance_type(&request.instance_type)
            .set_security_groups(Some(request.security_group_ids.clone()))
            .set_user_data(request.user_data.clone())
            .set_key_name(request.key_name.clone())
            .send()
            .await
            .map_err(|e| self.error(Some(&request.name), e))?;
        Ok(())
    }

    async fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        tracing::debug!("DeleteLaunchConfiguration {} in region {}", name, self.region);
        self.autoscaling
            .delete_launch_configuration()
            .launch_configuration_name(name)
            .send()
            .await
            .map_err(|e| self.error(Some(name), e))?;
        Ok(())
    }

    async fn create_vpc(&self, request: &CreateVpc) -> Result<String> {
        tracing::debug!("CreateVpc {} in region {}", request.cidr_block, self.region);
        let output = self
            .ec2
            .create_vpc()
            .cidr_block(&request.cidr_block)
            .set_instance_tenancy(request.instance_tenancy.as_deref().map(Tenancy::from))
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        output
            .vpc()
            .and_then(|vpc| vpc.vpc_id())
            .map(str::to_string)
            .ok_or_else(|| missing(&self.region, "VpcId"))
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        tracing::debug!("DeleteVpc {} in region {}", vpc_id, self.region);
        self.ec2
            .delete_vpc()
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| self.error(Some(vpc_id), e))?;
        Ok(())
    }

    async fn create_subnet(&self, request: &CreateSubnet) -> Result<String> {
        tracing::debug!(
            "CreateSubnet {} in {} in region {}",
            request.cidr_block,
            request.vpc_id,
            self.region
        );
        let output = self
            .ec2
            .create_subnet()
            .vpc_id(&request.vpc_id)
            .cidr_block(&request.cidr_block)
            .set_availability_zone(request.availability_zone.clone())
            .send()
            .await
            .map_err(|e| self.error(Some(&request.vpc_id), e))?;

        output
            .subnet()
            .and_then(|subnet| subnet.subnet_id())
            .map(str::to_string)
            .ok_or_else(|| missing(&self.region, "SubnetId"))
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        tracing::debug!("DeleteSubnet {} in region {}", subnet_id, self.region);
        self.ec2
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(|e| self.error(Some(subnet_id), e))?;
        Ok(())
    }

    async fn describe_internet_gateways(
        &self,
        filters: &[Filter],
        next_token: Option<String>,
    ) -> Result<Page<InternetGatewayInfo>> {
        let output = self
            .ec2
            .describe_internet_gateways()
            .set_filters(ec2_filters(filters))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        let mut items = Vec::new();
        for gateway in output.internet_gateways() {
            items.push(InternetGatewayInfo {
                internet_gateway_id: gateway
                    .internet_gateway_id()
                    .ok_or_else(|| missing(&self.region, "InternetGatewayId"))?
                    .to_string(),
                attachments: gateway
                    .attachments()
                    .iter()
                    .filter(|a| is_attached(a.state()))
                    .filter_map(|a| a.vpc_id().map(str::to_string))
                    .collect(),
                tags: tag_map(gateway.tags()),
            });
        }

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn create_internet_gateway(&self) -> Result<String> {
        tracing::debug!("CreateInternetGateway in region {}", self.region);
        let output = self
            .ec2
            .create_internet_gateway()
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        output
            .internet_gateway()
            .and_then(|gateway| gateway.internet_gateway_id())
            .map(str::to_string)
            .ok_or_else(|| missing(&self.region, "InternetGatewayId"))
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        tracing::debug!(
            "AttachInternetGateway {} to {} in region {}",
            gateway_id,
            vpc_id,
            self.region
        );
        self.ec2
            .attach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| self.error(Some(gateway_id), e))?;
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        tracing::debug!(
            "DetachInternetGateway {} from {} in region {}",
            gateway_id,
            vpc_id,
            self.region
        );
        self.ec2
            .detach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| self.error(Some(gateway_id), e))?;
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()> {
        tracing::debug!("DeleteInternetGateway {} in region {}", gateway_id, self.region);
        self.ec2
            .delete_internet_gateway()
            .internet_gateway_id(gateway_id)
            .send()
            .await
            .map_err(|e| self.error(Some(gateway_id), e))?;
        Ok(())
    }

    // DescribeVpnGateways, DescribeCustomerGateways and DescribeVpnConnections
    // are not paginated
    async fn describe_vpn_gateways(
        &self,
        filters: &[Filter],
        _next_token: Option<String>,
    ) -> Result<Page<VpnGatewayInfo>> {
        let output = self
            .ec2
            .describe_vpn_gateways()
            .set_filters(ec2_filters(filters))
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        let mut items = Vec::new();
        for gateway in output.vpn_gateways() {
            items.push(VpnGatewayInfo {
                vpn_gateway_id: gateway
                    .vpn_gateway_id()
                    .ok_or_else(|| missing(&self.region, "VpnGatewayId"))?
                    .to_string(),
                gateway_type: gateway
                    .r#type()
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_default(),
                availability_zone: gateway.availability_zone().map(str::to_string),
                state: gateway
                    .state()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                attachments: gateway
                    .vpc_attachments()
                    .iter()
                    .filter(|a| is_attached(a.state()))
                    .filter_map(|a| a.vpc_id().map(str::to_string))
                    .collect(),
                tags: tag_map(gateway.tags()),
            });
        }

        Ok(Page::last(items))
    }

    async fn create_vpn_gateway(&self, request: &CreateVpnGateway) -> Result<String> {
        tracing::debug!(
            "CreateVpnGateway {} in region {}",
            request.gateway_type,
            self.region
        );
        let output = self
            .ec2
            .create_vpn_gateway()
            .r#type(GatewayType::from(request.gateway_type.as_str()))
            .set_availability_zone(request.availability_zone.clone())
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        output
            .vpn_gateway()
            .and_then(|gateway| gateway.vpn_gateway_id())
            .map(str::to_string)
            .ok_or_else(|| missing(&self.region, "VpnGatewayId"))
    }

    async fn attach_vpn_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        tracing::debug!(
            "AttachVpnGateway {} to {} in region {}",
            gateway_id,
            vpc_id,
            self.region
        );
        self.ec2
            .attach_vpn_gateway()
            .vpn_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| self.error(Some(gateway_id), e))?;
        Ok(())
    }

    async fn detach_vpn_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        tracing::debug!(
            "DetachVpnGateway {} from {} in region {}",
            gateway_id,
            vpc_id,
            self.region
        );
        self.ec2
            .detach_vpn_gateway()
            .vpn_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| self.error(Some(gateway_id), e))?;
        Ok(())
    }

    async fn delete_vpn_gateway(&self, gateway_id: &str) -> Result<()> {
        tracing::debug!("DeleteVpnGateway {} in region {}", gateway_id, self.region);
        self.ec2
            .delete_vpn_gateway()
            .vpn_gateway_id(gateway_id)
            .send()
            .await
            .map_err(|e| self.error(Some(gateway_id), e))?;
        Ok(())
    }

    async fn describe_customer_gateways(
        &self,
        filters: &[Filter],
        _next_token: Option<String>,
    ) -> Result<Page<CustomerGatewayInfo>> {
        let output = self
            .ec2
            .describe_customer_gateways()
            .set_filters(ec2_filters(filters))
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        let mut items = Vec::new();
        for gateway in output.customer_gateways() {
            items.push(CustomerGatewayInfo {
                customer_gateway_id: gateway
                    .customer_gateway_id()
                    .ok_or_else(|| missing(&self.region, "CustomerGatewayId"))?
                    .to_string(),
                gateway_type: gateway.r#type().unwrap_or_default().to_string(),
                ip_address: gateway.ip_address().unwrap_or_default().to_string(),
                bgp_asn: gateway.bgp_asn().unwrap_or_default().to_string(),
                state: gateway.state().unwrap_or_default().to_string(),
                tags: tag_map(gateway.tags()),
            });
        }

        Ok(Page::last(items))
    }

    async fn create_customer_gateway(&self, request: &CreateCustomerGateway) -> Result<String> {
        tracing::debug!(
            "CreateCustomerGateway {} (ASN {}) in region {}",
            request.ip_address,
            request.bgp_asn,
            self.region
        );
        let output = self
            .ec2
            .create_customer_gateway()
            .r#type(GatewayType::from(request.gateway_type.as_str()))
            .ip_address(&request.ip_address)
            .bgp_asn(request.bgp_asn)
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        output
            .customer_gateway()
            .and_then(|gateway| gateway.customer_gateway_id())
            .map(str::to_string)
            .ok_or_else(|| missing(&self.region, "CustomerGatewayId"))
    }

    async fn delete_customer_gateway(&self, gateway_id: &str) -> Result<()> {
        tracing::debug!("DeleteCustomerGateway {} in region {}", gateway_id, self.region);
        self.ec2
            .delete_customer_gateway()
            .customer_gateway_id(gateway_id)
            .send()
            .await
            .map_err(|e| self.error(Some(gateway_id), e))?;
        Ok(())
    }

    async fn describe_vpn_connections(
        &self,
        filters: &[Filter],
        _next_token: Option<String>,
    ) -> Result<Page<VpnConnectionInfo>> {
        let output = self
            .ec2
            .describe_vpn_connections()
            .set_filters(ec2_filters(filters))
            .send()
            .await
            .map_err(|e| self.error(None, e))?;

        let mut items = Vec::new();
        for connection in output.vpn_connections() {
            items.push(VpnConnectionInfo {
                vpn_connection_id: connection
                    .vpn_connection_id()
                    .ok_or_else(|| missing(&self.region, "VpnConnectionId"))?
                    .to_string(),
                connection_type: connection
                    .r#type()
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_default(),
                vpn_gateway_id: connection.vpn_gateway_id().map(str::to_string),
                customer_gateway_id: connection.customer_gateway_id().map(str::to_string),
                routes: connection
                    .routes()
                    .iter()
                    .filter(|r| !r.state().is_some_and(|s| is_deleted_state(s.as_str())))
                    .filter_map(|r| r.destination_cidr_block().map(str::to_string))
                    .collect(),
                static_routes_only: connection
                    .options()
                    .and_then(|o| o.static_routes_only())
                    .unwrap_or(false),
                state: connection
                    .state()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                tags: tag_map(connection.tags()),
            });
        }

        Ok(Page::last(items))
    }

    async fn create_vpn_connection(&self, request: &CreateVpnConnection) -> Result<String> {
        tracing::debug!(
            "CreateVpnConnection {} <-> {} in region {}",
            request.vpn_gateway_id,
            request.customer_gateway_id,
            self.region
        );
        let options = VpnConnectionOptionsSpecification::builder()
            .static_routes_only(request.static_routes_only)
            .build();
        let output = self
            .ec2
            .create_vpn_connection()
            .r#type(&request.connection_type)
            .vpn_gateway_id(&request.vpn_gateway_id)
            .customer_gateway_id(&request.customer_gateway_id)
            .options(options)
            .send()
            .await
            .map_err(|e| self.error(Some(&request.vpn_gateway_id), e))?;

        output
            .vpn_connection()
            .and_then(|connection| connection.vpn_connection_id())
            .map(str::to_string)
            .ok_or_else(|| missing(&self.region, "VpnConnectionId"))
    }

    async fn create_vpn_connection_route(
        &self,
        connection_id: &str,
        destination_cidr_block: &str,
    ) -> Result<()> {
        tracing::debug!(
            "CreateVpnConnectionRoute {} via {} in region {}",
            destination_cidr_block,
            connection_id,
            self.region
        );
        self.ec2
            .create_vpn_connection_route()
            .vpn_connection_id(connection_id)
            .destination_cidr_block(destination_cidr_block)
            .send()
            .await
            .map_err(|e| self.error(Some(connection_id), e))?;
        Ok(())
    }

    async fn delete_vpn_connection(&self, connection_id: &str) -> Result<()> {
        tracing::debug!("DeleteVpnConnection {} in region {}", connection_id, self.region);
        self.ec2
            .delete_vpn_connection()
            .vpn_connection_id(connection_id)
            .send()
            .await
            .map_err(|e| self.error(Some(connection_id), e))?;
        Ok(())
    }

    async fn create_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let tags: Vec<Tag> = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();
        self.ec2
            .create_tags()
            .resources(resource_id)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| self.error(Some(resource_id), e))?;
        Ok(())
    }

    async fn delete_tags(&self, resource_id: &str, keys: &[String]) -> Result<()> {
        let tags: Vec<Tag> = keys.iter().map(|k| Tag::builder().key(k).build()).collect();
        self.ec2
            .delete_tags()
            .resources(resource_id)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| self.error(Some(resource_id), e))?;
        Ok(())
    }
}

impl std::fmt::Debug for AwsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsClient")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}
