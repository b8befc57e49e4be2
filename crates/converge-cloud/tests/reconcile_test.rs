//! End-to-end reconciliation cycles against the in-memory cloud

use converge_cloud::memory::InMemoryCloud;
use converge_cloud::{
    Action, ActionType, CloudError, DeclaredResource, Ensure, ReconcileOptions, Reconciler,
    RegionClients, ResourceKind,
};
use serde_json::json;
use std::sync::Arc;

fn cfg_1(region: &str) -> DeclaredResource {
    DeclaredResource::new(ResourceKind::LaunchConfiguration, "cfg-1", region)
        .with_attribute("image_id", json!("ami-1"))
        .with_attribute("instance_type", json!("t2.micro"))
        .with_attribute("security_groups", json!(["web"]))
}

fn reconciler(clouds: &[&Arc<InMemoryCloud>]) -> Reconciler {
    let mut clients = RegionClients::new();
    for cloud in clouds {
        clients.insert(Arc::clone(cloud) as Arc<dyn converge_cloud::CloudClient>);
    }
    Reconciler::new(clients)
}

#[tokio::test]
async fn test_create_then_converged() {
    let cloud = Arc::new(InMemoryCloud::new("us-east-1"));
    let web = cloud.add_security_group("web", None);
    let reconciler = reconciler(&[&cloud]);

    let report = reconciler.run(&[cfg_1("us-east-1")]).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.plan.actions[0].action_type(), ActionType::Create);
    assert_eq!(report.apply.succeeded.len(), 1);

    let requests = cloud.create_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].name, "cfg-1");
    assert_eq!(requests[0].security_group_ids, vec![web]);

    // a second cycle sees the configuration and leaves it alone
    let report = reconciler.run(&[cfg_1("us-east-1")]).await.unwrap();
    assert!(!report.plan.has_changes);
    match &report.plan.actions[..] {
        [Action::Noop { live, drift, .. }] => {
            assert!(live.is_some());
            assert!(drift.is_empty());
        }
        other => panic!("Expected a single Noop, got {other:?}"),
    }
    assert_eq!(cloud.create_requests().len(), 1);
}

#[tokio::test]
async fn test_destroy_then_absent() {
    let cloud = Arc::new(InMemoryCloud::new("us-east-1"));
    cloud.add_launch_configuration("cfg-1", "ami-1", "t2.micro", &[]);
    let reconciler = reconciler(&[&cloud]);
    let absent = cfg_1("us-east-1").with_ensure(Ensure::Absent);

    let report = reconciler.run(std::slice::from_ref(&absent)).await.unwrap();
    assert_eq!(report.plan.summary().destroy, 1);
    assert!(report.is_success());
    assert!(cloud.launch_configurations().is_empty());

    let report = reconciler.run(&[absent]).await.unwrap();
    match &report.plan.actions[..] {
        [Action::Noop { live: None, .. }] => {}
        other => panic!("Expected a Noop without live match, got {other:?}"),
    }
    assert!(report.apply.succeeded.is_empty());
}

#[tokio::test]
async fn test_same_name_in_other_region_is_not_matched() {
    let east = Arc::new(InMemoryCloud::new("us-east-1"));
    let west = Arc::new(InMemoryCloud::new("us-west-2"));
    east.add_security_group("web", None);
    west.add_launch_configuration("cfg-1", "ami-1", "t2.micro", &[]);
    let reconciler = reconciler(&[&east, &west]);

    let report = reconciler.run(&[cfg_1("us-east-1")]).await.unwrap();
    assert!(report.is_success());
    assert_eq!(east.launch_configurations().len(), 1);
    assert_eq!(west.launch_configurations().len(), 1);
    assert!(west.create_requests().is_empty());
}

#[tokio::test]
async fn test_authentication_failure_aborts_before_mutation() {
    let east = Arc::new(InMemoryCloud::new("us-east-1"));
    let west = Arc::new(InMemoryCloud::new("us-west-2"));
    east.add_security_group("web", None);
    west.fail_auth("expired token");
    let reconciler = reconciler(&[&east, &west]);

    let err = reconciler.run(&[cfg_1("us-east-1")]).await.unwrap_err();
    assert!(matches!(err, CloudError::AuthenticationFailed { .. }));
    assert!(err.to_string().contains("us-west-2"));
    assert!(east.create_requests().is_empty());
}

#[tokio::test]
async fn test_authentication_failure_during_listing_aborts() {
    let east = Arc::new(InMemoryCloud::new("us-east-1"));
    let west = Arc::new(InMemoryCloud::new("us-west-2"));
    east.add_security_group("web", None);
    west.fail_listing(CloudError::AuthenticationFailed {
        region: "us-west-2".to_string(),
        message: "AuthFailure".to_string(),
    });
    let reconciler = reconciler(&[&east, &west]);

    let err = reconciler.run(&[cfg_1("us-east-1")]).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(east.create_requests().is_empty());
}

#[tokio::test]
async fn test_failed_region_does_not_block_others() {
    let east = Arc::new(InMemoryCloud::new("us-east-1"));
    let west = Arc::new(InMemoryCloud::new("us-west-2"));
    east.add_security_group("web", None);
    west.fail_listing(CloudError::api("us-west-2", "RequestLimitExceeded"));
    let reconciler = reconciler(&[&east, &west]);

    let report = reconciler
        .run(&[cfg_1("us-east-1"), cfg_1("us-west-2")])
        .await
        .unwrap();

    assert_eq!(report.region_failures.len(), 1);
    assert!(report.region_failures[0].error.contains("RequestLimitExceeded"));
    assert_eq!(east.launch_configurations().len(), 1);
    assert!(west.create_requests().is_empty());
    assert_eq!(report.apply.succeeded.len(), 1);
    assert_eq!(report.apply.failed.len(), 1);
}

#[tokio::test]
async fn test_unresolved_group_fails_only_that_resource() {
    let cloud = Arc::new(InMemoryCloud::new("us-east-1"));
    cloud.add_security_group("web", None);
    let reconciler = reconciler(&[&cloud]);

    let broken = DeclaredResource::new(ResourceKind::LaunchConfiguration, "cfg-2", "us-east-1")
        .with_attribute("image_id", json!("ami-1"))
        .with_attribute("instance_type", json!("t2.micro"))
        .with_attribute("security_groups", json!(["web", "db"]));

    let report = reconciler
        .run(&[cfg_1("us-east-1"), broken])
        .await
        .unwrap();

    assert_eq!(report.apply.succeeded.len(), 1);
    assert_eq!(report.apply.failed.len(), 1);
    let error = report.apply.failed[0].error.as_deref().unwrap();
    assert!(error.contains("cfg-2"));
    assert!(error.contains("db"));
    assert_eq!(cloud.launch_configurations().len(), 1);
}

#[tokio::test]
async fn test_read_only_drift_is_left_alone() {
    let cloud = Arc::new(InMemoryCloud::new("us-east-1"));
    let web = cloud.add_security_group("web", None);
    cloud.add_launch_configuration("cfg-1", "ami-1", "t2.micro", &[web.as_str()]);
    let reconciler = reconciler(&[&cloud]);

    let declared = cfg_1("us-east-1").with_attribute("image_id", json!("ami-2"));
    let report = reconciler.run(&[declared]).await.unwrap();

    let action = &report.plan.actions[0];
    assert_eq!(action.action_type(), ActionType::NoOp);
    assert_eq!(action.read_only_drift()[0].field, "image_id");
    assert!(!report.plan.has_changes);
    assert!(cloud.create_requests().is_empty());
    assert_eq!(cloud.launch_configurations()[0].image_id, "ami-1");
}

#[tokio::test]
async fn test_vpc_and_subnet_lifecycle() {
    let cloud = Arc::new(InMemoryCloud::new("sa-east-1"));
    let reconciler = reconciler(&[&cloud]);

    let vpc = |tags: serde_json::Value| {
        DeclaredResource::new(ResourceKind::Vpc, "env-vpc", "sa-east-1")
            .with_attribute("cidr_block", json!("10.0.0.0/16"))
            .with_attribute("tags", tags)
    };
    let subnet = DeclaredResource::new(ResourceKind::Subnet, "env-subnet", "sa-east-1")
        .with_attribute("vpc", json!("env-vpc"))
        .with_attribute("cidr_block", json!("10.0.0.0/24"));

    // the subnet sorts after its VPC, so both are created in one cycle
    let report = reconciler
        .run(&[subnet.clone(), vpc(json!({"department": "engineering"}))])
        .await
        .unwrap();
    assert!(report.is_success(), "{:?}", report.apply.failed);
    assert_eq!(cloud.vpcs().len(), 1);
    assert_eq!(cloud.subnets()[0].vpc_id, cloud.vpcs()[0].vpc_id);

    // tag drift is fixed in place
    let report = reconciler
        .run(&[subnet.clone(), vpc(json!({"department": "finance", "foo": "bar"}))])
        .await
        .unwrap();
    assert_eq!(report.plan.summary().update, 1);
    assert!(report.is_success());
    let tags = &cloud.vpcs()[0].tags;
    assert_eq!(tags["department"], "finance");
    assert_eq!(tags["foo"], "bar");
    assert_eq!(tags["Name"], "env-vpc");

    let report = reconciler
        .run(&[subnet.clone(), vpc(json!({"department": "finance", "foo": "bar"}))])
        .await
        .unwrap();
    assert!(!report.plan.has_changes);

    // teardown removes the subnet before the VPC
    let report = reconciler
        .run(&[
            subnet.with_ensure(Ensure::Absent),
            vpc(json!({})).with_ensure(Ensure::Absent),
        ])
        .await
        .unwrap();
    assert!(report.is_success(), "{:?}", report.apply.failed);
    assert!(cloud.vpcs().is_empty());
    assert!(cloud.subnets().is_empty());
}

#[tokio::test]
async fn test_duplicate_vpc_names_are_a_conflict() {
    let cloud = Arc::new(InMemoryCloud::new("us-east-1"));
    cloud.add_vpc("main", "10.0.0.0/16");
    cloud.add_vpc("main", "10.1.0.0/16");
    let reconciler = reconciler(&[&cloud]);

    let declared = DeclaredResource::new(ResourceKind::Vpc, "main", "us-east-1")
        .with_ensure(Ensure::Absent);
    let report = reconciler.run(&[declared]).await.unwrap();

    assert!(report.plan.actions.is_empty());
    assert_eq!(report.plan.conflicts.len(), 1);
    assert!(!report.is_success());
    assert_eq!(cloud.vpcs().len(), 2);
}

#[tokio::test]
async fn test_discovery_follows_pagination() {
    let cloud = Arc::new(InMemoryCloud::new("us-east-1").with_page_size(2));
    for i in 0..5 {
        cloud.add_launch_configuration(&format!("cfg-{i}"), "ami-1", "t2.micro", &[]);
    }
    let reconciler = reconciler(&[&cloud]).with_options(ReconcileOptions {
        dry_run: true,
        ..Default::default()
    });

    let declared: Vec<_> = (0..5)
        .map(|i| {
            DeclaredResource::new(ResourceKind::LaunchConfiguration, format!("cfg-{i}"), "us-east-1")
                .with_ensure(Ensure::Absent)
        })
        .collect();
    let report = reconciler.run(&declared).await.unwrap();

    assert_eq!(report.plan.summary().destroy, 5);
    assert_eq!(cloud.launch_configurations().len(), 5);
}

#[tokio::test]
async fn test_reserved_tag_keys_do_not_rename_the_vpc() {
    let cloud = Arc::new(InMemoryCloud::new("us-east-1"));
    let reconciler = reconciler(&[&cloud]);
    let vpc = DeclaredResource::new(ResourceKind::Vpc, "env-vpc", "us-east-1")
        .with_attribute("cidr_block", json!("10.0.0.0/16"))
        .with_attribute("tags", json!({"Name": "other", "team": "net"}));

    let report = reconciler.run(std::slice::from_ref(&vpc)).await.unwrap();
    assert!(report.is_success(), "{:?}", report.apply.failed);
    assert_eq!(report.plan.summary().create, 1);

    for _ in 0..3 {
        let report = reconciler.run(std::slice::from_ref(&vpc)).await.unwrap();
        assert!(!report.plan.has_changes, "{:?}", report.plan.actions);
    }

    let vpcs = cloud.vpcs();
    assert_eq!(vpcs.len(), 1);
    assert_eq!(vpcs[0].name(), Some("env-vpc"));
    assert_eq!(vpcs[0].tags["team"], "net");
}

#[tokio::test]
async fn test_inconclusive_credential_check_is_isolated() {
    let east = Arc::new(InMemoryCloud::new("us-east-1"));
    let west = Arc::new(InMemoryCloud::new("us-west-2"));
    west.fail_auth_check(CloudError::api("us-west-2", "RequestLimitExceeded"));
    let reconciler = reconciler(&[&east, &west]);

    let vpc = DeclaredResource::new(ResourceKind::Vpc, "env-vpc", "us-east-1")
        .with_attribute("cidr_block", json!("10.0.0.0/16"));
    let report = reconciler.run(&[vpc]).await.unwrap();

    assert_eq!(east.vpcs().len(), 1);
    assert!(report.apply.is_success());
    assert_eq!(report.region_failures.len(), 1);
    assert_eq!(report.region_failures[0].region, "us-west-2");
    assert_eq!(report.region_failures[0].kind, None);
    assert!(report.region_failures[0].error.contains("RequestLimitExceeded"));
    assert!(!report.is_success());

    // only the credential check reached the failing region
    assert_eq!(west.calls(), 1);
}

fn vpn_environment(region: &str, ensure: Ensure) -> Vec<DeclaredResource> {
    let resource = |kind, name: &str| DeclaredResource::new(kind, name, region).with_ensure(ensure);
    vec![
        resource(ResourceKind::Vpc, "env-vpc")
            .with_attribute("cidr_block", json!("10.0.0.0/16"))
            .with_attribute("tags", json!({"department": "engineering"})),
        resource(ResourceKind::InternetGateway, "env-igw")
            .with_attribute("vpc", json!("env-vpc"))
            .with_attribute("tags", json!({"department": "engineering"})),
        resource(ResourceKind::VpnGateway, "env-vgw")
            .with_attribute("vpc", json!("env-vpc"))
            .with_attribute("type", json!("ipsec.1")),
        resource(ResourceKind::CustomerGateway, "env-cgw")
            .with_attribute("ip_address", json!("203.0.113.12"))
            .with_attribute("bgp_asn", json!("65000"))
            .with_attribute("type", json!("ipsec.1")),
        resource(ResourceKind::Vpn, "env-vpn")
            .with_attribute("vpn_gateway", json!("env-vgw"))
            .with_attribute("customer_gateway", json!("env-cgw"))
            .with_attribute("type", json!("ipsec.1"))
            .with_attribute("routes", json!("0.0.0.0/0"))
            .with_attribute("static_routes", json!("true")),
    ]
}

#[tokio::test]
async fn test_vpn_environment_lifecycle() {
    let cloud = Arc::new(InMemoryCloud::new("sa-east-1"));
    let reconciler = reconciler(&[&cloud]);

    let report = reconciler
        .run(&vpn_environment("sa-east-1", Ensure::Present))
        .await
        .unwrap();
    assert!(report.is_success(), "{:?}", report.apply.failed);
    assert_eq!(report.plan.summary().create, 5);

    let vpc_id = cloud.vpcs()[0].vpc_id.clone();
    assert_eq!(cloud.internet_gateways()[0].attachments, vec![vpc_id.clone()]);
    assert_eq!(cloud.vpn_gateways()[0].attachments, vec![vpc_id]);
    let vpn = &cloud.vpn_connections()[0];
    assert_eq!(vpn.vpn_gateway_id.as_deref(), Some(cloud.vpn_gateways()[0].vpn_gateway_id.as_str()));
    assert_eq!(vpn.routes, vec!["0.0.0.0/0"]);
    assert!(vpn.static_routes_only);

    // everything created above reads back as declared
    let report = reconciler
        .run(&vpn_environment("sa-east-1", Ensure::Present))
        .await
        .unwrap();
    assert!(!report.plan.has_changes, "{:?}", report.plan.actions);

    // teardown runs dependents first: connection, gateways, then the VPC
    let report = reconciler
        .run(&vpn_environment("sa-east-1", Ensure::Absent))
        .await
        .unwrap();
    assert!(report.is_success(), "{:?}", report.apply.failed);
    assert_eq!(report.plan.summary().destroy, 5);
    assert!(cloud.vpcs().is_empty());
    assert!(cloud.internet_gateways().is_empty());
    assert!(cloud.vpn_gateways().iter().all(|g| g.state == "deleted"));
    assert!(cloud.customer_gateways().iter().all(|g| g.state == "deleted"));
    assert!(cloud.vpn_connections().iter().all(|c| c.state == "deleted"));

    let report = reconciler
        .run(&vpn_environment("sa-east-1", Ensure::Absent))
        .await
        .unwrap();
    assert!(!report.plan.has_changes);
    assert!(report.apply.succeeded.is_empty());
}
