//! マニフェスト (宣言リソース一覧) の読み込みと検証

use anyhow::{Context, Result, bail};
use converge_cloud::schema;
use converge_cloud::{DeclaredResource, Ensure, ResourceKind, is_reserved_tag};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default)]
    resources: Vec<DeclaredResource>,
}

/// マニフェストを読み込み、ネットワークに触れずに検証する
pub fn load(path: &Path) -> Result<Vec<DeclaredResource>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("マニフェストを読み込めません: {}", path.display()))?;
    let resources = parse(&content)
        .with_context(|| format!("マニフェストが不正です: {}", path.display()))?;
    tracing::debug!(
        "Loaded {} declared resources from {}",
        resources.len(),
        path.display()
    );
    Ok(resources)
}

pub fn parse(content: &str) -> Result<Vec<DeclaredResource>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let manifest: Manifest = serde_yaml::from_str(content)?;
    validate(&manifest.resources)?;
    Ok(manifest.resources)
}

pub fn validate(resources: &[DeclaredResource]) -> Result<()> {
    let mut errors = Vec::new();
    let mut seen: BTreeMap<_, usize> = BTreeMap::new();

    for resource in resources {
        let label = format!("{} '{}'", resource.kind, resource.name);

        if resource.name.trim().is_empty() {
            errors.push(format!("{} ({}): name が空です", resource.kind, resource.region));
        }
        if resource.region.trim().is_empty() {
            errors.push(format!("{}: region が空です", label));
        }

        for key in resource.attributes.keys() {
            if schema::field_spec(resource.kind, key).is_none() {
                errors.push(format!("{}: 未知の属性 '{}'", label, key));
            }
        }

        if resource.ensure == Ensure::Present {
            for field in schema::required_fields(resource.kind) {
                if resource.optional_str(field).is_none() {
                    errors.push(format!("{}: 必須属性 '{}' がありません", label, field));
                }
            }
        }

        // Name タグはリソースのキーなので上書きさせない
        if let Some(serde_json::Value::Object(tags)) = resource.attributes.get("tags") {
            for key in tags.keys().filter(|k| is_reserved_tag(k)) {
                errors.push(format!("{}: タグ '{}' は予約されています", label, key));
            }
        }

        if resource.kind == ResourceKind::Vpn
            && !resource.string_list("routes").is_empty()
            && !resource.flag("static_routes")
        {
            errors.push(format!(
                "{}: routes を使うには static_routes: true が必要です",
                label
            ));
        }

        *seen.entry(resource.key()).or_default() += 1;
    }

    for (key, count) in seen {
        if count > 1 {
            errors.push(format!("{} が {} 回宣言されています", key, count));
        }
    }

    if !errors.is_empty() {
        bail!("{}", errors.join("\n"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let resources = parse(
            r#"
resources:
  - kind: launch_configuration
    name: cfg-1
    region: us-east-1
    image_id: ami-1
    instance_type: t2.micro
    security_groups: [web]
    key_name: false
  - kind: vpc
    name: env-vpc
    region: sa-east-1
    cidr_block: 10.0.0.0/16
    tags:
      department: engineering
  - kind: subnet
    name: old
    region: sa-east-1
    ensure: absent
"#,
        )
        .unwrap();

        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0].kind, ResourceKind::LaunchConfiguration);
        assert_eq!(resources[0].string_list("security_groups"), vec!["web"]);
        assert_eq!(resources[0].optional_str("key_name"), None);
        assert_eq!(resources[1].tags()["department"], "engineering");
        assert_eq!(resources[2].ensure, Ensure::Absent);
    }

    #[test]
    fn test_empty_manifest() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("resources: []").unwrap().is_empty());
    }

    #[test]
    fn test_missing_required_attribute() {
        let err = parse(
            "resources:\n  - kind: vpc\n    name: main\n    region: us-east-1\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cidr_block"));
    }

    #[test]
    fn test_absent_needs_no_attributes() {
        let resources = parse(
            "resources:\n  - kind: vpc\n    name: main\n    region: us-east-1\n    ensure: absent\n",
        )
        .unwrap();
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn test_unknown_attribute_and_kind() {
        let err = parse(
            "resources:\n  - kind: vpc\n    name: main\n    region: us-east-1\n    cidr_block: 10.0.0.0/16\n    image_id: ami-1\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("image_id"));

        assert!(parse("resources:\n  - kind: router\n    name: r\n    region: us-east-1\n").is_err());
    }

    #[test]
    fn test_duplicate_declaration() {
        let err = parse(
            "resources:\n  - {kind: vpc, name: main, region: us-east-1, cidr_block: 10.0.0.0/16}\n  - {kind: vpc, name: main, region: us-east-1, cidr_block: 10.1.0.0/16}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("vpc:us-east-1:main"));
    }

    #[test]
    fn test_reserved_tag_keys_are_rejected() {
        let err = parse(
            r#"
resources:
  - kind: vpc
    name: env-vpc
    region: us-east-1
    cidr_block: 10.0.0.0/16
    tags:
      Name: other
      "aws:createdBy": me
      team: net
"#,
        )
        .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("'Name'"));
        assert!(message.contains("'aws:createdBy'"));
        assert!(!message.contains("'team'"));
    }

    #[test]
    fn test_vpn_environment() {
        let resources = parse(
            r#"
resources:
  - {kind: vpc, name: env-vpc, region: sa-east-1, cidr_block: 10.0.0.0/16}
  - {kind: internet_gateway, name: env-igw, region: sa-east-1, vpc: env-vpc}
  - {kind: vpn_gateway, name: env-vgw, region: sa-east-1, vpc: env-vpc, type: ipsec.1}
  - kind: customer_gateway
    name: env-cgw
    region: sa-east-1
    ip_address: 203.0.113.12
    bgp_asn: "65000"
  - kind: vpn
    name: env-vpn
    region: sa-east-1
    vpn_gateway: env-vgw
    customer_gateway: env-cgw
    type: ipsec.1
    routes: 0.0.0.0/0
    static_routes: "true"
"#,
        )
        .unwrap();

        assert_eq!(resources.len(), 5);
        assert_eq!(resources[3].kind, ResourceKind::CustomerGateway);
        assert_eq!(resources[4].string_list("routes"), vec!["0.0.0.0/0"]);
        assert!(resources[4].flag("static_routes"));
    }

    #[test]
    fn test_routes_require_static_routing() {
        let err = parse(
            "resources:\n  - {kind: vpn, name: v, region: us-east-1, vpn_gateway: g, customer_gateway: c, routes: [0.0.0.0/0]}\n",
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("static_routes"));
    }
}
