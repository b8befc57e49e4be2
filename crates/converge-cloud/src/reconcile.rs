//! One reconciliation cycle: discover, plan, mutate

use crate::action::{Action, ApplyResult, Plan};
use crate::client::RegionClients;
use crate::discovery::{self, Discovery, RegionFailure};
use crate::error::{CloudError, Result};
use crate::inventory::Inventory;
use crate::model::{DeclaredResource, ResourceKind};
use crate::mutator::Mutator;
use crate::planner;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;

/// Default number of concurrent region scans
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Upper bound on concurrent discovery scans
    pub concurrency: usize,
    /// Stop after planning
    pub dry_run: bool,
    /// Allow mutations in regions whose discovery failed
    pub mutate_failed_regions: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
            mutate_failed_regions: false,
        }
    }
}

/// Outcome of one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub plan: Plan,
    pub apply: ApplyResult,
    pub region_failures: Vec<RegionFailure>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.apply.is_success() && self.region_failures.is_empty() && self.plan.conflicts.is_empty()
    }
}

/// Drives discover → plan → mutate over a set of regional clients
pub struct Reconciler {
    clients: RegionClients,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(clients: RegionClients) -> Self {
        Self {
            clients,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn clients(&self) -> &RegionClients {
        &self.clients
    }

    /// Verify credentials in every configured region
    ///
    /// Rejected credentials abort with an error. A region whose check could
    /// not complete for another reason is returned as a failure so the caller
    /// can leave it out of the cycle.
    pub async fn check_auth(&self) -> Result<Vec<RegionFailure>> {
        if self.clients.is_empty() {
            return Err(CloudError::InvalidConfig("no regions configured".to_string()));
        }

        let mut failures = Vec::new();
        for client in self.clients.iter() {
            let status = match client.check_auth().await {
                Ok(status) => status,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Credential check failed in region {}, skipping the region: {}",
                        client.region(),
                        e
                    );
                    failures.push(RegionFailure::credential_check(client.region(), e));
                    continue;
                }
            };
            if !status.authenticated {
                return Err(CloudError::AuthenticationFailed {
                    region: client.region().to_string(),
                    message: status.error.unwrap_or_else(|| "not authenticated".to_string()),
                });
            }
            tracing::debug!(
                "Authenticated in region {}: {}",
                client.region(),
                status.account_info.as_deref().unwrap_or("unknown account")
            );
        }
        Ok(failures)
    }

    /// Discover every kind that appears in `declared` through `clients`
    async fn discover(
        &self,
        declared: &[DeclaredResource],
        clients: &RegionClients,
    ) -> Result<Discovery> {
        let kinds: Vec<ResourceKind> = declared
            .iter()
            .map(|d| d.kind)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        discovery::discover_kinds(&kinds, clients, self.options.concurrency).await
    }

    /// Execute a plan's mutations sequentially
    ///
    /// Destroys run first in reverse dependency order, then creates and
    /// in-place updates in dependency order. A failing action is recorded and
    /// the remaining actions still run.
    pub async fn apply(
        &self,
        plan: &Plan,
        inventory: &mut Inventory,
        failed_regions: &BTreeSet<String>,
    ) -> ApplyResult {
        let start = Instant::now();
        let mut result = ApplyResult::new();

        let destroys = plan
            .actions
            .iter()
            .rev()
            .filter(|a| matches!(a, Action::Destroy { .. }));
        let others = plan
            .actions
            .iter()
            .filter(|a| !matches!(a, Action::Destroy { .. }));

        for action in destroys.chain(others) {
            match self.execute(action, inventory, failed_regions).await {
                Ok(Some(message)) => result.add_success(action.id(), message),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Failed to {}: {}", action.description(), e);
                    result.add_failure(action.id(), e.to_string());
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    async fn execute(
        &self,
        action: &Action,
        inventory: &mut Inventory,
        failed_regions: &BTreeSet<String>,
    ) -> Result<Option<String>> {
        let updates = action.updatable_drift();
        if matches!(action, Action::Noop { .. }) && updates.is_empty() {
            return Ok(None);
        }

        let key = action.key();
        let context = |e: CloudError| e.for_resource(key.kind, &key.name, &key.region);

        if failed_regions.contains(&key.region) && !self.options.mutate_failed_regions {
            return Err(context(CloudError::DiscoveryFailed {
                region: key.region.clone(),
            }));
        }
        let client = self.clients.get(&key.region).map_err(context)?;
        let mutator = Mutator::new(client.as_ref());

        tracing::info!(
            "Checking if {} {} exists in region {}",
            key.kind.label(),
            key.name,
            key.region
        );

        match action {
            Action::Create { declared } => {
                if inventory.exists(&key) {
                    return Ok(Some(format!("{} already exists", key)));
                }
                mutator.create(declared, inventory).await?;
                Ok(Some(format!("created {}", key)))
            }
            Action::Destroy { live } => {
                mutator.destroy(live, inventory).await?;
                Ok(Some(format!("destroyed {}", key)))
            }
            Action::Noop { live: Some(live), .. } => {
                mutator.update(live, &updates, inventory).await?;
                Ok(Some(format!("updated {}", key)))
            }
            Action::Noop { live: None, .. } => Ok(None),
        }
    }

    /// Run one full cycle
    ///
    /// Credentials are checked before anything else and rejected credentials
    /// abort the cycle before any mutation. A region whose check or discovery
    /// fails otherwise is reported and left unmutated while the others proceed.
    pub async fn run(&self, declared: &[DeclaredResource]) -> Result<CycleReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut region_failures = self.check_auth().await?;
        let reachable = {
            let unchecked: BTreeSet<&str> =
                region_failures.iter().map(|f| f.region.as_str()).collect();
            self.clients.without(&unchecked)
        };

        for region in declared
            .iter()
            .map(|d| d.region.as_str())
            .collect::<BTreeSet<_>>()
        {
            if self.clients.get(region).is_err() {
                tracing::warn!(
                    "Region {} is declared but not configured; its resources cannot be changed",
                    region
                );
            }
        }

        let (mut inventory, discovery_failures) =
            self.discover(declared, &reachable).await?.into_inventory();
        region_failures.extend(discovery_failures);
        let failed_regions: BTreeSet<String> =
            region_failures.iter().map(|f| f.region.clone()).collect();

        let plan = planner::plan(declared, &inventory);
        tracing::info!("Plan: {}", plan.summary());

        let apply = if self.options.dry_run {
            tracing::info!("Dry run, no changes applied");
            ApplyResult::new()
        } else {
            self.apply(&plan, &mut inventory, &failed_regions).await
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Cycle finished in {}ms: {} succeeded, {} failed",
            duration_ms,
            apply.succeeded.len(),
            apply.failed.len()
        );

        Ok(CycleReport {
            plan,
            apply,
            region_failures,
            started_at,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::memory::InMemoryCloud;
    use crate::model::{Ensure, LiveRecord};
    use serde_json::json;
    use std::sync::Arc;

    fn lc(name: &str, region: &str) -> DeclaredResource {
        DeclaredResource::new(ResourceKind::LaunchConfiguration, name, region)
            .with_attribute("image_id", json!("ami-1"))
            .with_attribute("instance_type", json!("t2.micro"))
    }

    #[tokio::test]
    async fn test_apply_orders_destroys_before_creates() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1"));
        let vpc_id = cloud.add_vpc("old", "10.1.0.0/16");
        cloud.add_subnet("old-a", &vpc_id, "10.1.0.0/24", None);

        let reconciler = Reconciler::new(RegionClients::new().with(cloud.clone()));
        let declared = vec![
            DeclaredResource::new(ResourceKind::Vpc, "old", "us-east-1").with_ensure(Ensure::Absent),
            DeclaredResource::new(ResourceKind::Subnet, "old-a", "us-east-1")
                .with_ensure(Ensure::Absent),
        ];

        let report = reconciler.run(&declared).await.unwrap();

        // the subnet must go before its VPC or the VPC delete is rejected
        assert!(report.is_success(), "{:?}", report.apply.failed);
        assert!(cloud.vpcs().is_empty());
        assert!(cloud.subnets().is_empty());
    }

    #[tokio::test]
    async fn test_failed_region_is_not_mutated() {
        let east = Arc::new(InMemoryCloud::new("us-east-1"));
        let west = Arc::new(InMemoryCloud::new("us-west-2"));
        west.fail_listing(CloudError::api("us-west-2", "Throttling"));

        let reconciler = Reconciler::new(
            RegionClients::new()
                .with(east.clone())
                .with(west.clone()),
        );
        let report = reconciler
            .run(&[lc("a", "us-east-1"), lc("b", "us-west-2")])
            .await
            .unwrap();

        assert_eq!(report.region_failures.len(), 1);
        assert_eq!(report.region_failures[0].region, "us-west-2");
        assert_eq!(east.launch_configurations().len(), 1);
        assert!(west.create_requests().is_empty());
        assert_eq!(report.apply.failed.len(), 1);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_failed_region_mutated_when_allowed() {
        let west = Arc::new(InMemoryCloud::new("us-west-2"));
        west.fail_listing(CloudError::api("us-west-2", "Throttling"));

        let reconciler = Reconciler::new(RegionClients::new().with(west.clone())).with_options(
            ReconcileOptions {
                mutate_failed_regions: true,
                ..Default::default()
            },
        );
        let report = reconciler.run(&[lc("b", "us-west-2")]).await.unwrap();

        assert!(report.apply.is_success());
        assert_eq!(west.create_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_region_fails_the_action() {
        let east = Arc::new(InMemoryCloud::new("us-east-1"));
        let reconciler = Reconciler::new(RegionClients::new().with(east.clone()));

        let report = reconciler.run(&[lc("a", "eu-west-1")]).await.unwrap();

        assert_eq!(report.plan.actions[0].action_type(), ActionType::Create);
        assert_eq!(report.apply.failed.len(), 1);
        let error = report.apply.failed[0].error.as_deref().unwrap();
        assert!(error.contains("eu-west-1"));
        assert!(east.create_requests().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1"));
        let reconciler = Reconciler::new(RegionClients::new().with(cloud.clone())).with_options(
            ReconcileOptions {
                dry_run: true,
                ..Default::default()
            },
        );

        let report = reconciler.run(&[lc("a", "us-east-1")]).await.unwrap();
        assert!(report.plan.has_changes);
        assert!(report.apply.succeeded.is_empty());
        assert!(cloud.create_requests().is_empty());
    }

    #[tokio::test]
    async fn test_no_regions_is_an_error() {
        let reconciler = Reconciler::new(RegionClients::new());
        let err = reconciler.run(&[]).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_apply_skips_noops() {
        let cloud = Arc::new(InMemoryCloud::new("us-east-1"));
        let reconciler = Reconciler::new(RegionClients::new().with(cloud.clone()));
        let live = LiveRecord::new(ResourceKind::LaunchConfiguration, "a", "us-east-1")
            .with_attribute("image_id", json!("ami-1"))
            .with_attribute("instance_type", json!("t2.micro"));
        let mut inventory = Inventory::from_records([live]);
        let plan = planner::plan(&[lc("a", "us-east-1")], &inventory);

        let result = reconciler
            .apply(&plan, &mut inventory, &BTreeSet::new())
            .await;
        assert!(result.succeeded.is_empty());
        assert!(result.failed.is_empty());
        assert_eq!(cloud.calls(), 0);
    }

    #[tokio::test]
    async fn test_inconclusive_credential_check_skips_only_that_region() {
        let east = Arc::new(InMemoryCloud::new("us-east-1"));
        let west = Arc::new(InMemoryCloud::new("us-west-2"));
        west.fail_auth_check(CloudError::api("us-west-2", "RequestLimitExceeded"));

        let reconciler = Reconciler::new(RegionClients::new().with(east.clone()).with(west.clone()));
        let failures = reconciler.check_auth().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].region, "us-west-2");
        assert_eq!(failures[0].kind, None);

        west.fail_auth("expired token");
        let err = reconciler.check_auth().await.unwrap_err();
        assert!(err.is_fatal());
    }
}
