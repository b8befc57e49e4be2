//! Matching declared resources against live records

use crate::action::{Action, ConflictReason, Plan, PlanConflict};
use crate::inventory::Inventory;
use crate::model::{DeclaredResource, Ensure, ResourceKey};
use crate::schema;
use std::collections::BTreeMap;

/// Pair each declared resource with at most one live record and classify it
///
/// Matching is by `(kind, region, name)`, so a resource never matches a live
/// record from another region. The result does not depend on the order of
/// `declared`: actions come out sorted by key. Live records nobody declared
/// are left alone.
pub fn plan(declared: &[DeclaredResource], inventory: &Inventory) -> Plan {
    let mut by_key: BTreeMap<ResourceKey, Vec<&DeclaredResource>> = BTreeMap::new();
    for resource in declared {
        by_key.entry(resource.key()).or_default().push(resource);
    }

    let mut actions = Vec::with_capacity(by_key.len());
    let mut conflicts = Vec::new();

    for (key, resources) in by_key {
        let [resource] = resources.as_slice() else {
            conflicts.push(PlanConflict {
                key,
                reason: ConflictReason::DuplicateDeclaration {
                    count: resources.len(),
                },
            });
            continue;
        };

        if inventory.is_ambiguous(&key) {
            let mut candidates: Vec<String> = inventory
                .candidates(&key)
                .iter()
                .map(|r| r.remote_id().to_string())
                .collect();
            candidates.sort();
            conflicts.push(PlanConflict {
                key,
                reason: ConflictReason::AmbiguousLive { candidates },
            });
            continue;
        }

        actions.push(classify(resource, inventory));
    }

    for conflict in &conflicts {
        tracing::warn!("Skipping conflicting resource: {}", conflict);
    }

    Plan::new(actions, conflicts)
}

fn classify(declared: &DeclaredResource, inventory: &Inventory) -> Action {
    let live = inventory.present(&declared.key());

    match (declared.ensure, live) {
        (Ensure::Absent, Some(live)) => Action::Destroy { live: live.clone() },
        (Ensure::Absent, None) => Action::Noop {
            declared: declared.clone(),
            live: None,
            drift: Vec::new(),
        },
        (Ensure::Present, None) => Action::Create {
            declared: declared.clone(),
        },
        (Ensure::Present, Some(live)) => {
            let drift = schema::diff(declared.kind, &declared.attributes, &live.attributes);
            for d in drift.iter().filter(|d| d.is_read_only()) {
                tracing::warn!(
                    "{} {} in region {}: read-only field {} differs and will not be changed",
                    declared.kind.label(),
                    declared.name,
                    declared.region,
                    d.field
                );
            }
            Action::Noop {
                declared: declared.clone(),
                live: Some(live.clone()),
                drift,
            }
        }
    }
}
