//! Action types for cloud resource reconciliation

use crate::model::{DeclaredResource, LiveRecord, ResourceKey};
use crate::schema::Drift;
use serde::{Deserialize, Serialize};

/// Represents a planned action for one declared/live pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Declared present, nothing live
    Create { declared: DeclaredResource },

    /// Declared absent, live match exists
    Destroy { live: LiveRecord },

    /// Nothing to create or destroy
    ///
    /// `drift` lists declared fields that differ from the live record.
    /// Updatable drift is applied by a separate mutator call; read-only
    /// drift is reported and left alone.
    Noop {
        declared: DeclaredResource,
        live: Option<LiveRecord>,
        drift: Vec<Drift>,
    },
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match self {
            Action::Create { .. } => ActionType::Create,
            Action::Destroy { .. } => ActionType::Destroy,
            Action::Noop { .. } => ActionType::NoOp,
        }
    }

    pub fn key(&self) -> ResourceKey {
        match self {
            Action::Create { declared } | Action::Noop { declared, .. } => declared.key(),
            Action::Destroy { live } => live.key(),
        }
    }

    /// Unique identifier for the action
    pub fn id(&self) -> String {
        format!("{}-{}", self.action_type(), self.key())
    }

    /// Description of the action
    pub fn description(&self) -> String {
        let key = self.key();
        let what = format!("{} {} in region {}", key.kind.label(), key.name, key.region);
        match self {
            Action::Create { .. } => format!("create {}", what),
            Action::Destroy { .. } => format!("destroy {}", what),
            Action::Noop { live: None, .. } => format!("{} is already absent", what),
            Action::Noop { drift, .. } if drift.is_empty() => format!("{} is up to date", what),
            Action::Noop { drift, .. } => format!("{} has {} drifted field(s)", what, drift.len()),
        }
    }

    /// Drift that can be fixed in place
    pub fn updatable_drift(&self) -> Vec<&Drift> {
        match self {
            Action::Noop { drift, .. } => drift.iter().filter(|d| !d.is_read_only()).collect(),
            _ => Vec::new(),
        }
    }

    /// Drift on fields that cannot change without destroy+recreate
    pub fn read_only_drift(&self) -> Vec<&Drift> {
        match self {
            Action::Noop { drift, .. } => drift.iter().filter(|d| d.is_read_only()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Delete a resource
    Destroy,
    /// No create or delete needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Destroy => write!(f, "destroy"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// A declared resource the planner refused to pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConflict {
    pub key: ResourceKey,
    pub reason: ConflictReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// More than one live object carries the declared name
    AmbiguousLive { candidates: Vec<String> },
    /// The same key is declared more than once
    DuplicateDeclaration { count: usize },
}

impl std::fmt::Display for PlanConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = &self.key;
        match &self.reason {
            ConflictReason::AmbiguousLive { candidates } => write!(
                f,
                "{} {} in region {} matches {} live objects ({})",
                key.kind.label(),
                key.name,
                key.region,
                candidates.len(),
                candidates.join(", ")
            ),
            ConflictReason::DuplicateDeclaration { count } => write!(
                f,
                "{} {} in region {} is declared {} times",
                key.kind.label(),
                key.name,
                key.region,
                count
            ),
        }
    }
}

/// Result of applying actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Successfully applied actions
    pub succeeded: Vec<ActionResult>,

    /// Failed actions
    pub failed: Vec<ActionResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, action_id: String, message: String) {
        self.succeeded.push(ActionResult {
            action_id,
            success: true,
            message,
            error: None,
        });
    }

    pub fn add_failure(&mut self, action_id: String, error: String) {
        self.failed.push(ActionResult {
            action_id,
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }
}

impl Default for ApplyResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a single action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// ID of the action
    pub action_id: String,

    /// Whether the action succeeded
    pub success: bool,

    /// Success message
    pub message: String,

    /// Error message if failed
    pub error: Option<String>,
}

/// Plan containing all actions to be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Actions in (kind, region, name) order
    pub actions: Vec<Action>,

    /// Declared resources that produced no action
    pub conflicts: Vec<PlanConflict>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>, conflicts: Vec<PlanConflict>) -> Self {
        let has_changes = actions
            .iter()
            .any(|a| a.action_type() != ActionType::NoOp || !a.updatable_drift().is_empty());
        Self {
            actions,
            conflicts,
            has_changes,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type() == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self
                .actions
                .iter()
                .filter(|a| !a.updatable_drift().is_empty())
                .count(),
            destroy: self.actions_by_type(ActionType::Destroy).len(),
            no_change: self
                .actions
                .iter()
                .filter(|a| a.action_type() == ActionType::NoOp && a.updatable_drift().is_empty())
                .count(),
            read_only_drift: self
                .actions
                .iter()
                .filter(|a| !a.read_only_drift().is_empty())
                .count(),
            conflicts: self.conflicts.len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub destroy: usize,
    pub no_change: usize,
    pub read_only_drift: usize,
    pub conflicts: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to destroy, {} unchanged",
            self.create, self.update, self.destroy, self.no_change
        )?;
        if self.read_only_drift > 0 {
            write!(f, ", {} with read-only drift", self.read_only_drift)?;
        }
        if self.conflicts > 0 {
            write!(f, ", {} in conflict", self.conflicts)?;
        }
        Ok(())
    }
}
