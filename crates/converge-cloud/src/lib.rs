//! Converge Cloud Reconciliation
//!
//! This crate turns a set of declared resources into the remote calls that
//! make a cloud account match them.
//!
//! # Supported Kinds
//!
//! - **Launch configurations**: immutable, addressed by name
//! - **VPCs**: matched by their `Name` tag, tags updated in place
//! - **Subnets**: matched by their `Name` tag, reference a VPC by name
//! - **Internet and VPN gateways**: attached to a VPC named in the declaration
//! - **Customer gateways**: the on-premises end of a VPN
//! - **VPN connections**: reference both gateways by name, optional static routes
//!
//! The `Name` tag is the resource key, so declared tags can never set it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Converge CLI                    │
//! │            (converge plan / apply)               │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                converge-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   Reconciler: discover → plan → mutate    │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Inventory   │  │   Resolver   │            │
//! │  └──────────────┘  └──────────────┘            │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   trait CloudClient { ... } (per region)  │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ converge-     │ │   memory      │
//! │ cloud-aws     │ │ (tests/dry)   │
//! └───────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod client;
pub mod discovery;
pub mod error;
pub mod inventory;
pub mod memory;
pub mod model;
pub mod mutator;
pub mod planner;
pub mod reconcile;
pub mod resolver;
pub mod schema;

// Re-exports
pub use action::{
    Action, ActionResult, ActionType, ApplyResult, ConflictReason, Plan, PlanConflict, PlanSummary,
};
pub use client::{AuthStatus, CloudClient, Filter, Page, RegionClients};
pub use discovery::{Discovery, RegionFailure};
pub use error::{CloudError, Result};
pub use inventory::Inventory;
pub use model::{
    is_reserved_tag, Attributes, DeclaredResource, Ensure, LiveRecord, ResourceKey, ResourceKind,
};
pub use mutator::Mutator;
pub use reconcile::{CycleReport, ReconcileOptions, Reconciler};
pub use schema::{Drift, FieldSpec, Mutability};
