//! Cycle-scoped live state
//!
//! The inventory holds every [`LiveRecord`] discovered at the start of a
//! reconciliation cycle. It is rebuilt from the remote API on every run and
//! never persisted; the mutator updates it after each successful call so the
//! caller knows the outcome without re-discovering.

use crate::model::{Ensure, LiveRecord, ResourceKey};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Inventory {
    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    records: BTreeMap<ResourceKey, LiveRecord>,

    /// Keys that matched more than one live object
    duplicates: BTreeMap<ResourceKey, Vec<LiveRecord>>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            records: BTreeMap::new(),
            duplicates: BTreeMap::new(),
        }
    }
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = LiveRecord>) -> Self {
        let mut inventory = Self::new();
        for record in records {
            inventory.insert(record);
        }
        inventory
    }

    /// Add a discovered record
    ///
    /// A second object under an already-known key makes the key ambiguous:
    /// all candidates move out of the lookup table so nothing acts on it.
    pub fn insert(&mut self, record: LiveRecord) {
        let key = record.key();

        if let Some(candidates) = self.duplicates.get_mut(&key) {
            candidates.push(record);
            return;
        }

        match self.records.remove(&key) {
            Some(existing) if !same_object(&existing, &record) => {
                tracing::warn!(
                    "{} {} in region {} matches more than one live object",
                    key.kind.label(),
                    key.name,
                    key.region
                );
                self.duplicates.insert(key, vec![existing, record]);
            }
            _ => {
                self.records.insert(key, record);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Get a record by key, present or already marked absent
    pub fn get(&self, key: &ResourceKey) -> Option<&LiveRecord> {
        self.records.get(key)
    }

    /// Whether the key is known to be present; never issues a remote call
    pub fn exists(&self, key: &ResourceKey) -> bool {
        self.records
            .get(key)
            .is_some_and(|r| r.ensure == Ensure::Present)
    }

    /// Get the present record for a key
    pub fn present(&self, key: &ResourceKey) -> Option<&LiveRecord> {
        self.records.get(key).filter(|r| r.ensure == Ensure::Present)
    }

    pub fn is_ambiguous(&self, key: &ResourceKey) -> bool {
        self.duplicates.contains_key(key)
    }

    /// Live candidates for an ambiguous key
    pub fn candidates(&self, key: &ResourceKey) -> &[LiveRecord] {
        self.duplicates.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record a successful create
    pub fn mark_present(&mut self, mut record: LiveRecord) {
        record.ensure = Ensure::Present;
        self.records.insert(record.key(), record);
        self.updated_at = Utc::now();
    }

    /// Record a successful destroy
    pub fn mark_absent(&mut self, key: &ResourceKey) -> Option<&LiveRecord> {
        let record = self.records.get_mut(key)?;
        record.ensure = Ensure::Absent;
        self.updated_at = Utc::now();
        Some(record)
    }

    /// Set one attribute of a record after an in-place update
    pub fn update_attribute(&mut self, key: &ResourceKey, field: &str, value: serde_json::Value) {
        if let Some(record) = self.records.get_mut(key) {
            record.attributes.insert(field.to_string(), value);
            self.updated_at = Utc::now();
        }
    }

    /// Present records, sorted by key
    pub fn iter(&self) -> impl Iterator<Item = &LiveRecord> {
        self.records
            .values()
            .filter(|r| r.ensure == Ensure::Present)
    }

    /// Number of present records
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Objects with identifiers compare by identifier, others by content
fn same_object(a: &LiveRecord, b: &LiveRecord) -> bool {
    match (&a.id, &b.id) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a == b,
        _ => false,
    }
}
