//! Mutation contract between the data layer and the notifier.
//!
//! Every successful create/update/delete on a tracked table is described by a
//! [`ChangeEvent`] and handed to the notifier's `publish`.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Tables whose mutations are broadcast to subscribers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Items,
    Inventory,
    Distributors,
    DistributorPrices,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Items,
        Table::Inventory,
        Table::Distributors,
        Table::DistributorPrices,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Items => "items",
            Table::Inventory => "inventory",
            Table::Distributors => "distributors",
            Table::DistributorPrices => "distributor_prices",
        }
    }
}

impl core::fmt::Display for Table {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Table::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| {
                CoreError::validation(format!(
                    "unknown table '{s}'; valid tables: items, inventory, distributors, distributor_prices"
                ))
            })
    }
}

/// Kind of mutation that happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of the affected row.
///
/// Distributor prices are keyed by the (distributor, item) pair; every other
/// table has a single numeric id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Id(i64),
    DistributorItem { distributor_id: i64, item_id: i64 },
}

impl core::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RecordKey::Id(id) => write!(f, "{id}"),
            RecordKey::DistributorItem {
                distributor_id,
                item_id,
            } => write!(f, "{distributor_id}/{item_id}"),
        }
    }
}

/// A committed mutation, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub operation: Operation,
    pub key: RecordKey,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(table: Table, operation: Operation, key: RecordKey) -> Self {
        Self {
            table,
            operation,
            key,
            timestamp: Utc::now(),
        }
    }

    pub fn created(table: Table, id: i64) -> Self {
        Self::new(table, Operation::Create, RecordKey::Id(id))
    }

    pub fn updated(table: Table, id: i64) -> Self {
        Self::new(table, Operation::Update, RecordKey::Id(id))
    }

    pub fn deleted(table: Table, id: i64) -> Self {
        Self::new(table, Operation::Delete, RecordKey::Id(id))
    }

    /// Price-catalog mutation (composite key).
    pub fn price(operation: Operation, distributor_id: i64, item_id: i64) -> Self {
        Self::new(
            Table::DistributorPrices,
            operation,
            RecordKey::DistributorItem {
                distributor_id,
                item_id,
            },
        )
    }
}
