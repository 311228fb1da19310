//! References identify the business object a checklist is attached to.

use crate::{error::Result, Error, ReferenceId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of business object a checklist is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    MaintenanceOrder,
    MaintenanceCall,
    PreventivePlan,
    Equipment,
}

impl ReferenceType {
    /// Wire name of the reference type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::MaintenanceOrder => "maintenance_order",
            ReferenceType::MaintenanceCall => "maintenance_call",
            ReferenceType::PreventivePlan => "preventive_plan",
            ReferenceType::Equipment => "equipment",
        }
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "maintenance_order" => Ok(ReferenceType::MaintenanceOrder),
            "maintenance_call" => Ok(ReferenceType::MaintenanceCall),
            "preventive_plan" => Ok(ReferenceType::PreventivePlan),
            "equipment" => Ok(ReferenceType::Equipment),
            other => Err(Error::InvalidReferenceType(other.to_string())),
        }
    }
}

/// The `(reference_type, reference_id)` pair that partitions all engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub reference_type: ReferenceType,
    pub reference_id: ReferenceId,
}

impl Reference {
    /// Create a new reference.
    pub fn new(reference_type: ReferenceType, reference_id: ReferenceId) -> Self {
        Self {
            reference_type,
            reference_id,
        }
    }

    /// Shorthand for a maintenance order reference.
    pub fn maintenance_order(reference_id: ReferenceId) -> Self {
        Self::new(ReferenceType::MaintenanceOrder, reference_id)
    }

    /// Shorthand for a maintenance call reference.
    pub fn maintenance_call(reference_id: ReferenceId) -> Self {
        Self::new(ReferenceType::MaintenanceCall, reference_id)
    }

    /// Stable storage key, `"{type}:{id}"`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.reference_type, self.reference_id)
    }

    /// Parse a storage key produced by [`Reference::key`].
    pub fn parse_key(key: &str) -> Result<Self> {
        let (kind, id) = key
            .split_once(':')
            .ok_or_else(|| Error::InvalidReferenceType(key.to_string()))?;
        let reference_id = id
            .parse()
            .map_err(|_| Error::InvalidReferenceType(key.to_string()))?;
        Ok(Self::new(kind.parse()?, reference_id))
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.reference_type, self.reference_id)
    }
}
