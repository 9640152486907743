//! Inventory records read from the external inventory ledger
//!
//! Equipment ("sarana") is either pooled, where only a count matters, or
//! serialized, where each physical unit carries its own identity and status.
//! Venues ("prasarana") are booked whole.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How an equipment's stock is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tracking {
    /// Fungible stock, counted only
    #[default]
    Pooled,
    /// Individually numbered units
    Serialized,
}

impl fmt::Display for Tracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tracking::Pooled => write!(f, "pooled"),
            Tracking::Serialized => write!(f, "serialized"),
        }
    }
}

impl Tracking {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pooled" => Some(Tracking::Pooled),
            "serialized" => Some(Tracking::Serialized),
            _ => None,
        }
    }
}

/// Equipment ("sarana") type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: Uuid,
    pub name: String,
    pub tracking: Tracking,
}

/// Venue availability as reported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VenueStatus {
    #[default]
    Available,
    Unavailable,
}

impl fmt::Display for VenueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueStatus::Available => write!(f, "available"),
            VenueStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

impl VenueStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "available" => Some(VenueStatus::Available),
            "unavailable" => Some(VenueStatus::Unavailable),
            _ => None,
        }
    }
}

/// Venue ("prasarana")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Uuid,
    pub name: String,
    pub status: VenueStatus,
}

/// Physical condition of a serialized unit, stored as the ledger's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UnitStatus {
    #[default]
    #[serde(rename = "tersedia")]
    Available,
    #[serde(rename = "rusak")]
    Damaged,
    #[serde(rename = "maintenance")]
    Maintenance,
    #[serde(rename = "hilang")]
    Lost,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Available => write!(f, "tersedia"),
            UnitStatus::Damaged => write!(f, "rusak"),
            UnitStatus::Maintenance => write!(f, "maintenance"),
            UnitStatus::Lost => write!(f, "hilang"),
        }
    }
}

impl UnitStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tersedia" => Some(UnitStatus::Available),
            "rusak" => Some(UnitStatus::Damaged),
            "maintenance" => Some(UnitStatus::Maintenance),
            "hilang" => Some(UnitStatus::Lost),
            _ => None,
        }
    }
}

/// One serialized equipment unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentUnit {
    pub id: Uuid,
    pub equipment_id: Uuid,
    pub serial_number: String,
    pub status: UnitStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_status_ledger_values() {
        assert_eq!(UnitStatus::from_str("tersedia"), Some(UnitStatus::Available));
        assert_eq!(UnitStatus::from_str("HILANG"), Some(UnitStatus::Lost));
        assert_eq!(UnitStatus::Damaged.to_string(), "rusak");
        assert_eq!(
            serde_json::to_string(&UnitStatus::Maintenance).unwrap(),
            "\"maintenance\""
        );
    }
}
