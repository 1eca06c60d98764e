//! Shop records — clients, repairs, estimates, line items, and notes.
//!
//! These rows are owned by the CRUD side of the application. The SMS core
//! only reads them and performs the handful of writes the approval flow and
//! opt-in keywords need.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Author recorded on notes written by automated flows.
pub const SYSTEM_ACTOR: &str = "System";

/// A shop client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    /// Legacy single primary phone (normalized).
    pub phone: Option<String>,
    pub email: Option<String>,
    pub sms_opted_in: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a repair sits in the shop workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    #[default]
    Queued,
    Diagnosing,
    Estimate,
    Parts,
    Repairing,
    Testing,
    Ready,
    Closed,
}

impl RepairStatus {
    /// Whether work has not started yet (approval may move it to `Repairing`).
    pub fn is_pre_repair(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Diagnosing | Self::Estimate | Self::Parts
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Diagnosing => "diagnosing",
            Self::Estimate => "estimate",
            Self::Parts => "parts",
            Self::Repairing => "repairing",
            Self::Testing => "testing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RepairStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "diagnosing" => Ok(Self::Diagnosing),
            "estimate" => Ok(Self::Estimate),
            "parts" => Ok(Self::Parts),
            "repairing" => Ok(Self::Repairing),
            "testing" => Ok(Self::Testing),
            "ready" => Ok(Self::Ready),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Unknown repair status: {}", s)),
        }
    }
}

/// Scheduling priority. Not part of the status workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPriority {
    #[default]
    Normal,
    Warranty,
    Rush,
}

impl std::fmt::Display for RepairPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Warranty => write!(f, "warranty"),
            Self::Rush => write!(f, "rush"),
        }
    }
}

impl std::str::FromStr for RepairPriority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "warranty" => Ok(Self::Warranty),
            "rush" => Ok(Self::Rush),
            _ => Err(format!("Unknown repair priority: {}", s)),
        }
    }
}

/// A repair ticket, including the charge fields cost calculation reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repair {
    pub id: i64,
    pub client_id: i64,
    /// Human-facing ticket number.
    pub claim_number: String,
    pub device: String,
    pub status: RepairStatus,
    pub priority: RepairPriority,
    pub labor_cost: Decimal,
    pub tax_exempt: bool,
    pub shipping_fee: Decimal,
    pub onsite_fee: Decimal,
    pub rush_fee: Decimal,
    pub deposit_amount: Decimal,
    pub diagnostic_fee: Option<Decimal>,
    pub diagnostic_fee_collected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Estimate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    Pending,
    Approved,
    Declined,
}

impl EstimateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
        }
    }
}

impl std::fmt::Display for EstimateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EstimateStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "declined" => Ok(Self::Declined),
            _ => Err(format!("Unknown estimate status: {}", s)),
        }
    }
}

/// A priced estimate for a repair. One repair may carry several ("Option A/B").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub id: i64,
    pub repair_id: i64,
    pub label: Option<String>,
    pub status: EstimateStatus,
    pub labor_cost: Decimal,
    pub parts_cost: Decimal,
    /// Always `labor_cost + parts_cost`.
    pub total_cost: Decimal,
    pub notified_date: Option<DateTime<Utc>>,
    pub approved_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A billable line on a repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPart {
    pub id: i64,
    pub repair_id: i64,
    /// Inventory part; `None` for custom free-text lines.
    pub part_id: Option<i64>,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl RepairPart {
    /// Zero-priced lines only track inventory use; customers never see them.
    pub fn is_billable(&self) -> bool {
        self.unit_price > Decimal::ZERO
    }

    pub fn line_total(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }
}

/// Audit trail entry on a repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairNote {
    pub id: i64,
    pub repair_id: i64,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ── Inserts ─────────────────────────────────────────────────────────

/// Fields for creating a client.
#[derive(Debug, Clone, Default)]
pub struct NewClient {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub sms_opted_in: bool,
}

/// Fields for creating a repair.
#[derive(Debug, Clone, Default)]
pub struct NewRepair {
    pub client_id: i64,
    pub claim_number: String,
    pub device: String,
    pub status: RepairStatus,
    pub priority: RepairPriority,
    pub labor_cost: Decimal,
    pub tax_exempt: bool,
    pub shipping_fee: Decimal,
    pub onsite_fee: Decimal,
    pub rush_fee: Decimal,
    pub deposit_amount: Decimal,
    pub diagnostic_fee: Option<Decimal>,
    pub diagnostic_fee_collected: bool,
}

/// Fields for creating an estimate. Total is derived.
#[derive(Debug, Clone)]
pub struct NewEstimate {
    pub repair_id: i64,
    pub label: Option<String>,
    pub labor_cost: Decimal,
    pub parts_cost: Decimal,
}

/// Fields for adding a line item to a repair.
#[derive(Debug, Clone)]
pub struct NewRepairPart {
    pub repair_id: i64,
    pub part_id: Option<i64>,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn repair_status_roundtrip() {
        for status in [
            RepairStatus::Queued,
            RepairStatus::Diagnosing,
            RepairStatus::Estimate,
            RepairStatus::Parts,
            RepairStatus::Repairing,
            RepairStatus::Testing,
            RepairStatus::Ready,
            RepairStatus::Closed,
        ] {
            let parsed: RepairStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("warranty".parse::<RepairStatus>().is_err());
    }

    #[test]
    fn new_repairs_start_queued_at_normal_priority() {
        let repair = NewRepair::default();
        assert_eq!(repair.status, RepairStatus::Queued);
        assert_eq!(repair.priority, RepairPriority::Normal);
    }

    #[test]
    fn pre_repair_states() {
        assert!(RepairStatus::Queued.is_pre_repair());
        assert!(RepairStatus::Estimate.is_pre_repair());
        assert!(RepairStatus::Parts.is_pre_repair());
        assert!(!RepairStatus::Repairing.is_pre_repair());
        assert!(!RepairStatus::Closed.is_pre_repair());
    }

    #[test]
    fn line_total_and_billable() {
        let part = RepairPart {
            id: 1,
            repair_id: 1,
            part_id: Some(7),
            name: "Screen".into(),
            quantity: 2,
            unit_price: dec!(45.50),
            created_at: Utc::now(),
        };
        assert_eq!(part.line_total(), dec!(91.00));
        assert!(part.is_billable());

        let tracking = RepairPart {
            unit_price: Decimal::ZERO,
            ..part
        };
        assert!(!tracking.is_billable());
    }
}
