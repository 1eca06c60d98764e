//! Charges on a repair — the single place amounts due are computed.

pub mod costs;

pub use costs::{CostBreakdown, CostCalculator, CostRules, format_money};
