//! Amount-due calculation for a repair.
//!
//! Parts and labor are taxed; shipping, on-site and rush fees are added after
//! tax. A collected diagnostic fee is credited against the total, never below
//! zero.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::shop::{Repair, RepairPart};

/// Shop-wide pricing constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostRules {
    /// Fraction, e.g. `0.075` for 7.5 %.
    pub tax_rate: Decimal,
    /// Credited when a fee was collected but no amount was recorded.
    pub default_diagnostic_fee: Decimal,
}

impl Default for CostRules {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.075),
            default_diagnostic_fee: dec!(89.00),
        }
    }
}

/// Every component of the amount due, in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CostBreakdown {
    pub parts_subtotal: Decimal,
    pub labor: Decimal,
    /// Parts plus labor; the taxable base.
    pub subtotal: Decimal,
    pub tax: Decimal,
    /// Shipping, on-site and rush fees. Untaxed.
    pub fees: Decimal,
    pub total: Decimal,
    /// Diagnostic fee credit.
    pub credit: Decimal,
    pub amount_due: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct CostCalculator {
    rules: CostRules,
}

impl CostCalculator {
    pub fn new(rules: CostRules) -> Self {
        Self { rules }
    }

    pub fn amount_due(&self, repair: &Repair, parts: &[RepairPart]) -> CostBreakdown {
        let parts_subtotal: Decimal = parts
            .iter()
            .filter(|p| p.is_billable())
            .map(RepairPart::line_total)
            .sum();
        let labor = repair.labor_cost;
        let subtotal = parts_subtotal + labor;

        let tax = if repair.tax_exempt {
            Decimal::ZERO
        } else {
            to_cents(subtotal * self.rules.tax_rate)
        };
        let fees = repair.shipping_fee + repair.onsite_fee + repair.rush_fee;
        let total = subtotal + tax + fees;

        let credit = if repair.diagnostic_fee_collected {
            self.diagnostic_credit(repair)
        } else {
            Decimal::ZERO
        };

        CostBreakdown {
            parts_subtotal,
            labor,
            subtotal,
            tax,
            fees,
            total,
            credit,
            amount_due: (total - credit).max(Decimal::ZERO),
        }
    }

    /// Deposit wins, then the recorded fee, then the flat default.
    fn diagnostic_credit(&self, repair: &Repair) -> Decimal {
        if repair.deposit_amount > Decimal::ZERO {
            return repair.deposit_amount;
        }
        match repair.diagnostic_fee {
            Some(fee) if fee > Decimal::ZERO => fee,
            _ => self.rules.default_diagnostic_fee,
        }
    }
}

/// Round to cents, half away from zero.
fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `$1,234.56` style.
pub fn format_money(amount: Decimal) -> String {
    let cents = to_cents(amount);
    let sign = if cents < Decimal::ZERO { "-" } else { "" };
    let plain = format!("{:.2}", cents.abs());
    let (whole, frac) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}${grouped}.{frac}")
}
