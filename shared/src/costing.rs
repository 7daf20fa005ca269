//! Costing arithmetic for the inventory valuation engine
//!
//! All monetary math runs on `rust_decimal::Decimal` fixed-point values;
//! prices round to 2 decimal places, quantities to 3. These functions are the
//! single source of truth for every derived figure the services persist, so
//! insert, delete, and restore paths all recompute through the same code.

use rust_decimal::Decimal;

/// Decimal places for monetary values
pub const PRICE_SCALE: u32 = 2;

/// Decimal places for kilogram quantities
pub const QUANTITY_SCALE: u32 = 3;

/// Fixed target weight of a formula batch, in kilograms
pub fn formula_target_weight_kg() -> Decimal {
    Decimal::from(1000)
}

/// Tolerance around the target weight (0.1 kg)
pub fn formula_weight_tolerance_kg() -> Decimal {
    Decimal::new(1, 1)
}

/// Subtotal of a purchase or formula line: quantity × unit price
pub fn line_subtotal(quantity_kg: Decimal, unit_price: Decimal) -> Decimal {
    (quantity_kg * unit_price).round_dp(PRICE_SCALE)
}

/// Weighted-average price over a set of (quantity, unit price) pairs.
///
/// Returns `None` when the set is empty or the quantities sum to zero; the
/// caller keeps the previous price in that case rather than resetting it.
pub fn weighted_average_price(lines: &[(Decimal, Decimal)]) -> Option<Decimal> {
    let total_quantity: Decimal = lines.iter().map(|(q, _)| *q).sum();
    if total_quantity <= Decimal::ZERO {
        return None;
    }
    let total_value: Decimal = lines.iter().map(|(q, p)| *q * *p).sum();
    Some((total_value / total_quantity).round_dp(PRICE_SCALE))
}

/// Aggregates recomputed over a formula's lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormulaTotals {
    pub total_weight_kg: Decimal,
    pub total_cost: Decimal,
}

/// Recompute a formula's totals from its (quantity, snapshotted price) lines.
pub fn formula_totals(lines: &[(Decimal, Decimal)]) -> FormulaTotals {
    let total_weight_kg: Decimal = lines
        .iter()
        .map(|(q, _)| *q)
        .sum::<Decimal>()
        .round_dp(QUANTITY_SCALE);
    let total_cost: Decimal = lines
        .iter()
        .map(|(q, p)| line_subtotal(*q, *p))
        .sum::<Decimal>()
        .round_dp(PRICE_SCALE);
    FormulaTotals {
        total_weight_kg,
        total_cost,
    }
}

/// Signed deviation of a formula's total weight from the 1000 kg target.
/// Advisory only: callers surface it, nothing rejects on it.
pub fn weight_deviation_kg(total_weight_kg: Decimal) -> Decimal {
    total_weight_kg - formula_target_weight_kg()
}

/// Whether a formula's total weight is within tolerance of the target
pub fn within_weight_tolerance(total_weight_kg: Decimal) -> bool {
    weight_deviation_kg(total_weight_kg).abs() <= formula_weight_tolerance_kg()
}

/// Quantity of a material consumed by one run line: line quantity × multiplier
pub fn consumed_quantity_kg(line_quantity_kg: Decimal, multiplier: Decimal) -> Decimal {
    (line_quantity_kg * multiplier).round_dp(QUANTITY_SCALE)
}

/// Cost figures for a manufacturing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCost {
    pub total_cost: Decimal,
    pub cost_per_kilo: Decimal,
}

/// Compute a run's total cost and cost per kilo from the formula's
/// (quantity, snapshotted price) lines and the batch multiplier.
///
/// `cost_per_kilo = total_cost / (formula total weight × multiplier)`; a zero
/// denominator yields zero rather than an error.
pub fn run_cost(
    lines: &[(Decimal, Decimal)],
    multiplier: Decimal,
    formula_total_weight_kg: Decimal,
) -> RunCost {
    let total_cost: Decimal = lines
        .iter()
        .map(|(q, p)| line_subtotal(consumed_quantity_kg(*q, multiplier), *p))
        .sum::<Decimal>()
        .round_dp(PRICE_SCALE);
    let produced_kg = formula_total_weight_kg * multiplier;
    let cost_per_kilo = if produced_kg > Decimal::ZERO {
        (total_cost / produced_kg).round_dp(PRICE_SCALE)
    } else {
        Decimal::ZERO
    };
    RunCost {
        total_cost,
        cost_per_kilo,
    }
}

/// Shrinkage: system-expected quantity minus physically counted quantity
pub fn shrinkage_kg(system_quantity_kg: Decimal, physical_quantity_kg: Decimal) -> Decimal {
    (system_quantity_kg - physical_quantity_kg).round_dp(QUANTITY_SCALE)
}

/// Stock value: physical quantity × warehouse price
pub fn stock_value(physical_quantity_kg: Decimal, warehouse_price: Decimal) -> Decimal {
    (physical_quantity_kg * warehouse_price).round_dp(PRICE_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn weighted_average_of_two_purchases() {
        // 100 kg @ 10 + 200 kg @ 13 -> (1000 + 2600) / 300 = 12
        let lines = vec![(dec("100"), dec("10")), (dec("200"), dec("13"))];
        assert_eq!(weighted_average_price(&lines), Some(dec("12.00")));
    }

    #[test]
    fn weighted_average_after_removing_a_line() {
        let lines = vec![(dec("200"), dec("13"))];
        assert_eq!(weighted_average_price(&lines), Some(dec("13.00")));
    }

    #[test]
    fn weighted_average_is_order_independent() {
        let a = vec![(dec("100"), dec("10")), (dec("200"), dec("13"))];
        let b = vec![(dec("200"), dec("13")), (dec("100"), dec("10"))];
        assert_eq!(weighted_average_price(&a), weighted_average_price(&b));
    }

    #[test]
    fn weighted_average_of_empty_set_is_none() {
        assert_eq!(weighted_average_price(&[]), None);
    }

    #[test]
    fn formula_totals_sum_lines_exactly() {
        let lines = vec![
            (dec("600"), dec("12.00")),
            (dec("300"), dec("8.50")),
            (dec("95"), dec("20.00")),
        ];
        let totals = formula_totals(&lines);
        assert_eq!(totals.total_weight_kg, dec("995.000"));
        // 7200 + 2550 + 1900
        assert_eq!(totals.total_cost, dec("11650.00"));
    }

    #[test]
    fn underweight_formula_reports_negative_deviation() {
        assert_eq!(weight_deviation_kg(dec("995")), dec("-5"));
        assert!(!within_weight_tolerance(dec("995")));
    }

    #[test]
    fn deviation_within_tolerance_passes() {
        assert!(within_weight_tolerance(dec("1000")));
        assert!(within_weight_tolerance(dec("999.95")));
        assert!(within_weight_tolerance(dec("1000.1")));
        assert!(!within_weight_tolerance(dec("1000.2")));
    }

    #[test]
    fn run_cost_uses_snapshotted_prices_and_multiplier() {
        // One 100 kg line @ 12, multiplier 1.5 -> consumes 150 kg, costs 1800
        let lines = vec![(dec("100"), dec("12"))];
        let cost = run_cost(&lines, dec("1.5"), dec("100"));
        assert_eq!(cost.total_cost, dec("1800.00"));
        // 1800 / (100 * 1.5) = 12
        assert_eq!(cost.cost_per_kilo, dec("12.00"));
    }

    #[test]
    fn run_cost_with_zero_weight_has_zero_cost_per_kilo() {
        let cost = run_cost(&[], dec("2"), Decimal::ZERO);
        assert_eq!(cost.total_cost, Decimal::ZERO);
        assert_eq!(cost.cost_per_kilo, Decimal::ZERO);
    }

    #[test]
    fn shrinkage_is_system_minus_physical() {
        assert_eq!(shrinkage_kg(dec("350"), dec("340")), dec("10.000"));
        // Negative shrinkage (counted more than expected) is valid data
        assert_eq!(shrinkage_kg(dec("350"), dec("360")), dec("-10.000"));
    }

    #[test]
    fn stock_value_rounds_to_cents() {
        assert_eq!(stock_value(dec("333.333"), dec("1.11")), dec("370.00"));
    }
}
