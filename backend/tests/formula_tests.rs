//! Formula snapshot tests
//!
//! Simulation-based tests for formula line management: prices are snapshotted
//! when a line is added and never follow the live reference price afterwards,
//! while totals recompute idempotently from the stored lines.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

use shared::costing;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ============================================================================
// Formula Simulation
// ============================================================================

#[derive(Debug, Clone)]
struct SimFormulaLine {
    material: u32,
    quantity_kg: Decimal,
    /// Price captured when the line was added; quantity edits keep it
    unit_price_at_creation: Decimal,
    partial_cost: Decimal,
}

/// In-memory model of one formula and the live reference prices around it
#[derive(Debug, Default)]
struct Recipe {
    lines: Vec<SimFormulaLine>,
    reference_prices: BTreeMap<u32, Decimal>,
    total_weight_kg: Decimal,
    total_cost: Decimal,
}

impl Recipe {
    fn set_reference_price(&mut self, material: u32, price: Decimal) {
        self.reference_prices.insert(material, price);
    }

    fn recompute_totals(&mut self) {
        let pairs: Vec<(Decimal, Decimal)> = self
            .lines
            .iter()
            .map(|l| (l.quantity_kg, l.unit_price_at_creation))
            .collect();
        let totals = costing::formula_totals(&pairs);
        self.total_weight_kg = totals.total_weight_kg;
        self.total_cost = totals.total_cost;
    }

    /// Add a line, snapshotting the material's current reference price.
    fn add_line(&mut self, material: u32, quantity_kg: Decimal) -> Result<usize, &'static str> {
        if self.lines.iter().any(|l| l.material == material) {
            return Err("duplicate material");
        }
        let price = *self
            .reference_prices
            .get(&material)
            .ok_or("unknown material")?;
        self.lines.push(SimFormulaLine {
            material,
            quantity_kg,
            unit_price_at_creation: price,
            partial_cost: costing::line_subtotal(quantity_kg, price),
        });
        self.recompute_totals();
        Ok(self.lines.len() - 1)
    }

    /// Change a line's quantity, re-costing it at the stored snapshot price.
    fn update_line_quantity(&mut self, line: usize, quantity_kg: Decimal) {
        let snapshot = self.lines[line].unit_price_at_creation;
        self.lines[line].quantity_kg = quantity_kg;
        self.lines[line].partial_cost = costing::line_subtotal(quantity_kg, snapshot);
        self.recompute_totals();
    }

    fn remove_line(&mut self, line: usize) {
        self.lines.remove(line);
        self.recompute_totals();
    }

    fn deviation_kg(&self) -> Decimal {
        costing::weight_deviation_kg(self.total_weight_kg)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Adding a line captures the reference price of that moment; later
    /// price movements leave the line untouched.
    #[test]
    fn test_add_line_snapshots_current_price() {
        let mut recipe = Recipe::default();
        recipe.set_reference_price(1, dec("12.00"));

        let line = recipe.add_line(1, dec("100")).unwrap();
        assert_eq!(recipe.lines[line].unit_price_at_creation, dec("12.00"));
        assert_eq!(recipe.lines[line].partial_cost, dec("1200.00"));

        recipe.set_reference_price(1, dec("15.00"));
        assert_eq!(recipe.lines[line].unit_price_at_creation, dec("12.00"));

        // A new line of a different material snapshots the current price
        recipe.set_reference_price(2, dec("15.00"));
        let newer = recipe.add_line(2, dec("50")).unwrap();
        assert_eq!(recipe.lines[newer].unit_price_at_creation, dec("15.00"));
    }

    /// Editing a line's quantity re-costs it at the stored snapshot price,
    /// never at the live reference price.
    #[test]
    fn test_quantity_edit_keeps_snapshot_price() {
        let mut recipe = Recipe::default();
        recipe.set_reference_price(1, dec("12.00"));
        let line = recipe.add_line(1, dec("100")).unwrap();

        recipe.set_reference_price(1, dec("15.00"));
        recipe.update_line_quantity(line, dec("50"));

        assert_eq!(recipe.lines[line].unit_price_at_creation, dec("12.00"));
        assert_eq!(recipe.lines[line].partial_cost, dec("600.00"));
        assert_eq!(recipe.total_cost, dec("600.00"));
        assert_eq!(recipe.total_weight_kg, dec("50.000"));
    }

    /// The same material cannot appear on two lines.
    #[test]
    fn test_duplicate_material_rejected() {
        let mut recipe = Recipe::default();
        recipe.set_reference_price(1, dec("5.00"));
        recipe.add_line(1, dec("10")).unwrap();

        assert_eq!(recipe.add_line(1, dec("20")), Err("duplicate material"));
        assert_eq!(recipe.lines.len(), 1);
    }

    /// Total weight is the exact line sum; a 995 kg formula reports a -5 kg
    /// deviation and stays usable.
    #[test]
    fn test_underweight_formula_is_advisory() {
        let mut recipe = Recipe::default();
        recipe.set_reference_price(1, dec("12.00"));
        recipe.set_reference_price(2, dec("8.50"));
        recipe.add_line(1, dec("600")).unwrap();
        recipe.add_line(2, dec("395")).unwrap();

        assert_eq!(recipe.total_weight_kg, dec("995.000"));
        assert_eq!(recipe.deviation_kg(), dec("-5.000"));
    }

    /// Removing a line drops its weight and cost from the totals.
    #[test]
    fn test_remove_line_recomputes_totals() {
        let mut recipe = Recipe::default();
        recipe.set_reference_price(1, dec("10.00"));
        recipe.set_reference_price(2, dec("20.00"));
        recipe.add_line(1, dec("600")).unwrap();
        let second = recipe.add_line(2, dec("400")).unwrap();
        assert_eq!(recipe.total_cost, dec("14000.00"));

        recipe.remove_line(second);
        assert_eq!(recipe.total_weight_kg, dec("600.000"));
        assert_eq!(recipe.total_cost, dec("6000.00"));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

proptest! {
    /// No sequence of quantity edits ever moves a line's snapshot price,
    /// even while the live reference price drifts.
    #[test]
    fn quantity_edits_never_touch_snapshot_price(
        initial_qty in 1u32..10_000,
        edits in prop::collection::vec((1u32..10_000, 1u32..5_000), 0..8),
    ) {
        let mut recipe = Recipe::default();
        recipe.set_reference_price(1, dec("12.00"));
        let line = recipe.add_line(1, Decimal::from(initial_qty)).unwrap();

        for (qty, drifted_price) in edits {
            recipe.set_reference_price(1, Decimal::new(drifted_price as i64, 2));
            recipe.update_line_quantity(line, Decimal::from(qty));
            prop_assert_eq!(
                recipe.lines[line].unit_price_at_creation,
                dec("12.00")
            );
        }
    }

    /// Totals always equal the sum over the stored lines.
    #[test]
    fn totals_match_line_sums(
        quantities in prop::collection::vec(1u32..5_000, 1..6),
    ) {
        let mut recipe = Recipe::default();
        for (i, qty) in quantities.iter().enumerate() {
            let material = i as u32;
            recipe.set_reference_price(material, Decimal::new(750, 2));
            recipe.add_line(material, Decimal::from(*qty)).unwrap();
        }

        let expected_weight: Decimal = quantities.iter().map(|q| Decimal::from(*q)).sum();
        let expected_cost: Decimal = recipe.lines.iter().map(|l| l.partial_cost).sum();
        prop_assert_eq!(recipe.total_weight_kg, expected_weight);
        prop_assert_eq!(recipe.total_cost, expected_cost);
    }
}
