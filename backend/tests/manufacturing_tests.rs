//! Manufacturing run tests
//!
//! Simulation-based tests for run costing, atomic stock deduction, the
//! insufficient-stock flag, and delete/restore replay from stored lines.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

use shared::{
    confirmation_matches, costing, RecordState, MANUFACTURING_BULK_DELETE_PHRASE,
};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ============================================================================
// Run Simulation
// ============================================================================

/// A stored consumption line: the run replays these on delete/restore, never
/// the live formula.
#[derive(Debug, Clone)]
struct StoredLine {
    material: u32,
    consumed_kg: Decimal,
    unit_price: Decimal,
}

#[derive(Debug, Clone)]
struct SimRun {
    lines: Vec<StoredLine>,
    total_cost: Decimal,
    cost_per_kilo: Decimal,
    insufficient_stock: bool,
    multiplier: Decimal,
    state: RecordState,
}

#[derive(Debug, Default)]
struct Plant {
    /// System quantity per initialized material
    system: BTreeMap<u32, Decimal>,
    runs: Vec<SimRun>,
}

impl Plant {
    fn initialize(&mut self, material: u32, quantity: Decimal) {
        self.system.insert(material, quantity);
    }

    /// Create a run from formula lines (material, quantity, snapshotted
    /// price). Fails only when a material has no inventory record; shortage
    /// is flagged, not rejected.
    fn create_run(
        &mut self,
        formula: &[(u32, Decimal, Decimal)],
        multiplier: Decimal,
        formula_weight: Decimal,
    ) -> Result<usize, &'static str> {
        let mut stored = Vec::new();
        let mut insufficient = false;
        for (material, quantity, price) in formula {
            let consumed = costing::consumed_quantity_kg(*quantity, multiplier);
            let available = self.system.get(material).ok_or("uninitialized inventory")?;
            if *available < consumed {
                insufficient = true;
            }
            stored.push(StoredLine {
                material: *material,
                consumed_kg: consumed,
                unit_price: *price,
            });
        }

        let cost_lines: Vec<(Decimal, Decimal)> =
            formula.iter().map(|(_, q, p)| (*q, *p)).collect();
        let cost = costing::run_cost(&cost_lines, multiplier, formula_weight);

        for line in &stored {
            *self.system.get_mut(&line.material).unwrap() -= line.consumed_kg;
        }
        self.runs.push(SimRun {
            lines: stored,
            total_cost: cost.total_cost,
            cost_per_kilo: cost.cost_per_kilo,
            insufficient_stock: insufficient,
            multiplier,
            state: RecordState::Active,
        });
        Ok(self.runs.len() - 1)
    }

    /// Edit a run. A date-only edit leaves deductions, stored lines, and
    /// costs in place; changing the formula or multiplier reverses the
    /// stored deductions and recomputes from the formula's current lines.
    fn update_run(
        &mut self,
        run: usize,
        live_formula: &[(u32, Decimal, Decimal)],
        new_multiplier: Option<Decimal>,
        formula_weight: Decimal,
        formula_changed: bool,
    ) {
        assert!(self.runs[run].state.can_delete());
        let multiplier_changed =
            new_multiplier.map_or(false, |m| m != self.runs[run].multiplier);
        if !formula_changed && !multiplier_changed {
            return;
        }

        let old_lines = self.runs[run].lines.clone();
        for line in &old_lines {
            *self.system.get_mut(&line.material).unwrap() += line.consumed_kg;
        }

        let multiplier = new_multiplier.unwrap_or(self.runs[run].multiplier);
        let mut stored = Vec::new();
        let mut insufficient = false;
        for (material, quantity, price) in live_formula {
            let consumed = costing::consumed_quantity_kg(*quantity, multiplier);
            if self.system[material] < consumed {
                insufficient = true;
            }
            stored.push(StoredLine {
                material: *material,
                consumed_kg: consumed,
                unit_price: *price,
            });
        }

        let cost_lines: Vec<(Decimal, Decimal)> =
            live_formula.iter().map(|(_, q, p)| (*q, *p)).collect();
        let cost = costing::run_cost(&cost_lines, multiplier, formula_weight);

        for line in &stored {
            *self.system.get_mut(&line.material).unwrap() -= line.consumed_kg;
        }
        self.runs[run] = SimRun {
            lines: stored,
            total_cost: cost.total_cost,
            cost_per_kilo: cost.cost_per_kilo,
            insufficient_stock: insufficient,
            multiplier,
            state: RecordState::Active,
        };
    }

    /// Soft delete: adds every stored consumption back.
    fn delete_run(&mut self, run: usize) {
        assert!(self.runs[run].state.can_delete());
        let lines = self.runs[run].lines.clone();
        for line in &lines {
            *self.system.get_mut(&line.material).unwrap() += line.consumed_kg;
        }
        self.runs[run].state = RecordState::Deleted;
    }

    /// Restore: re-deducts from the stored lines, even if the formula has
    /// changed since.
    fn restore_run(&mut self, run: usize) {
        assert!(self.runs[run].state.can_restore());
        let lines = self.runs[run].lines.clone();
        for line in &lines {
            *self.system.get_mut(&line.material).unwrap() -= line.consumed_kg;
        }
        self.runs[run].state = RecordState::Active;
    }

    /// Bulk delete: reverses active runs and purges everything.
    fn bulk_delete(&mut self, phrase: &str) -> Result<usize, &'static str> {
        if !confirmation_matches(MANUFACTURING_BULK_DELETE_PHRASE, phrase) {
            return Err("phrase mismatch");
        }
        let mut purged = 0;
        for i in 0..self.runs.len() {
            if self.runs[i].state == RecordState::Active {
                let lines = self.runs[i].lines.clone();
                for line in &lines {
                    *self.system.get_mut(&line.material).unwrap() += line.consumed_kg;
                }
            }
            if self.runs[i].state != RecordState::Purged {
                self.runs[i].state = RecordState::Purged;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// A run consumes line quantity × multiplier of each material and prices
    /// consumption at the snapshotted line prices.
    #[test]
    fn test_run_deducts_and_costs() {
        let mut plant = Plant::default();
        plant.initialize(1, dec("500"));
        plant.initialize(2, dec("800"));

        let formula = vec![(1, dec("100"), dec("12.00")), (2, dec("200"), dec("8.00"))];
        let run = plant.create_run(&formula, dec("1.5"), dec("300")).unwrap();

        assert_eq!(plant.system[&1], dec("350"));
        assert_eq!(plant.system[&2], dec("500"));
        // 150 * 12 + 300 * 8 = 4200
        assert_eq!(plant.runs[run].total_cost, dec("4200.00"));
        // 4200 / (300 * 1.5) = 9.33
        assert_eq!(plant.runs[run].cost_per_kilo, dec("9.33"));
        assert!(!plant.runs[run].insufficient_stock);
    }

    /// Consuming past zero commits with the insufficient flag; the negative
    /// quantity is kept as data.
    #[test]
    fn test_insufficient_stock_commits_negative() {
        let mut plant = Plant::default();
        plant.initialize(1, dec("500"));

        let formula = vec![(1, dec("150"), dec("10.00"))];
        let first = plant.create_run(&formula, dec("1"), dec("150")).unwrap();
        assert_eq!(plant.system[&1], dec("350"));
        assert!(!plant.runs[first].insufficient_stock);

        let second = plant.create_run(&formula, dec("2.667"), dec("150")).unwrap();
        // 150 * 2.667 = 400.05 consumed from 350
        assert_eq!(plant.system[&1], dec("-50.05"));
        assert!(plant.runs[second].insufficient_stock);
    }

    /// A formula material without an inventory record blocks the run.
    #[test]
    fn test_uninitialized_material_rejects_run() {
        let mut plant = Plant::default();
        plant.initialize(1, dec("100"));

        let formula = vec![(1, dec("10"), dec("5.00")), (9, dec("10"), dec("5.00"))];
        assert_eq!(
            plant.create_run(&formula, dec("1"), dec("20")),
            Err("uninitialized inventory")
        );
    }

    /// Delete and restore replay the run's stored lines, so stock round
    /// trips exactly even though the live formula changed in between.
    #[test]
    fn test_delete_restore_replays_stored_lines() {
        let mut plant = Plant::default();
        plant.initialize(1, dec("1000"));

        let original_formula = vec![(1, dec("100"), dec("12.00"))];
        let run = plant.create_run(&original_formula, dec("2"), dec("100")).unwrap();
        assert_eq!(plant.system[&1], dec("800"));

        plant.delete_run(run);
        assert_eq!(plant.system[&1], dec("1000"));

        // The formula is edited afterwards; the restore must not see it
        plant.restore_run(run);
        assert_eq!(plant.system[&1], dec("800"));
        assert_eq!(plant.runs[run].lines[0].consumed_kg, dec("200.000"));
    }

    /// Fixing only the manufacture date must not re-deduct or reprice: the
    /// stored lines stay put even after the formula was edited to different
    /// quantities.
    #[test]
    fn test_date_only_edit_keeps_stored_deductions() {
        let mut plant = Plant::default();
        plant.initialize(1, dec("1000"));

        let formula = vec![(1, dec("100"), dec("12.00"))];
        let run = plant.create_run(&formula, dec("2"), dec("100")).unwrap();
        assert_eq!(plant.system[&1], dec("800"));
        let cost_before = plant.runs[run].total_cost;

        // The formula grows to 150 kg afterwards; a date correction on the
        // run must not see it
        let edited = vec![(1, dec("150"), dec("12.00"))];
        plant.update_run(run, &edited, None, dec("150"), false);

        assert_eq!(plant.system[&1], dec("800"));
        assert_eq!(plant.runs[run].lines[0].consumed_kg, dec("200.000"));
        assert_eq!(plant.runs[run].total_cost, cost_before);
    }

    /// A multiplier change reverses the stored deductions first, then
    /// recomputes from the formula's current lines.
    #[test]
    fn test_multiplier_edit_recomputes_from_current_formula() {
        let mut plant = Plant::default();
        plant.initialize(1, dec("1000"));

        let formula = vec![(1, dec("100"), dec("12.00"))];
        let run = plant.create_run(&formula, dec("2"), dec("100")).unwrap();
        assert_eq!(plant.system[&1], dec("800"));

        let edited = vec![(1, dec("150"), dec("12.00"))];
        plant.update_run(run, &edited, Some(dec("1")), dec("150"), false);

        // 200 kg reversed, then 150 kg deducted from the edited formula
        assert_eq!(plant.system[&1], dec("850"));
        assert_eq!(plant.runs[run].lines[0].consumed_kg, dec("150.000"));
        assert_eq!(plant.runs[run].total_cost, dec("1800.00"));
        assert_eq!(plant.runs[run].cost_per_kilo, dec("12.00"));
    }

    /// Bulk delete reverses only active runs' deductions; already-deleted
    /// runs were reversed at delete time.
    #[test]
    fn test_bulk_delete_reverses_active_only() {
        let mut plant = Plant::default();
        plant.initialize(1, dec("1000"));
        let formula = vec![(1, dec("100"), dec("10.00"))];

        let first = plant.create_run(&formula, dec("1"), dec("100")).unwrap();
        plant.create_run(&formula, dec("2"), dec("100")).unwrap();
        plant.delete_run(first);
        assert_eq!(plant.system[&1], dec("800"));

        assert_eq!(plant.bulk_delete("ELIMINAR TODA LA FABRICACION"), Ok(2));
        assert_eq!(plant.system[&1], dec("1000"));
        assert!(plant.runs.iter().all(|r| r.state == RecordState::Purged));
    }

    /// The wrong phrase leaves everything untouched.
    #[test]
    fn test_bulk_delete_phrase_guard() {
        let mut plant = Plant::default();
        plant.initialize(1, dec("100"));
        let formula = vec![(1, dec("10"), dec("1.00"))];
        plant.create_run(&formula, dec("1"), dec("10")).unwrap();

        assert_eq!(
            plant.bulk_delete("eliminar toda la fabricacion"),
            Err("phrase mismatch")
        );
        assert_eq!(plant.system[&1], dec("90"));
        assert_eq!(plant.runs[0].state, RecordState::Active);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

proptest! {
    /// Create-then-delete always restores the exact system quantity,
    /// whatever the multiplier.
    #[test]
    fn create_delete_round_trips_stock(
        initial in 0u32..100_000,
        quantity in 1u32..1_000,
        multiplier_tenths in 1u32..100,
    ) {
        let initial = Decimal::from(initial);
        let multiplier = Decimal::new(multiplier_tenths as i64, 1);

        let mut plant = Plant::default();
        plant.initialize(1, initial);

        let formula = vec![(1, Decimal::from(quantity), dec("7.50"))];
        let run = plant.create_run(&formula, multiplier, Decimal::from(quantity)).unwrap();
        plant.delete_run(run);

        prop_assert_eq!(plant.system[&1], initial);
    }

    /// The insufficient flag fires exactly when consumption exceeds the
    /// available quantity.
    #[test]
    fn insufficient_flag_matches_arithmetic(
        available in 0u32..10_000,
        quantity in 1u32..10_000,
    ) {
        let available = Decimal::from(available);
        let quantity = Decimal::from(quantity);

        let mut plant = Plant::default();
        plant.initialize(1, available);

        let formula = vec![(1, quantity, dec("1.00"))];
        let run = plant.create_run(&formula, Decimal::ONE, quantity).unwrap();

        prop_assert_eq!(plant.runs[run].insufficient_stock, quantity > available);
        prop_assert_eq!(plant.system[&1], available - quantity);
    }
}
