//! Purchase ledger tests
//!
//! Simulation-based tests for purchase recording, line voids, soft delete /
//! restore, and the guarded bulk delete. The simulation mirrors the service
//! layer's rules: reference prices recompute from the active line set, and
//! inventory aggregates move with every apply/reverse.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

use shared::{
    confirmation_matches, costing, RecordState, PURCHASES_BULK_DELETE_PHRASE,
};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ============================================================================
// Ledger Simulation
// ============================================================================

#[derive(Debug, Clone)]
struct SimLine {
    material: u32,
    quantity_kg: Decimal,
    unit_price: Decimal,
    state: RecordState,
}

#[derive(Debug, Clone)]
struct SimPurchase {
    lines: Vec<SimLine>,
    state: RecordState,
}

/// In-memory model of the purchase ledger and its derived state
#[derive(Debug, Default)]
struct Ledger {
    purchases: Vec<SimPurchase>,
    /// Last computed reference price per material; kept when the active set
    /// empties
    reference_prices: BTreeMap<u32, Decimal>,
    /// (cumulative received, system quantity) per initialized material
    inventory: BTreeMap<u32, (Decimal, Decimal)>,
    /// Active manufacturing runs; any blocks the bulk delete
    active_manufacturing_runs: usize,
    /// Materials in the order their inventory rows were touched
    receipt_log: Vec<u32>,
}

impl Ledger {
    fn initialize_inventory(&mut self, material: u32, physical: Decimal) {
        self.inventory.insert(material, (physical, physical));
    }

    fn active_lines(&self, material: u32) -> Vec<(Decimal, Decimal)> {
        self.purchases
            .iter()
            .filter(|p| p.state == RecordState::Active)
            .flat_map(|p| p.lines.iter())
            .filter(|l| l.material == material && l.state == RecordState::Active)
            .map(|l| (l.quantity_kg, l.unit_price))
            .collect()
    }

    fn recompute_price(&mut self, material: u32) {
        if let Some(price) = costing::weighted_average_price(&self.active_lines(material)) {
            self.reference_prices.insert(material, price);
        }
    }

    fn apply_receipt(&mut self, material: u32, quantity: Decimal) {
        self.receipt_log.push(material);
        if let Some((cumulative, system)) = self.inventory.get_mut(&material) {
            *cumulative += quantity;
            *system += quantity;
        }
    }

    fn reverse_receipt(&mut self, material: u32, quantity: Decimal) {
        if let Some((cumulative, system)) = self.inventory.get_mut(&material) {
            *cumulative -= quantity;
            *system -= quantity;
        }
    }

    fn record_purchase(&mut self, lines: Vec<(u32, Decimal, Decimal)>) -> usize {
        let purchase = SimPurchase {
            lines: lines
                .iter()
                .map(|(m, q, p)| SimLine {
                    material: *m,
                    quantity_kg: *q,
                    unit_price: *p,
                    state: RecordState::Active,
                })
                .collect(),
            state: RecordState::Active,
        };
        self.purchases.push(purchase);
        // Inventory rows are touched in ascending material order, not in
        // input-line order
        let mut receipts: Vec<(u32, Decimal)> =
            lines.iter().map(|(m, q, _)| (*m, *q)).collect();
        receipts.sort_by_key(|(m, _)| *m);
        let mut materials: Vec<u32> = receipts.iter().map(|(m, _)| *m).collect();
        materials.dedup();
        for m in materials {
            self.recompute_price(m);
        }
        for (m, q) in receipts {
            self.apply_receipt(m, q);
        }
        self.purchases.len() - 1
    }

    fn void_line(&mut self, purchase: usize, line: usize) {
        let (material, quantity) = {
            let l = &mut self.purchases[purchase].lines[line];
            assert!(l.state.can_delete());
            l.state = RecordState::Deleted;
            (l.material, l.quantity_kg)
        };
        self.recompute_price(material);
        self.reverse_receipt(material, quantity);
    }

    fn delete_purchase(&mut self, purchase: usize) -> Result<(), &'static str> {
        let p = &mut self.purchases[purchase];
        if p.lines.iter().any(|l| l.state == RecordState::Active) {
            return Err("active lines remain");
        }
        if !p.state.can_delete() {
            return Err("not active");
        }
        p.state = RecordState::Deleted;
        Ok(())
    }

    fn restore_purchase(&mut self, purchase: usize) {
        assert!(self.purchases[purchase].state.can_restore());
        self.purchases[purchase].state = RecordState::Active;
        let restored: Vec<(u32, Decimal)> = self.purchases[purchase]
            .lines
            .iter_mut()
            .filter(|l| l.state == RecordState::Deleted)
            .map(|l| {
                l.state = RecordState::Active;
                (l.material, l.quantity_kg)
            })
            .collect();
        for (m, q) in restored {
            self.recompute_price(m);
            self.apply_receipt(m, q);
        }
    }

    /// Bulk delete: requires the exact phrase and zero active manufacturing
    /// runs, then purges every purchase, reversing still-active lines.
    fn bulk_delete(&mut self, phrase: &str) -> Result<usize, &'static str> {
        if !confirmation_matches(PURCHASES_BULK_DELETE_PHRASE, phrase) {
            return Err("phrase mismatch");
        }
        if self.active_manufacturing_runs > 0 {
            return Err("active manufacturing runs exist");
        }
        let mut purged = 0;
        for i in 0..self.purchases.len() {
            if self.purchases[i].state == RecordState::Purged {
                continue;
            }
            let header_active = self.purchases[i].state == RecordState::Active;
            let active: Vec<(u32, Decimal)> = self.purchases[i]
                .lines
                .iter()
                .filter(|l| header_active && l.state == RecordState::Active)
                .map(|l| (l.material, l.quantity_kg))
                .collect();
            for line in &mut self.purchases[i].lines {
                line.state = RecordState::Purged;
            }
            self.purchases[i].state = RecordState::Purged;
            for (m, q) in active {
                self.recompute_price(m);
                self.reverse_receipt(m, q);
            }
            purged += 1;
        }
        Ok(purged)
    }

    fn header_total(&self, purchase: usize) -> Decimal {
        self.purchases[purchase]
            .lines
            .iter()
            .filter(|l| l.state == RecordState::Active)
            .map(|l| costing::line_subtotal(l.quantity_kg, l.unit_price))
            .sum()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Recording two purchases of the same material averages their prices;
    /// voiding one line moves the price back to the survivor's.
    #[test]
    fn test_price_propagation_through_void() {
        let mut ledger = Ledger::default();
        ledger.initialize_inventory(1, dec("0"));

        ledger.record_purchase(vec![(1, dec("100"), dec("10"))]);
        assert_eq!(ledger.reference_prices[&1], dec("10.00"));

        let second = ledger.record_purchase(vec![(1, dec("200"), dec("13"))]);
        assert_eq!(ledger.reference_prices[&1], dec("12.00"));
        assert_eq!(ledger.inventory[&1], (dec("300"), dec("300")));

        ledger.void_line(second, 0);
        assert_eq!(ledger.reference_prices[&1], dec("10.00"));
        assert_eq!(ledger.inventory[&1], (dec("100"), dec("100")));
    }

    /// Voiding the last active line keeps the last computed price in place.
    #[test]
    fn test_emptied_active_set_keeps_price() {
        let mut ledger = Ledger::default();
        let p = ledger.record_purchase(vec![(7, dec("50"), dec("4.40"))]);
        assert_eq!(ledger.reference_prices[&7], dec("4.40"));

        ledger.void_line(p, 0);
        assert_eq!(ledger.reference_prices[&7], dec("4.40"));
    }

    /// A header with active lines refuses deletion; after voiding them it
    /// deletes cleanly and leaves inventory untouched (the voids already
    /// reversed the receipts).
    #[test]
    fn test_delete_requires_voided_lines() {
        let mut ledger = Ledger::default();
        ledger.initialize_inventory(1, dec("500"));
        let p = ledger.record_purchase(vec![
            (1, dec("100"), dec("10")),
            (1, dec("40"), dec("12")),
        ]);

        assert_eq!(ledger.delete_purchase(p), Err("active lines remain"));

        ledger.void_line(p, 0);
        ledger.void_line(p, 1);
        assert_eq!(ledger.inventory[&1], (dec("500"), dec("500")));
        assert_eq!(ledger.delete_purchase(p), Ok(()));
        assert_eq!(ledger.inventory[&1], (dec("500"), dec("500")));
    }

    /// Restore reactivates the header and its voided lines and reapplies
    /// their effects.
    #[test]
    fn test_restore_reapplies_effects() {
        let mut ledger = Ledger::default();
        ledger.initialize_inventory(1, dec("0"));
        let p = ledger.record_purchase(vec![(1, dec("100"), dec("10"))]);

        ledger.void_line(p, 0);
        ledger.delete_purchase(p).unwrap();
        assert_eq!(ledger.inventory[&1], (dec("0"), dec("0")));

        ledger.restore_purchase(p);
        assert_eq!(ledger.purchases[p].state, RecordState::Active);
        assert_eq!(ledger.reference_prices[&1], dec("10.00"));
        assert_eq!(ledger.inventory[&1], (dec("100"), dec("100")));
        assert_eq!(ledger.header_total(p), dec("1000.00"));
    }

    /// The bulk-delete confirmation phrase is matched exactly.
    #[test]
    fn test_bulk_delete_phrase() {
        assert!(confirmation_matches(
            PURCHASES_BULK_DELETE_PHRASE,
            "ELIMINAR TODAS LAS COMPRAS"
        ));
        assert!(!confirmation_matches(PURCHASES_BULK_DELETE_PHRASE, ""));
        assert!(!confirmation_matches(
            PURCHASES_BULK_DELETE_PHRASE,
            "ELIMINAR TODAS LAS COMPRAS "
        ));
    }

    /// Any active manufacturing run blocks the bulk delete, even with the
    /// correct phrase, and leaves the ledger untouched.
    #[test]
    fn test_bulk_delete_blocked_by_active_runs() {
        let mut ledger = Ledger::default();
        ledger.initialize_inventory(1, dec("0"));
        let p = ledger.record_purchase(vec![(1, dec("100"), dec("10"))]);
        ledger.active_manufacturing_runs = 1;

        assert_eq!(
            ledger.bulk_delete("ELIMINAR TODAS LAS COMPRAS"),
            Err("active manufacturing runs exist")
        );
        assert_eq!(ledger.purchases[p].state, RecordState::Active);
        assert_eq!(ledger.inventory[&1], (dec("100"), dec("100")));
    }

    /// With no runs in the way, the bulk delete purges everything and
    /// reverses the receipts of still-active lines.
    #[test]
    fn test_bulk_delete_purges_and_reverses() {
        let mut ledger = Ledger::default();
        ledger.initialize_inventory(1, dec("0"));
        let first = ledger.record_purchase(vec![(1, dec("100"), dec("10"))]);
        ledger.record_purchase(vec![(1, dec("50"), dec("12"))]);
        ledger.void_line(first, 0);
        ledger.delete_purchase(first).unwrap();
        assert_eq!(ledger.inventory[&1], (dec("50"), dec("50")));

        assert_eq!(ledger.bulk_delete("ELIMINAR TODAS LAS COMPRAS"), Ok(2));
        assert_eq!(ledger.inventory[&1], (dec("0"), dec("0")));
        assert!(ledger
            .purchases
            .iter()
            .all(|p| p.state == RecordState::Purged));
    }

    /// A multi-line purchase touches inventory rows in ascending material
    /// order regardless of line order.
    #[test]
    fn test_receipts_apply_in_ascending_material_order() {
        let mut ledger = Ledger::default();
        for material in 1..=3 {
            ledger.initialize_inventory(material, dec("0"));
        }

        ledger.record_purchase(vec![
            (3, dec("30"), dec("1.00")),
            (1, dec("10"), dec("1.00")),
            (2, dec("20"), dec("1.00")),
        ]);

        assert_eq!(ledger.receipt_log, vec![1, 2, 3]);
        assert_eq!(ledger.inventory[&1], (dec("10"), dec("10")));
        assert_eq!(ledger.inventory[&3], (dec("30"), dec("30")));
    }

    /// Purged is terminal: no restore, no further delete.
    #[test]
    fn test_purged_is_terminal() {
        assert!(!RecordState::Purged.can_restore());
        assert!(!RecordState::Purged.can_delete());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

proptest! {
    /// Voiding a line and recomputing equals a ledger that never contained
    /// it.
    #[test]
    fn void_equals_never_recorded(
        base_qty in 1u32..10_000,
        base_price in 1u32..5_000,
        extra_qty in 1u32..10_000,
        extra_price in 1u32..5_000,
    ) {
        let base_qty = Decimal::from(base_qty);
        let base_price = Decimal::new(base_price as i64, 2);
        let extra_qty = Decimal::from(extra_qty);
        let extra_price = Decimal::new(extra_price as i64, 2);

        let mut with_void = Ledger::default();
        with_void.record_purchase(vec![(1, base_qty, base_price)]);
        let extra = with_void.record_purchase(vec![(1, extra_qty, extra_price)]);
        with_void.void_line(extra, 0);

        let mut without = Ledger::default();
        without.record_purchase(vec![(1, base_qty, base_price)]);

        prop_assert_eq!(
            with_void.reference_prices[&1],
            without.reference_prices[&1]
        );
    }

    /// Delete-then-restore returns the ledger's derived state to its
    /// pre-delete values.
    #[test]
    fn delete_restore_round_trips(
        qty in 1u32..10_000,
        price in 1u32..5_000,
        initial in 0u32..1_000,
    ) {
        let qty = Decimal::from(qty);
        let price = Decimal::new(price as i64, 2);
        let initial = Decimal::from(initial);

        let mut ledger = Ledger::default();
        ledger.initialize_inventory(1, initial);
        let p = ledger.record_purchase(vec![(1, qty, price)]);

        let price_before = ledger.reference_prices[&1];
        let inventory_before = ledger.inventory[&1];

        ledger.void_line(p, 0);
        ledger.delete_purchase(p).unwrap();
        ledger.restore_purchase(p);

        prop_assert_eq!(ledger.reference_prices[&1], price_before);
        prop_assert_eq!(ledger.inventory[&1], inventory_before);
    }
}
