//! Validation utilities for the Farm Operations Platform

use rust_decimal::Decimal;

/// Literal phrase required to bulk-delete all purchases.
/// Deliberate friction for a destructive operation, not a security control.
pub const PURCHASES_BULK_DELETE_PHRASE: &str = "ELIMINAR TODAS LAS COMPRAS";

/// Literal phrase required to bulk-delete all manufacturing runs.
pub const MANUFACTURING_BULK_DELETE_PHRASE: &str = "ELIMINAR TODA LA FABRICACION";

/// Validate that a kilogram quantity is strictly positive
pub fn validate_quantity(quantity_kg: Decimal) -> Result<(), &'static str> {
    if quantity_kg <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate that a unit price is non-negative
pub fn validate_unit_price(unit_price: Decimal) -> Result<(), &'static str> {
    if unit_price < Decimal::ZERO {
        return Err("Unit price cannot be negative");
    }
    Ok(())
}

/// Validate that a manufacturing multiplier is strictly positive
pub fn validate_multiplier(multiplier: Decimal) -> Result<(), &'static str> {
    if multiplier <= Decimal::ZERO {
        return Err("Multiplier must be positive");
    }
    Ok(())
}

/// Validate material/formula code format (2-20 uppercase alphanumeric,
/// dashes allowed)
pub fn validate_code(code: &str) -> Result<(), &'static str> {
    if code.len() < 2 {
        return Err("Code must be at least 2 characters");
    }
    if code.len() > 20 {
        return Err("Code must be at most 20 characters");
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("Code must be uppercase alphanumeric");
    }
    Ok(())
}

/// Check a bulk-delete confirmation phrase against the expected literal.
/// The match is exact: no trimming, no case folding.
pub fn confirmation_matches(expected: &str, supplied: &str) -> bool {
    expected == supplied
}
