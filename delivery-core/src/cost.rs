//! Delivery cost calculation
//!
//! Pure arithmetic, no I/O. Rounding is left to storage/presentation.

use rust_decimal::Decimal;

/// Compute the delivery cost in the target currency.
///
/// `base_cost_usd = weight × 0.5 + value_usd × 0.01`, converted with the
/// supplied USD rate. Deterministic: identical inputs always yield the
/// identical output.
pub fn compute_cost(weight: Decimal, value_of_contents_usd: Decimal, usd_rate: Decimal) -> Decimal {
    // USD 0.50 per kilogram plus 1% of the declared contents value
    let base_cost_usd = weight * Decimal::new(5, 1) + value_of_contents_usd * Decimal::new(1, 2);

    base_cost_usd * usd_rate
}
