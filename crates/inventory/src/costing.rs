//! Moving (weighted) average costing.

use rust_decimal::{Decimal, RoundingStrategy};

use novaerp_core::{DomainError, DomainResult};

/// Average cost after receiving `in_qty` units at `in_cost` into a position of
/// `old_qty` units at `old_cost`, rounded to `scale` decimal places.
///
/// `(old_qty*old_cost + in_qty*in_cost) / (old_qty + in_qty)`. When the
/// existing position is empty or short (`old_qty <= 0`) there is nothing to
/// blend with and the incoming cost becomes the average; this also covers the
/// `old_qty + in_qty == 0` case.
pub fn weighted_average_cost(
    old_qty: Decimal,
    old_cost: Decimal,
    in_qty: Decimal,
    in_cost: Decimal,
    scale: u32,
) -> DomainResult<Decimal> {
    let total_qty = old_qty + in_qty;
    if old_qty <= Decimal::ZERO || total_qty.is_zero() {
        return Ok(round_cost(in_cost, scale));
    }

    let old_value = old_qty
        .checked_mul(old_cost)
        .ok_or_else(|| overflow("existing stock value"))?;
    let in_value = in_qty
        .checked_mul(in_cost)
        .ok_or_else(|| overflow("incoming stock value"))?;
    let blended = old_value
        .checked_add(in_value)
        .and_then(|v| v.checked_div(total_qty))
        .ok_or_else(|| overflow("average cost"))?;

    Ok(round_cost(blended, scale))
}

pub fn round_cost(cost: Decimal, scale: u32) -> Decimal {
    cost.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

fn overflow(what: &str) -> DomainError {
    DomainError::validation(format!("{what} overflows decimal range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn opening_into_empty_position_takes_incoming_cost() {
        let cost = weighted_average_cost(dec!(0), dec!(0), dec!(100), dec!(10), 4).unwrap();
        assert_eq!(cost, dec!(10));
    }

    #[test]
    fn blends_by_quantity() {
        let cost = weighted_average_cost(dec!(100), dec!(10), dec!(50), dec!(16), 4).unwrap();
        assert_eq!(cost, dec!(12.0));
    }

    #[test]
    fn zero_total_quantity_yields_incoming_cost() {
        let cost = weighted_average_cost(dec!(-5), dec!(9), dec!(5), dec!(7.5), 4).unwrap();
        assert_eq!(cost, dec!(7.5));
    }

    #[test]
    fn rounds_to_configured_scale() {
        // (1*1 + 2*2) / 3 = 1.6666..
        let cost = weighted_average_cost(dec!(1), dec!(1), dec!(2), dec!(2), 2).unwrap();
        assert_eq!(cost, dec!(1.67));
    }

    fn qty() -> impl Strategy<Value = Decimal> {
        (1i64..1_000_000).prop_map(|n| Decimal::new(n, 2))
    }

    fn cost() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000).prop_map(|n| Decimal::new(n, 3))
    }

    proptest! {
        #[test]
        fn matches_formula_at_scale(old_qty in qty(), old_cost in cost(), in_qty in qty(), in_cost in cost()) {
            let got = weighted_average_cost(old_qty, old_cost, in_qty, in_cost, 6).unwrap();
            let expected = ((old_qty * old_cost + in_qty * in_cost) / (old_qty + in_qty))
                .round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero);
            prop_assert_eq!(got, expected);
        }

        #[test]
        fn stays_between_input_costs(old_qty in qty(), old_cost in cost(), in_qty in qty(), in_cost in cost()) {
            let got = weighted_average_cost(old_qty, old_cost, in_qty, in_cost, 6).unwrap();
            let lo = old_cost.min(in_cost).round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero);
            let hi = old_cost.max(in_cost).round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero);
            prop_assert!(got >= lo && got <= hi);
        }
    }
}
