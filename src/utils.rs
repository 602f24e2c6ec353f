// Shared money/rounding helpers.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::constants::LAMPORTS_PER_SOL;

/// EUR amounts always display with two decimals.
pub fn format_eur(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

/// Round an EUR amount DOWN to cents (used for discounts and credits of
/// received funds: the user never gets charged the rounding).
pub fn floor_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity)
}

/// Round a SOL amount UP to five decimals (used for charge-out conversion:
/// the invoice never undershoots the EUR target).
pub fn ceil_sol(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(5, RoundingStrategy::ToPositiveInfinity)
}

pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

pub fn sol_to_lamports(sol: Decimal) -> u64 {
    let lamports = sol * Decimal::from(LAMPORTS_PER_SOL);
    lamports
        .round_dp_with_strategy(0, RoundingStrategy::ToNegativeInfinity)
        .try_into()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn floor_cents_rounds_down() {
        assert_eq!(
            floor_cents(Decimal::from_str("1.999").unwrap()),
            Decimal::from_str("1.99").unwrap()
        );
        assert_eq!(
            floor_cents(Decimal::from_str("1.001").unwrap()),
            Decimal::from_str("1.00").unwrap()
        );
    }

    #[test]
    fn ceil_sol_rounds_up_to_5dp() {
        assert_eq!(
            ceil_sol(Decimal::from_str("0.0500001").unwrap()),
            Decimal::from_str("0.05001").unwrap()
        );
        // 10 EUR at 200 EUR/SOL is exactly representable
        let exact = Decimal::from(10) / Decimal::from(200);
        assert_eq!(ceil_sol(exact), Decimal::from_str("0.05000").unwrap());
    }

    #[test]
    fn lamports_sol_conversions() {
        assert_eq!(lamports_to_sol(1_000_000_000), Decimal::from(1));
        assert_eq!(sol_to_lamports(Decimal::from_str("0.05").unwrap()), 50_000_000);
        assert_eq!(sol_to_lamports(Decimal::from_str("0.000000001").unwrap()), 1);
    }

    #[test]
    fn format_eur_two_decimals() {
        assert_eq!(format_eur(Decimal::from(30)), "30.00");
        assert_eq!(format_eur(Decimal::from_str("9.5").unwrap()), "9.50");
    }
}
