use rust_decimal::Decimal;

use crate::{
    db::Database,
    error::{AppError, Result},
    models::{BasketReservation, DiscountKind, SnapshotItem},
    utils::floor_cents,
};

/// Outcome of resolving a coupon against a basket subtotal.
#[derive(Debug, Clone)]
pub struct DiscountOutcome {
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub discounted_total: Decimal,
}

/// Per-unit reseller discount, rounded DOWN to cents.
pub fn unit_reseller_discount(price: Decimal, percent: Decimal) -> Decimal {
    floor_cents(price * percent / Decimal::from(100))
}

pub fn unit_price_after_reseller(price: Decimal, percent: Decimal) -> Decimal {
    price - unit_reseller_discount(price, percent)
}

/// Applies a coupon to the reseller subtotal. Percentage discounts round
/// the discount amount DOWN to cents; fixed discounts floor at zero.
pub fn apply_coupon(kind: DiscountKind, value: Decimal, subtotal: Decimal) -> Decimal {
    match kind {
        DiscountKind::Percentage => {
            let discount = floor_cents(subtotal * value / Decimal::from(100));
            (subtotal - discount).max(Decimal::ZERO)
        }
        DiscountKind::FixedEur => (subtotal - value).max(Decimal::ZERO),
    }
}

/// Builds the invoice snapshot from the user's live reservations: each
/// unit priced after the reseller discount for its product type. The
/// resulting prices are authoritative for payment and finalization.
pub async fn snapshot_from_reservations(
    db: &Database,
    user_id: i64,
    reservations: &[BasketReservation],
) -> Result<Vec<SnapshotItem>> {
    let mut items = Vec::with_capacity(reservations.len());
    for reservation in reservations {
        let Some(product) = db.get_product(reservation.product_id).await? else {
            return Err(AppError::StockVanished);
        };
        let percent = db.get_reseller_percent(user_id, &product.product_type).await;
        items.push(SnapshotItem {
            product_id: product.id,
            name: product.name,
            product_type: product.product_type,
            size: product.size,
            price: unit_price_after_reseller(product.price, percent),
            city: product.city,
            district: product.district,
            pickup_text: product.pickup_text,
        });
    }
    Ok(items)
}

pub fn snapshot_subtotal(items: &[SnapshotItem]) -> Decimal {
    items.iter().map(|item| item.price).sum()
}

/// Re-validates a coupon against the current subtotal. Must run again
/// immediately before invoice creation: a code can go inactive or run out
/// of uses between basket display and payment.
pub async fn validate_discount(
    db: &Database,
    code: &str,
    subtotal: Decimal,
) -> Result<DiscountOutcome> {
    let Some(row) = db.get_discount_code(code).await? else {
        return Err(AppError::DiscountInvalid(format!("code '{}' not found", code)));
    };
    if !row.active {
        return Err(AppError::DiscountInvalid(format!("code '{}' is inactive", code)));
    }
    if row.is_exhausted() {
        return Err(AppError::DiscountExhausted);
    }
    let Some(kind) = row.kind() else {
        return Err(AppError::DiscountInvalid(format!(
            "code '{}' has unknown kind '{}'",
            code, row.kind
        )));
    };

    Ok(DiscountOutcome {
        code: row.code,
        kind,
        value: row.value,
        discounted_total: apply_coupon(kind, row.value, subtotal),
    })
}

/// The quoted total and the re-validated total must agree to the cent.
pub fn verify_quoted_total(recomputed: Decimal, quoted: Decimal) -> Result<()> {
    if (recomputed - quoted).abs() > Decimal::new(1, 2) {
        return Err(AppError::DiscountMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn eur(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn reseller_discount_rounds_down() {
        // 15% of 9.99 = 1.4985, floored to 1.49
        assert_eq!(unit_reseller_discount(eur("9.99"), eur("15")), eur("1.49"));
        assert_eq!(unit_price_after_reseller(eur("9.99"), eur("15")), eur("8.50"));
    }

    #[test]
    fn zero_percent_keeps_full_price() {
        assert_eq!(unit_price_after_reseller(eur("10.00"), Decimal::ZERO), eur("10.00"));
    }

    #[test]
    fn percentage_coupon_applies_to_subtotal() {
        assert_eq!(
            apply_coupon(DiscountKind::Percentage, eur("10"), eur("50.00")),
            eur("45.00")
        );
    }

    #[test]
    fn fixed_coupon_floors_at_zero() {
        assert_eq!(
            apply_coupon(DiscountKind::FixedEur, eur("5.00"), eur("20.00")),
            eur("15.00")
        );
        assert_eq!(
            apply_coupon(DiscountKind::FixedEur, eur("25.00"), eur("20.00")),
            Decimal::ZERO
        );
    }

    #[test]
    fn quoted_total_tolerance_is_one_cent() {
        assert!(verify_quoted_total(eur("10.00"), eur("10.01")).is_ok());
        assert!(verify_quoted_total(eur("10.00"), eur("10.02")).is_err());
    }
}
