use rust_decimal::Decimal;
use sqlx::Row;

use crate::{
    db::Database,
    error::{AppError, Result},
    models::{BasketReservation, SnapshotItem},
};

/// Result of a finalize attempt. `already_done` means another path won the
/// race on the same payment_id and there was nothing left to do.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub total_paid: Decimal,
    pub product_ids: Vec<i64>,
    pub already_done: bool,
}

/// Reserves one unit: `available` down, `reserved` up, basket row appended.
pub async fn reserve(db: &Database, user_id: i64, product_id: i64) -> Result<BasketReservation> {
    db.with_contention_retry(move || async move {
        let mut tx = db.pool().begin().await?;

        let row = sqlx::query(
            "UPDATE products
             SET available = available - 1, reserved = reserved + 1
             WHERE id = $1 AND available > 0
             RETURNING product_type, price",
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(AppError::OutOfStock);
        };
        let product_type: String = row.get("product_type");
        let price: Decimal = row.get("price");

        let reservation = sqlx::query_as::<_, BasketReservation>(
            "INSERT INTO basket_reservations (user_id, product_id, product_type, snapshot_price)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(&product_type)
        .bind(price)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    })
    .await
}

/// Releases everything in the user's basket and restores the counters.
/// Rows are deleted with RETURNING, so concurrent releases of the same
/// basket restore each unit exactly once; products deleted in the meantime
/// are silently skipped.
pub async fn release_basket(db: &Database, user_id: i64) -> Result<usize> {
    db.with_contention_retry(move || async move {
        let mut tx = db.pool().begin().await?;

        let released: Vec<i64> = sqlx::query_scalar(
            "DELETE FROM basket_reservations WHERE user_id = $1 RETURNING product_id",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        for product_id in &released {
            sqlx::query(
                "UPDATE products
                 SET available = available + 1,
                     reserved = GREATEST(reserved - 1, 0)
                 WHERE id = $1",
            )
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(released.len())
    })
    .await
}

/// Periodic expiry: releases reservations older than the basket timeout.
/// Users mid-payment (live purchase deposit) are skipped; the payment
/// timeout path owns their cleanup. One transaction per user.
pub async fn expire(db: &Database, basket_timeout_secs: i64) -> Result<Vec<(i64, usize)>> {
    expire_older_than(db, basket_timeout_secs).await
}

/// Safety net behind `expire`: reservations whose user has no live pending
/// deposit at all, held past the timeout plus a grace period. Catches
/// baskets orphaned by a crash between invoice failure and release.
pub async fn release_abandoned(db: &Database, older_than_secs: i64) -> Result<Vec<(i64, usize)>> {
    expire_older_than(db, older_than_secs).await
}

async fn expire_older_than(db: &Database, age_secs: i64) -> Result<Vec<(i64, usize)>> {
    let user_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT br.user_id
         FROM basket_reservations br
         WHERE br.reserved_at <= NOW() - make_interval(secs => $1)
           AND NOT EXISTS (
               SELECT 1 FROM pending_deposits pd
               WHERE pd.user_id = br.user_id AND pd.is_purchase = TRUE
           )",
    )
    .bind(age_secs as f64)
    .fetch_all(db.pool())
    .await?;

    let mut released = Vec::new();
    for user_id in user_ids {
        match release_expired_for_user(db, user_id, age_secs).await {
            Ok(0) => {}
            Ok(count) => released.push((user_id, count)),
            Err(e) => tracing::error!("Failed to expire basket for user {}: {}", user_id, e),
        }
    }
    Ok(released)
}

async fn release_expired_for_user(db: &Database, user_id: i64, age_secs: i64) -> Result<usize> {
    db.with_contention_retry(move || async move {
        let mut tx = db.pool().begin().await?;

        let released: Vec<i64> = sqlx::query_scalar(
            "DELETE FROM basket_reservations
             WHERE user_id = $1 AND reserved_at <= NOW() - make_interval(secs => $2)
             RETURNING product_id",
        )
        .bind(user_id)
        .bind(age_secs as f64)
        .fetch_all(&mut *tx)
        .await?;

        for product_id in &released {
            sqlx::query(
                "UPDATE products
                 SET available = available + 1,
                     reserved = GREATEST(reserved - 1, 0)
                 WHERE id = $1",
            )
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(released.len())
    })
    .await
}

/// The atomic purchase commit. All steps run in one transaction:
///
/// 1. when `payment_id` is set, claim the pending deposit (DELETE
///    RETURNING); a missing row means an earlier attempt already
///    committed and this call is a no-op,
/// 2. consume one unit per snapshot entry: the held reservation
///    (`reserved`) when one exists, free stock (`available`) otherwise,
/// 3. insert a purchase row per unit at the snapshot price,
/// 4. bump the buyer's purchase counter,
/// 5. conditionally increment the coupon use count; exhaustion after
///    payment never reverses the sale,
/// 6. clear the buyer's basket.
pub async fn finalize(
    db: &Database,
    user_id: i64,
    snapshot: &[SnapshotItem],
    discount_code: Option<&str>,
    payment_id: Option<&str>,
) -> Result<FinalizeOutcome> {
    if snapshot.is_empty() {
        return Err(AppError::FinalizeFailed("empty basket snapshot".to_string()));
    }

    db.with_contention_retry(move || async move {
        let mut tx = db.pool().begin().await?;

        if let Some(payment_id) = payment_id {
            let claimed = sqlx::query(
                "DELETE FROM pending_deposits WHERE payment_id = $1",
            )
            .bind(payment_id)
            .execute(&mut *tx)
            .await?;
            if claimed.rows_affected() == 0 {
                return Ok(FinalizeOutcome {
                    total_paid: Decimal::ZERO,
                    product_ids: Vec::new(),
                    already_done: true,
                });
            }
        }

        let mut total_paid = Decimal::ZERO;
        let mut product_ids = Vec::with_capacity(snapshot.len());

        for item in snapshot {
            // Take the unit from the reservation when it is still held;
            // fall back to free stock when the reservation was released in
            // the meantime. Either way the unit count drops by exactly one.
            let consumed = sqlx::query(
                "UPDATE products
                 SET available = CASE WHEN reserved > 0 THEN available ELSE available - 1 END,
                     reserved  = CASE WHEN reserved > 0 THEN reserved - 1 ELSE 0 END
                 WHERE id = $1 AND (reserved > 0 OR available > 0)",
            )
            .bind(item.product_id)
            .execute(&mut *tx)
            .await?;

            if consumed.rows_affected() == 0 {
                tracing::error!(
                    "Product {} vanished before finalization for user {}",
                    item.product_id,
                    user_id
                );
                return Err(AppError::StockVanished);
            }

            sqlx::query(
                "INSERT INTO purchases
                    (user_id, product_id, product_name, product_type, product_size,
                     price_paid, city, district)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(user_id)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(&item.product_type)
            .bind(&item.size)
            .bind(item.price)
            .bind(&item.city)
            .bind(&item.district)
            .execute(&mut *tx)
            .await?;

            total_paid += item.price;
            product_ids.push(item.product_id);
        }

        sqlx::query("UPDATE users SET total_purchases = total_purchases + $1 WHERE user_id = $2")
            .bind(snapshot.len() as i32)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if let Some(code) = discount_code {
            let incremented = sqlx::query(
                "UPDATE discount_codes
                 SET uses_count = uses_count + 1
                 WHERE code = $1 AND (max_uses IS NULL OR uses_count < max_uses)",
            )
            .bind(code)
            .execute(&mut *tx)
            .await?;

            if incremented.rows_affected() == 0 {
                // The payment already happened; the sale stands without the
                // discount bookkeeping.
                tracing::warn!(
                    "Discount code '{}' exhausted or gone at finalization for user {}; \
                     sale proceeds without incrementing",
                    code,
                    user_id
                );
            }
        }

        sqlx::query("DELETE FROM basket_reservations WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            "Finalized purchase for user {}: {} items, {} EUR",
            user_id,
            product_ids.len(),
            total_paid
        );

        Ok(FinalizeOutcome {
            total_paid,
            product_ids,
            already_done: false,
        })
    })
    .await
}
