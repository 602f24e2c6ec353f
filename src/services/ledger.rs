use rust_decimal::Decimal;

use crate::{
    db::Database,
    error::{AppError, Result},
    integrations::TelegramClient,
    models::SnapshotItem,
    services::reservations::{self, FinalizeOutcome},
    utils::format_eur,
};

/// Credits a user's balance, writes the audit entry in the same
/// transaction, and notifies the user. Returns the new balance.
pub async fn credit(
    db: &Database,
    bot: &TelegramClient,
    user_id: i64,
    amount_eur: Decimal,
    reason: &str,
) -> Result<Decimal> {
    if amount_eur <= Decimal::ZERO {
        return Err(AppError::BadRequest(format!(
            "refusing non-positive credit of {} EUR",
            amount_eur
        )));
    }

    let new_balance = db
        .with_contention_retry(move || async move {
            let mut tx = db.pool().begin().await?;

            let new_balance: Option<Decimal> = sqlx::query_scalar(
                "UPDATE users SET balance = balance + $1 WHERE user_id = $2 RETURNING balance",
            )
            .bind(amount_eur)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(new_balance) = new_balance else {
                return Err(AppError::NotFound(format!("user {} not found", user_id)));
            };

            sqlx::query(
                "INSERT INTO admin_log
                    (admin_id, action, target_user_id, reason, amount_change, old_value, new_value)
                 VALUES (0, 'BALANCE_CREDIT_AUTO', $1, $2, $3, $4, $5)",
            )
            .bind(user_id)
            .bind(reason)
            .bind(amount_eur)
            .bind(new_balance - amount_eur)
            .bind(new_balance)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(new_balance)
        })
        .await?;

    tracing::info!(
        "Credited {} EUR to user {} ({}), new balance {}",
        amount_eur,
        user_id,
        reason,
        new_balance
    );

    let notice = credit_notice(reason, amount_eur, new_balance);
    if let Err(e) = bot.send_message(user_id, &notice).await {
        tracing::warn!("Could not notify user {} about credit: {}", user_id, e);
    }

    Ok(new_balance)
}

/// Debits a user's balance, refusing to go negative. Audit entry in the
/// same transaction.
pub async fn debit(
    db: &Database,
    user_id: i64,
    amount_eur: Decimal,
    reason: &str,
) -> Result<Decimal> {
    if amount_eur <= Decimal::ZERO {
        return Err(AppError::BadRequest(format!(
            "refusing non-positive debit of {} EUR",
            amount_eur
        )));
    }

    let new_balance = db
        .with_contention_retry(move || async move {
            let mut tx = db.pool().begin().await?;

            let new_balance: Option<Decimal> = sqlx::query_scalar(
                "UPDATE users
                 SET balance = balance - $1
                 WHERE user_id = $2 AND balance >= $1
                 RETURNING balance",
            )
            .bind(amount_eur)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(new_balance) = new_balance else {
                return Err(AppError::InsufficientBalance);
            };

            sqlx::query(
                "INSERT INTO admin_log
                    (admin_id, action, target_user_id, reason, amount_change, old_value, new_value)
                 VALUES (0, 'BALANCE_DEBIT', $1, $2, $3, $4, $5)",
            )
            .bind(user_id)
            .bind(reason)
            .bind(-amount_eur)
            .bind(new_balance + amount_eur)
            .bind(new_balance)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(new_balance)
        })
        .await?;

    tracing::info!(
        "Debited {} EUR from user {} ({}), new balance {}",
        amount_eur,
        user_id,
        reason,
        new_balance
    );
    Ok(new_balance)
}

/// Pay-with-balance flow: debit, then finalize; a finalize failure
/// re-credits the same amount. A failed compensation is the highest
/// severity path in the system: durable audit entry plus operator page,
/// never a silent loss.
pub async fn debit_then_finalize(
    db: &Database,
    bot: &TelegramClient,
    user_id: i64,
    amount_eur: Decimal,
    snapshot: &[SnapshotItem],
    discount_code: Option<&str>,
) -> Result<FinalizeOutcome> {
    debit(db, user_id, amount_eur, "Basket purchase with balance").await?;

    match reservations::finalize(db, user_id, snapshot, discount_code, None).await {
        Ok(outcome) => Ok(outcome),
        Err(finalize_err) => {
            tracing::error!(
                "Finalization failed after balance debit for user {}: {}; refunding",
                user_id,
                finalize_err
            );
            match credit(
                db,
                bot,
                user_id,
                amount_eur,
                "Refund: purchase finalization failed",
            )
            .await
            {
                Ok(_) => Err(finalize_err),
                Err(credit_err) => {
                    let detail = format!(
                        "user {} debited {} EUR, finalize failed ({}), re-credit failed ({})",
                        user_id, amount_eur, finalize_err, credit_err
                    );
                    if let Err(e) = db
                        .log_audit(
                            0,
                            "COMPENSATION_FAILED",
                            Some(user_id),
                            Some(&detail),
                            Some(amount_eur),
                            None,
                            None,
                        )
                        .await
                    {
                        tracing::error!("Could not write compensation audit entry: {}", e);
                    }
                    let _ = bot
                        .notify_admin(&format!(
                            "CRITICAL: refund after failed purchase did not go through. {}",
                            detail
                        ))
                        .await;
                    Err(AppError::CompensationFailed(detail))
                }
            }
        }
    }
}

fn credit_notice(reason: &str, amount: Decimal, new_balance: Decimal) -> String {
    if reason.contains("Overpayment") {
        format!(
            "Your purchase was successful! Additionally, an overpayment of {} EUR has been \
             credited to your balance. Your new balance is {} EUR.",
            format_eur(amount),
            format_eur(new_balance)
        )
    } else if reason.contains("Underpayment") {
        format!(
            "Your purchase failed due to underpayment, but the received amount ({} EUR) has \
             been credited to your balance. Your new balance is {} EUR.",
            format_eur(amount),
            format_eur(new_balance)
        )
    } else {
        format!(
            "Your balance has been credited by {} EUR. Reason: {}. New balance: {} EUR.",
            format_eur(amount),
            reason,
            format_eur(new_balance)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn credit_notice_picks_template_by_reason() {
        let amount = Decimal::from_str("2.50").unwrap();
        let balance = Decimal::from_str("12.50").unwrap();

        let over = credit_notice("Overpayment for purchase X", amount, balance);
        assert!(over.contains("overpayment of 2.50 EUR"));

        let under = credit_notice("Underpayment refund for X", amount, balance);
        assert!(under.contains("underpayment"));

        let refill = credit_notice("Refill payment ABC", amount, balance);
        assert!(refill.contains("Reason: Refill payment ABC"));
        assert!(refill.contains("12.50 EUR"));
    }
}
