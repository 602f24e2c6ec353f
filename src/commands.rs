use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio::sync::mpsc;

use crate::{
    db::Database,
    error::AppError,
    integrations::TelegramClient,
    services::{orders::InvoiceDetails, Services},
    utils::format_eur,
};

// ==================== INBOUND UPDATE SHAPE ====================

/// The slice of a messenger update this service acts on. Everything else
/// (catalog browsing, admin panels) belongs to the routing layer and is
/// acknowledged but not handled here.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<InboundMessage>,
    #[serde(default)]
    pub callback_query: Option<InboundCallback>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub from: Option<InboundUser>,
    pub chat: InboundChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundUser {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundCallback {
    pub id: String,
    pub from: InboundUser,
    #[serde(default)]
    pub data: Option<String>,
}

// ==================== COMMAND DISPATCH ====================

/// The payment-facing callback commands, as a closed set. Anything not in
/// the table gets an explicit "unknown action" acknowledgment.
///
/// `pay_basket` carries the EUR total the basket view quoted to the user
/// (`pay_basket:{quoted_eur}` or `pay_basket:{quoted_eur}:{code}`), so
/// invoice creation can verify the coupon still produces that total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackCommand {
    AddToBasket { product_id: String },
    PayBasket {
        quoted_eur: Option<String>,
        discount_code: Option<String>,
    },
    PayWithBalance { discount_code: Option<String> },
    Refill { eur: String },
    CancelPayment { payment_id: String },
    Unknown(String),
}

pub fn parse_callback(data: &str) -> CallbackCommand {
    let mut parts = data.splitn(2, ':');
    let head = parts.next().unwrap_or_default();
    let arg = parts.next();

    match head {
        "add_to_basket" => CallbackCommand::AddToBasket {
            product_id: arg.unwrap_or_default().to_string(),
        },
        "pay_basket" => {
            let mut args = arg.unwrap_or_default().splitn(2, ':');
            let quoted = args.next().unwrap_or_default();
            let code = args.next().unwrap_or_default();
            CallbackCommand::PayBasket {
                quoted_eur: (!quoted.is_empty()).then(|| quoted.to_string()),
                discount_code: (!code.is_empty()).then(|| code.to_string()),
            }
        }
        "pay_balance" => CallbackCommand::PayWithBalance {
            discount_code: arg.map(str::to_string).filter(|s| !s.is_empty()),
        },
        "refill" => CallbackCommand::Refill {
            eur: arg.unwrap_or_default().to_string(),
        },
        "cancel_payment" => CallbackCommand::CancelPayment {
            payment_id: arg.unwrap_or_default().to_string(),
        },
        other => CallbackCommand::Unknown(other.to_string()),
    }
}

/// Consumes inbound updates off the channel, serialized onto one task so
/// handlers never re-enter each other.
pub async fn run_dispatcher(
    mut rx: mpsc::Receiver<InboundUpdate>,
    services: Services,
    db: Database,
    bot: TelegramClient,
) {
    tracing::info!("Inbound update dispatcher started");
    while let Some(update) = rx.recv().await {
        let update_id = update.update_id;
        if let Err(e) = handle_update(&services, &db, &bot, update).await {
            tracing::error!("Error handling update {}: {}", update_id, e);
        }
    }
    tracing::warn!("Inbound update channel closed; dispatcher stopping");
}

async fn handle_update(
    services: &Services,
    db: &Database,
    bot: &TelegramClient,
    update: InboundUpdate,
) -> crate::error::Result<()> {
    if let Some(callback) = update.callback_query {
        let user_id = callback.from.id;
        db.ensure_user(user_id).await?;
        if let Some(user) = db.get_user(user_id).await? {
            if user.is_banned {
                tracing::debug!("Ignoring callback from banned user {}", user_id);
                return Ok(());
            }
        }

        let data = callback.data.as_deref().unwrap_or_default();
        tracing::debug!("Callback from user {}: {}", user_id, data);

        match parse_callback(data) {
            CallbackCommand::AddToBasket { product_id } => match product_id.parse::<i64>() {
                Ok(product_id) => {
                    match crate::services::reservations::reserve(db, user_id, product_id).await {
                        Ok(reservation) => {
                            bot.send_message(
                                user_id,
                                &format!(
                                    "Added {} for {} EUR to your basket. It is reserved for a \
                                     limited time.",
                                    reservation.product_type,
                                    format_eur(reservation.snapshot_price)
                                ),
                            )
                            .await?;
                        }
                        Err(AppError::OutOfStock) => {
                            bot.answer_callback(&callback.id, "Sorry, this item just sold out.")
                                .await?;
                        }
                        Err(e) => {
                            bot.send_message(user_id, &user_facing_error(&e)).await?;
                        }
                    }
                }
                Err(_) => {
                    bot.answer_callback(&callback.id, "Unknown product.").await?;
                }
            },
            CallbackCommand::PayBasket {
                quoted_eur,
                discount_code,
            } => {
                let quoted_total = match quoted_eur.as_deref() {
                    Some(raw) => match Decimal::from_str(raw.trim()) {
                        Ok(total) => Some(total),
                        Err(_) => {
                            bot.answer_callback(
                                &callback.id,
                                "Stale basket data. Please reopen your basket.",
                            )
                            .await?;
                            return Ok(());
                        }
                    },
                    None => None,
                };
                match services
                    .orders
                    .create_purchase_invoice(user_id, discount_code.as_deref(), quoted_total)
                    .await
                {
                    Ok(details) => {
                        bot.send_message(user_id, &invoice_message(&details, true)).await?;
                    }
                    Err(e) => {
                        bot.send_message(user_id, &user_facing_error(&e)).await?;
                    }
                }
            }
            CallbackCommand::PayWithBalance { discount_code } => {
                match services
                    .orders
                    .pay_with_balance(user_id, discount_code.as_deref())
                    .await
                {
                    Ok(total) => {
                        tracing::info!(
                            "User {} paid {} EUR from balance",
                            user_id,
                            format_eur(total)
                        );
                    }
                    Err(e) => {
                        bot.send_message(user_id, &user_facing_error(&e)).await?;
                    }
                }
            }
            CallbackCommand::Refill { eur } => match Decimal::from_str(eur.trim()) {
                Ok(amount) => {
                    match services.orders.create_refill_invoice(user_id, amount).await {
                        Ok(details) => {
                            bot.send_message(user_id, &invoice_message(&details, false))
                                .await?;
                        }
                        Err(e) => {
                            bot.send_message(user_id, &user_facing_error(&e)).await?;
                        }
                    }
                }
                Err(_) => {
                    bot.send_message(user_id, "Invalid top-up amount.").await?;
                }
            },
            CallbackCommand::CancelPayment { payment_id } => {
                match services.orders.cancel_payment(user_id, &payment_id).await {
                    Ok(true) => {
                        bot.send_message(
                            user_id,
                            "Payment cancelled successfully. Reserved items have been released.",
                        )
                        .await?;
                    }
                    Ok(false) => {
                        bot.answer_callback(
                            &callback.id,
                            "No pending payment found. It may have expired.",
                        )
                        .await?;
                    }
                    Err(e) => {
                        bot.send_message(user_id, &user_facing_error(&e)).await?;
                    }
                }
            }
            CallbackCommand::Unknown(action) => {
                tracing::debug!("Unknown callback action '{}' from user {}", action, user_id);
                bot.answer_callback(&callback.id, "Unknown action.").await?;
            }
        }
        return Ok(());
    }

    if let Some(message) = update.message {
        let user_id = message.from.map(|u| u.id).unwrap_or(message.chat.id);
        db.ensure_user(user_id).await?;
        // Conversational routing lives outside this service.
        tracing::debug!(
            "Message from user {} passed to routing layer: {:?}",
            user_id,
            message.text.as_deref().map(|t| t.chars().take(32).collect::<String>())
        );
    }

    Ok(())
}

fn invoice_message(details: &InvoiceDetails, is_purchase: bool) -> String {
    let mut text = format!(
        "{}\n\n(Amount: {} EUR)\n\nPlease send the following amount:\nAmount: {} SOL\n\n\
         Payment Address:\n{}\n\nPayment ID: {}\n\nPayment must be completed within {} \
         minutes of invoice creation.\n\n",
        if is_purchase {
            "Payment Invoice Created"
        } else {
            "Top-Up Invoice Created"
        },
        format_eur(details.target_eur),
        details.expected_sol,
        details.address,
        details.payment_id,
        details.expires_minutes,
    );
    if is_purchase {
        text.push_str("Important: send exactly this amount of SOL to this address.\n");
    } else {
        text.push_str(
            "Sending more than this amount is okay! Your balance will be credited based on \
             the amount received after network confirmation.\n",
        );
    }
    text.push_str("\nConfirmation is automatic after network confirmation.");
    text
}

fn user_facing_error(err: &AppError) -> String {
    match err {
        AppError::OutOfStock | AppError::StockVanished => {
            "Sorry, an item in your basket just sold out. Please review your basket.".to_string()
        }
        AppError::DiscountInvalid(reason) => format!(
            "Your discount code is no longer valid: {}. Please return to your basket to \
             continue without the discount.",
            reason
        ),
        AppError::DiscountExhausted => {
            "Your discount code has no uses left. Please return to your basket.".to_string()
        }
        AppError::DiscountMismatch => {
            "Payment amount mismatch detected. Please return to your basket and try again."
                .to_string()
        }
        AppError::QuoteUnavailable => {
            "Could not fetch the current SOL price. Please try again shortly.".to_string()
        }
        AppError::InsufficientBalance => {
            "Transaction failed: your balance is too low.".to_string()
        }
        AppError::BadRequest(msg) => msg.clone(),
        _ => "Failed to create payment invoice. Please try again later or contact support."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_callbacks() {
        assert_eq!(
            parse_callback("add_to_basket:17"),
            CallbackCommand::AddToBasket {
                product_id: "17".to_string()
            }
        );
        assert_eq!(
            parse_callback("pay_basket"),
            CallbackCommand::PayBasket {
                quoted_eur: None,
                discount_code: None
            }
        );
        assert_eq!(
            parse_callback("pay_basket:45.00"),
            CallbackCommand::PayBasket {
                quoted_eur: Some("45.00".to_string()),
                discount_code: None
            }
        );
        assert_eq!(
            parse_callback("pay_basket:45.00:SAVE10"),
            CallbackCommand::PayBasket {
                quoted_eur: Some("45.00".to_string()),
                discount_code: Some("SAVE10".to_string())
            }
        );
        assert_eq!(
            parse_callback("refill:25.00"),
            CallbackCommand::Refill {
                eur: "25.00".to_string()
            }
        );
        assert_eq!(
            parse_callback("cancel_payment:USER1_PURCHASE_1_abc"),
            CallbackCommand::CancelPayment {
                payment_id: "USER1_PURCHASE_1_abc".to_string()
            }
        );
    }

    #[test]
    fn unknown_callback_is_tagged() {
        assert_eq!(
            parse_callback("adm_broadcast"),
            CallbackCommand::Unknown("adm_broadcast".to_string())
        );
    }

    #[test]
    fn inbound_update_deserializes_callback() {
        let raw = r#"{
            "update_id": 10,
            "callback_query": {"id": "cb1", "from": {"id": 99}, "data": "pay_basket"}
        }"#;
        let update: InboundUpdate = serde_json::from_str(raw).unwrap();
        let callback = update.callback_query.unwrap();
        assert_eq!(callback.from.id, 99);
        assert_eq!(callback.data.as_deref(), Some("pay_basket"));
    }
}
