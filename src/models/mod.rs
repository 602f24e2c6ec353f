use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ==================== USER ====================
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    pub language: String,
    pub balance: Decimal,
    pub is_reseller: bool,
    pub is_banned: bool,
    pub total_purchases: i32,
    pub created_at: DateTime<Utc>,
}

// ==================== CATALOG ====================
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub city: String,
    pub district: String,
    pub product_type: String,
    pub size: String,
    pub name: String,
    pub price: Decimal,
    pub available: i32,
    pub reserved: i32,
    pub pickup_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductMedia {
    pub id: i64,
    pub product_id: i64,
    pub media_type: String, // photo / video / gif
    pub telegram_file_id: Option<String>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BasketReservation {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub product_type: String,
    pub snapshot_price: Decimal,
    pub reserved_at: DateTime<Utc>,
}

// ==================== DISCOUNTS ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountKind {
    Percentage,
    FixedEur,
}

impl DiscountKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "percentage" => Some(DiscountKind::Percentage),
            "fixed_eur" => Some(DiscountKind::FixedEur),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiscountCode {
    pub code: String,
    pub kind: String,
    pub value: Decimal,
    pub max_uses: Option<i32>,
    pub uses_count: i32,
    pub active: bool,
}

impl DiscountCode {
    pub fn kind(&self) -> Option<DiscountKind> {
        DiscountKind::parse(&self.kind)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.uses_count >= max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResellerDiscount {
    pub reseller_user_id: i64,
    pub product_type: String,
    pub percent: Decimal,
}

// ==================== PAYMENTS ====================

/// One basket line captured at invoice time. `price` already includes the
/// reseller discount and is authoritative for both the payment amount and
/// the purchase row written at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub product_id: i64,
    pub name: String,
    pub product_type: String,
    pub size: String,
    pub price: Decimal,
    pub city: String,
    pub district: String,
    pub pickup_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingDeposit {
    pub payment_id: String,
    pub user_id: i64,
    pub currency: String,
    pub target_eur: Decimal,
    pub expected_sol: Decimal,
    pub is_purchase: bool,
    pub basket_snapshot: Option<serde_json::Value>,
    pub discount_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingDeposit {
    pub fn snapshot_items(&self) -> Vec<SnapshotItem> {
        self.basket_snapshot
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Pending,
    Paid,
    Swept,
    Refunded,
    Expired,
    Corrupt,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Pending => "pending",
            WalletStatus::Paid => "paid",
            WalletStatus::Swept => "swept",
            WalletStatus::Refunded => "refunded",
            WalletStatus::Expired => "expired",
            WalletStatus::Corrupt => "corrupt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "pending" => Some(WalletStatus::Pending),
            "paid" => Some(WalletStatus::Paid),
            "swept" => Some(WalletStatus::Swept),
            "refunded" => Some(WalletStatus::Refunded),
            "expired" => Some(WalletStatus::Expired),
            "corrupt" => Some(WalletStatus::Corrupt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EphemeralWallet {
    pub id: i64,
    pub user_id: i64,
    pub order_id: String,
    pub public_key: String,
    pub private_key: String,
    pub expected_sol: Decimal,
    pub status: String,
    pub amount_received: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EphemeralWallet {
    pub fn status(&self) -> WalletStatus {
        WalletStatus::parse(&self.status).unwrap_or(WalletStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_status_round_trips() {
        for s in [
            WalletStatus::Pending,
            WalletStatus::Paid,
            WalletStatus::Swept,
            WalletStatus::Refunded,
            WalletStatus::Expired,
            WalletStatus::Corrupt,
        ] {
            assert_eq!(WalletStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(WalletStatus::parse("unknown"), None);
    }

    #[test]
    fn discount_exhaustion_boundary() {
        let mut code = DiscountCode {
            code: "SAVE10".to_string(),
            kind: "percentage".to_string(),
            value: Decimal::new(10, 0),
            max_uses: Some(1),
            uses_count: 0,
            active: true,
        };
        assert!(!code.is_exhausted());
        code.uses_count = 1;
        assert!(code.is_exhausted());
        code.max_uses = None;
        assert!(!code.is_exhausted());
    }
}
