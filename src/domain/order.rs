use super::money::Money;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A sellable product and its remaining stock. Stock never goes negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: ProductId::new(id),
            name: name.into(),
            price,
            stock,
        }
    }
}

/// Order placement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub product_id: ProductId,
    pub buyer_id: String,
    pub quantity: u32,
}

impl NewOrder {
    pub fn validate(&self) -> Result<()> {
        if self.product_id.as_str().trim().is_empty() {
            return Err(SettlementError::Validation(
                "product_id is required".to_string(),
            ));
        }
        if self.buyer_id.trim().is_empty() {
            return Err(SettlementError::Validation("buyer_id is required".to_string()));
        }
        if self.quantity < 1 {
            return Err(SettlementError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub product_id: ProductId,
    pub buyer_id: String,
    pub quantity: u32,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn for_product(request: &NewOrder, product: &Product) -> Self {
        Self {
            id: OrderId::new(),
            product_id: product.id.clone(),
            buyer_id: request.buyer_id.clone(),
            quantity: request.quantity,
            total_price: product.price * request.quantity,
            created_at: Utc::now(),
        }
    }
}
