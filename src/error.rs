use crate::domain::job::JobId;
use crate::domain::order::{OrderId, ProductId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Job not found: {0}")]
    JobNotFound(JobId),
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),
    #[error("Out of stock: {product_id}")]
    OutOfStock { product_id: ProductId },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "storage-postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl SettlementError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into().into())
    }

    /// True for the variants a boundary layer renders as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::JobNotFound(_) | Self::ProductNotFound(_) | Self::OrderNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
