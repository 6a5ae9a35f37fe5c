use crate::domain::order::{NewOrder, Order, OrderId};
use crate::domain::ports::{OrderRepositoryRef, ProductRepositoryRef, StoreSet, TransactionalRef};
use crate::error::{Result, SettlementError};

/// Order placement against finite product stock.
pub struct OrderService {
    products: ProductRepositoryRef,
    orders: OrderRepositoryRef,
    units: TransactionalRef,
}

impl OrderService {
    pub fn new(stores: &StoreSet) -> Self {
        Self {
            products: stores.products.clone(),
            orders: stores.orders.clone(),
            units: stores.units.clone(),
        }
    }

    /// Takes `quantity` units out of stock and records the order, both in
    /// one unit of work. When stock is short nothing is written and the
    /// call fails with `OutOfStock`.
    pub async fn place_order(&self, request: NewOrder) -> Result<Order> {
        request.validate()?;
        let product = self
            .products
            .get_product(&request.product_id)
            .await?
            .ok_or_else(|| SettlementError::ProductNotFound(request.product_id.clone()))?;

        let mut unit = self.units.begin().await?;
        if !unit
            .decrement_stock_if_available(&product.id, request.quantity)
            .await?
        {
            tracing::debug!(product_id = %product.id, quantity = request.quantity, "out of stock");
            return Err(SettlementError::OutOfStock {
                product_id: product.id,
            });
        }
        let order = Order::for_product(&request, &product);
        unit.insert_order(&order).await?;
        unit.commit().await?;

        tracing::info!(order_id = %order.id, product_id = %order.product_id, quantity = order.quantity, "order placed");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order_id))
    }
}
