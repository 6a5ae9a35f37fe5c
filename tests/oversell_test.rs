use rust_decimal_macros::dec;
use settlement_engine::application::orders::OrderService;
use settlement_engine::domain::money::Money;
use settlement_engine::domain::order::{NewOrder, Product, ProductId};
use settlement_engine::domain::ports::StoreSet;
use settlement_engine::error::SettlementError;
use settlement_engine::infrastructure::in_memory::InMemoryStore;
use std::sync::Arc;

async fn stocked(stock: u32) -> (StoreSet, Arc<OrderService>) {
    let stores = StoreSet::from_backend(InMemoryStore::new());
    stores
        .products
        .insert_product(&Product::new("hot", "Limited drop", Money::new(dec!(49.90)), stock))
        .await
        .unwrap();
    let service = Arc::new(OrderService::new(&stores));
    (stores, service)
}

fn order(buyer: usize, quantity: u32) -> NewOrder {
    NewOrder {
        product_id: ProductId::new("hot"),
        buyer_id: format!("buyer-{buyer}"),
        quantity,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_orders_never_oversell() {
    let (stores, service) = stocked(100).await;

    let handles: Vec<_> = (0..500)
        .map(|buyer| {
            let service = service.clone();
            tokio::spawn(async move { service.place_order(order(buyer, 1)).await })
        })
        .collect();

    let mut placed = 0;
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(SettlementError::OutOfStock { .. }) => out_of_stock += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(placed, 100);
    assert_eq!(out_of_stock, 400);

    let product = stores.products.get_product(&ProductId::new("hot")).await.unwrap().unwrap();
    assert_eq!(product.stock, 0);
    let orders = stores.orders.orders_for_product(&ProductId::new("hot")).await.unwrap();
    assert_eq!(orders.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_mixed_quantities_account_for_every_unit() {
    let (stores, service) = stocked(250).await;

    let handles: Vec<_> = (0..300)
        .map(|buyer| {
            let service = service.clone();
            let quantity = (buyer % 4 + 1) as u32;
            tokio::spawn(async move { service.place_order(order(buyer, quantity)).await })
        })
        .collect();

    let mut sold = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => sold += order.quantity,
            Err(SettlementError::OutOfStock { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let product = stores.products.get_product(&ProductId::new("hot")).await.unwrap().unwrap();
    assert!(sold <= 250);
    assert_eq!(product.stock, 250 - sold);

    let recorded: u32 = stores
        .orders
        .orders_for_product(&ProductId::new("hot"))
        .await
        .unwrap()
        .iter()
        .map(|o| o.quantity)
        .sum();
    assert_eq!(recorded, sold);
}

#[tokio::test]
async fn test_failed_placement_leaves_no_trace() {
    let (stores, service) = stocked(1).await;
    service.place_order(order(1, 1)).await.unwrap();

    let err = service.place_order(order(2, 1)).await.unwrap_err();
    assert!(matches!(err, SettlementError::OutOfStock { ref product_id } if product_id.as_str() == "hot"));

    let orders = stores.orders.orders_for_product(&ProductId::new("hot")).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].buyer_id, "buyer-1");
    assert_eq!(orders[0].total_price, Money::new(dec!(49.90)));
}
