//! Document numbering: per-kind yearly sequences that are unique,
//! sequential, and never reused.

mod common;

use chrono::{Datelike, Utc};
use common::TestContext;
use fabworks_api::{
    entities::order_item::MaterialType,
    services::challans::{ChallanLineRequest, CreateChallanRequest},
};
use rust_decimal_macros::dec;

#[tokio::test]
async fn order_numbers_are_sequential_within_the_year() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;
    let year = Utc::now().year();

    for expected in 1..=3 {
        let order = ctx
            .seed_order(customer.id, &[(MaterialType::Saree, 1, dec!(100.00))])
            .await;
        assert_eq!(
            order.order.order_number,
            format!("ORD-{}-{:04}", year, expected)
        );
    }
}

#[tokio::test]
async fn each_kind_has_its_own_sequence() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;
    let year = Utc::now().year();

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, 2, dec!(100.00))])
        .await;
    let item = &order.items[0];
    ctx.finish_production(item.id).await;

    let challan = ctx
        .services
        .challans
        .create_challan(CreateChallanRequest {
            customer_id: customer.id,
            lines: vec![ChallanLineRequest {
                order_item_id: item.id,
                quantity: 1,
            }],
            notes: None,
        })
        .await
        .unwrap();

    // The challan counter starts at 1 regardless of how many orders
    // have been numbered.
    assert_eq!(order.order.order_number, format!("ORD-{}-0001", year));
    assert_eq!(challan.challan.challan_number, format!("CH-{}-0001", year));
}

#[tokio::test]
async fn soft_deleted_documents_do_not_release_their_numbers() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;
    let year = Utc::now().year();

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, 4, dec!(100.00))])
        .await;
    let item = &order.items[0];
    ctx.finish_production(item.id).await;

    let first = ctx
        .services
        .challans
        .create_challan(CreateChallanRequest {
            customer_id: customer.id,
            lines: vec![ChallanLineRequest {
                order_item_id: item.id,
                quantity: 1,
            }],
            notes: None,
        })
        .await
        .unwrap();
    assert_eq!(first.challan.challan_number, format!("CH-{}-0001", year));

    ctx.services
        .challans
        .delete_challan(first.challan.id)
        .await
        .unwrap();

    // The freed quantity may be re-delivered, but CH-...-0001 is gone
    // for good.
    let second = ctx
        .services
        .challans
        .create_challan(CreateChallanRequest {
            customer_id: customer.id,
            lines: vec![ChallanLineRequest {
                order_item_id: item.id,
                quantity: 1,
            }],
            notes: None,
        })
        .await
        .unwrap();
    assert_eq!(second.challan.challan_number, format!("CH-{}-0002", year));
}

#[tokio::test]
async fn concurrent_order_creation_yields_distinct_numbers() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;
    let year = Utc::now().year();

    let orders = ctx.services.orders.clone();
    let mut handles = Vec::new();
    for _ in 0..5 {
        let orders = orders.clone();
        let customer_id = customer.id;
        handles.push(tokio::spawn(async move {
            orders
                .create_order(fabworks_api::services::orders::CreateOrderRequest {
                    customer_id,
                    items: vec![fabworks_api::services::orders::CreateOrderItemRequest {
                        material_type: MaterialType::Dupatta,
                        description: None,
                        quantity: 1,
                        unit_price: dec!(50.00),
                    }],
                    notes: None,
                })
                .await
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        let order = handle.await.expect("task").expect("create order");
        numbers.push(order.order.order_number);
    }

    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 5, "all order numbers must be distinct");

    let expected: Vec<String> = (1..=5).map(|n| format!("ORD-{}-{:04}", year, n)).collect();
    assert_eq!(numbers, expected);
}
