//! Quantity conservation and production stage machine: delivered plus
//! returned units can never exceed ordered units, and stages only move
//! forward one step at a time.

mod common;

use common::TestContext;
use fabworks_api::{
    entities::{
        order_item::{MaterialType, ProductionStage},
        return_entity::ReturnReason,
    },
    errors::ServiceError,
    services::{
        challans::{ChallanLineRequest, CreateChallanRequest},
        orders::UpdateOrderItemRequest,
        returns::{RecordReturnRequest, ReturnSettlement},
    },
};
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn deliver(
    ctx: &TestContext,
    customer_id: Uuid,
    order_item_id: Uuid,
    quantity: i32,
) -> Result<Uuid, ServiceError> {
    let challan = ctx
        .services
        .challans
        .create_challan(CreateChallanRequest {
            customer_id,
            lines: vec![ChallanLineRequest {
                order_item_id,
                quantity,
            }],
            notes: None,
        })
        .await?;
    Ok(challan.challan.id)
}

#[tokio::test]
async fn cannot_deliver_more_than_ordered() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, 5, dec!(300.00))])
        .await;
    let item = &order.items[0];
    ctx.finish_production(item.id).await;

    // Full delivery succeeds.
    deliver(&ctx, customer.id, item.id, 5).await.unwrap();

    // One more unit is a conservation violation: remaining is zero.
    let err = deliver(&ctx, customer.id, item.id, 1).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConservationViolation(_)));
}

#[tokio::test]
async fn two_partial_challans_cannot_jointly_over_deliver() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::DressMaterial, 4, dec!(250.00))])
        .await;
    let item = &order.items[0];
    ctx.finish_production(item.id).await;

    deliver(&ctx, customer.id, item.id, 3).await.unwrap();

    let err = deliver(&ctx, customer.id, item.id, 2).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConservationViolation(_)));

    // The remaining single unit still goes through.
    deliver(&ctx, customer.id, item.id, 1).await.unwrap();
}

#[tokio::test]
async fn challan_requires_completed_production() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, 2, dec!(300.00))])
        .await;
    let item = &order.items[0];

    // Still in pre_treatment.
    let err = deliver(&ctx, customer.id, item.id, 1).await.unwrap_err();
    assert!(matches!(err, ServiceError::StageNotReady(_)));

    // Printing is not enough either.
    ctx.services
        .production
        .advance_stage(item.id, ProductionStage::Printing)
        .await
        .unwrap();
    let err = deliver(&ctx, customer.id, item.id, 1).await.unwrap_err();
    assert!(matches!(err, ServiceError::StageNotReady(_)));
}

#[tokio::test]
async fn stages_cannot_be_skipped_or_reversed() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::BlousePiece, 1, dec!(120.00))])
        .await;
    let item = &order.items[0];

    // pre_treatment -> post_process skips printing.
    let err = ctx
        .services
        .production
        .advance_stage(item.id, ProductionStage::PostProcess)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition(_)));

    // Walk forward legally, stamping completion at the end.
    ctx.services
        .production
        .advance_stage(item.id, ProductionStage::Printing)
        .await
        .unwrap();
    let finished = ctx
        .services
        .production
        .advance_stage(item.id, ProductionStage::PostProcess)
        .await
        .unwrap();
    assert!(finished.stage_completed_at.is_some());

    // No going back, and the terminal stage has no successor.
    let err = ctx
        .services
        .production
        .advance_stage(item.id, ProductionStage::Printing)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition(_)));

    let err = ctx
        .services
        .production
        .advance_stage(item.id, ProductionStage::PostProcess)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition(_)));
}

#[tokio::test]
async fn intermediate_stage_leaves_completion_unstamped() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, 1, dec!(200.00))])
        .await;
    let item = &order.items[0];

    let printing = ctx
        .services
        .production
        .advance_stage(item.id, ProductionStage::Printing)
        .await
        .unwrap();
    assert!(printing.stage_completed_at.is_none());
}

#[tokio::test]
async fn returns_cannot_exceed_delivered_quantity() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, 5, dec!(300.00))])
        .await;
    let item = &order.items[0];
    ctx.finish_production(item.id).await;

    deliver(&ctx, customer.id, item.id, 3).await.unwrap();

    // Four back against three shipped.
    let err = ctx
        .services
        .returns
        .record_return(RecordReturnRequest {
            order_item_id: item.id,
            quantity: 4,
            reason: ReturnReason::PrintDefect,
            settlement: ReturnSettlement::Refund {
                amount: dec!(1200.00),
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ConservationViolation(_)));

    // Two of three is fine; then two more exceeds the remainder.
    ctx.services
        .returns
        .record_return(RecordReturnRequest {
            order_item_id: item.id,
            quantity: 2,
            reason: ReturnReason::PrintDefect,
            settlement: ReturnSettlement::Refund {
                amount: dec!(600.00),
            },
        })
        .await
        .unwrap();

    let err = ctx
        .services
        .returns
        .record_return(RecordReturnRequest {
            order_item_id: item.id,
            quantity: 2,
            reason: ReturnReason::Other,
            settlement: ReturnSettlement::Refund {
                amount: dec!(600.00),
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ConservationViolation(_)));
}

#[tokio::test]
async fn returned_units_count_against_the_ordered_quantity() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::FabricRoll, 5, dec!(100.00))])
        .await;
    let item = &order.items[0];
    ctx.finish_production(item.id).await;

    deliver(&ctx, customer.id, item.id, 3).await.unwrap();

    ctx.services
        .returns
        .record_return(RecordReturnRequest {
            order_item_id: item.id,
            quantity: 2,
            reason: ReturnReason::ColorMismatch,
            settlement: ReturnSettlement::Refund {
                amount: dec!(200.00),
            },
        })
        .await
        .unwrap();

    // Returned units consume headroom rather than releasing it:
    // delivered (3) + returned (2) already equals the ordered quantity,
    // so nothing is left to deliver.
    let err = deliver(&ctx, customer.id, item.id, 1).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConservationViolation(_)));
}

#[tokio::test]
async fn fully_delivered_item_has_no_return_headroom() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::FabricRoll, 4, dec!(100.00))])
        .await;
    let item = &order.items[0];
    ctx.finish_production(item.id).await;

    deliver(&ctx, customer.id, item.id, 4).await.unwrap();

    // delivered + returned is capped by the ordered quantity, so a
    // return against a fully-delivered item is rejected outright.
    let err = ctx
        .services
        .returns
        .record_return(RecordReturnRequest {
            order_item_id: item.id,
            quantity: 1,
            reason: ReturnReason::Damaged,
            settlement: ReturnSettlement::Refund {
                amount: dec!(100.00),
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ConservationViolation(_)));
}

#[tokio::test]
async fn soft_deleted_challan_item_releases_its_quantity() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, 5, dec!(300.00))])
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
                quantity: 3,
            }],
            notes: None,
        })
        .await
        .unwrap();

    // Remaining is 2; 5 would over-deliver.
    let err = deliver(&ctx, customer.id, item.id, 5).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConservationViolation(_)));

    // Unwinding the mis-entered line restores the full balance.
    ctx.services
        .challans
        .delete_challan_item(challan.items[0].id)
        .await
        .unwrap();

    deliver(&ctx, customer.id, item.id, 5).await.unwrap();
}

#[tokio::test]
async fn quantity_correction_cannot_undercut_consumed_units() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Dupatta, 5, dec!(150.00))])
        .await;
    let item = &order.items[0];
    ctx.finish_production(item.id).await;

    deliver(&ctx, customer.id, item.id, 3).await.unwrap();

    let err = ctx
        .services
        .orders
        .update_order_item(
            item.id,
            UpdateOrderItemRequest {
                quantity: Some(2),
                unit_price: None,
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ConservationViolation(_)));

    // Correcting down to exactly the delivered quantity is allowed.
    let updated = ctx
        .services
        .orders
        .update_order_item(
            item.id,
            UpdateOrderItemRequest {
                quantity: Some(3),
                unit_price: None,
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.quantity, 3);
}

#[tokio::test]
async fn delivered_item_cannot_be_removed_from_the_order() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, 2, dec!(300.00))])
        .await;
    let item = &order.items[0];
    ctx.finish_production(item.id).await;

    deliver(&ctx, customer.id, item.id, 1).await.unwrap();

    let err = ctx
        .services
        .orders
        .remove_order_item(item.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}
