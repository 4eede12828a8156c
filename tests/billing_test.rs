//! Billing aggregates: derived order totals, invoice amounts, payments,
//! adjustments, and the no-double-billing / no-overpayment rules.

mod common;

use common::TestContext;
use fabworks_api::{
    entities::{order_item::MaterialType, payment::PaymentMethod, return_entity::ReturnReason},
    errors::ServiceError,
    services::{
        billing,
        challans::{ChallanLineRequest, CreateChallanRequest},
        invoicing::{CreateInvoiceRequest, InvoiceWithLinks, TaxRates},
        orders::UpdateOrderItemRequest,
        payments::RecordPaymentRequest,
        returns::{RecordReturnRequest, ReturnSettlement},
    },
};
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Seeds customer + single-item order, finishes production, delivers the
/// full quantity on one challan, and returns (customer_id, item_id,
/// challan_id).
async fn seed_delivered_challan(
    ctx: &TestContext,
    quantity: i32,
    unit_price: rust_decimal::Decimal,
) -> (Uuid, Uuid, Uuid) {
    let customer = ctx.seed_customer().await;
    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, quantity, unit_price)])
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
                quantity,
            }],
            notes: None,
        })
        .await
        .unwrap();
    ctx.services
        .challans
        .mark_delivered(challan.challan.id)
        .await
        .unwrap();

    (customer.id, item.id, challan.challan.id)
}

async fn invoice_challan(
    ctx: &TestContext,
    customer_id: Uuid,
    challan_id: Uuid,
    rates: TaxRates,
) -> Result<InvoiceWithLinks, ServiceError> {
    ctx.services
        .invoicing
        .create_invoice(CreateInvoiceRequest {
            customer_id,
            challan_ids: vec![challan_id],
            tax_rates: rates,
        })
        .await
}

const GST_9_9: TaxRates = TaxRates {
    cgst_rate: dec!(9),
    sgst_rate: dec!(9),
    igst_rate: dec!(0),
};

#[tokio::test]
async fn order_total_tracks_item_updates_and_removal() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;

    let order = ctx
        .seed_order(
            customer.id,
            &[
                (MaterialType::Saree, 3, dec!(500.00)),
                (MaterialType::Dupatta, 2, dec!(200.00)),
            ],
        )
        .await;
    assert_eq!(order.order.total_amount, dec!(1900.00));

    // Price correction on the first item: 3 × 450 + 2 × 200 = 1750.
    ctx.services
        .orders
        .update_order_item(
            order.items[0].id,
            UpdateOrderItemRequest {
                quantity: None,
                unit_price: Some(dec!(450.00)),
                description: None,
            },
        )
        .await
        .unwrap();

    let after_update = ctx
        .services
        .orders
        .get_order(order.order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_update.order.total_amount, dec!(1750.00));

    // Soft-deleting the second item drops its contribution.
    ctx.services
        .orders
        .remove_order_item(order.items[1].id)
        .await
        .unwrap();

    let after_removal = ctx
        .services
        .orders
        .get_order(order.order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_removal.order.total_amount, dec!(1350.00));
    assert_eq!(after_removal.items.len(), 1);
}

#[tokio::test]
async fn igst_invoice_computes_single_tax() {
    let ctx = TestContext::new().await;
    let (customer_id, _item, challan_id) = seed_delivered_challan(&ctx, 2, dec!(500.00)).await;

    let invoice = invoice_challan(
        &ctx,
        customer_id,
        challan_id,
        TaxRates {
            cgst_rate: dec!(0),
            sgst_rate: dec!(0),
            igst_rate: dec!(18),
        },
    )
    .await
    .unwrap();

    assert_eq!(invoice.invoice.subtotal, dec!(1000.00));
    assert_eq!(invoice.invoice.cgst_amount, dec!(0));
    assert_eq!(invoice.invoice.sgst_amount, dec!(0));
    assert_eq!(invoice.invoice.igst_amount, dec!(180.00));
    assert_eq!(invoice.invoice.total_amount, dec!(1180.00));
}

#[tokio::test]
async fn a_challan_cannot_be_billed_twice() {
    let ctx = TestContext::new().await;
    let (customer_id, _item, challan_id) = seed_delivered_challan(&ctx, 1, dec!(800.00)).await;

    invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap();

    let err = invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::DuplicateBilling(_)));
}

#[tokio::test]
async fn an_undelivered_challan_cannot_be_billed() {
    let ctx = TestContext::new().await;
    let customer = ctx.seed_customer().await;
    let order = ctx
        .seed_order(customer.id, &[(MaterialType::Saree, 1, dec!(500.00))])
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

    // Never marked delivered.
    let err = invoice_challan(&ctx, customer.id, challan.challan.id, GST_9_9)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn voiding_an_invoice_frees_its_challans() {
    let ctx = TestContext::new().await;
    let (customer_id, _item, challan_id) = seed_delivered_challan(&ctx, 2, dec!(300.00)).await;

    let first = invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap();

    ctx.services
        .invoicing
        .void_invoice(first.invoice.id)
        .await
        .unwrap();

    // The challan is unbilled again and may go on a fresh invoice.
    let second = invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap();
    assert_eq!(second.invoice.subtotal, dec!(600.00));
}

#[tokio::test]
async fn a_paid_invoice_cannot_be_voided() {
    let ctx = TestContext::new().await;
    let (customer_id, _item, challan_id) = seed_delivered_challan(&ctx, 1, dec!(500.00)).await;

    let invoice = invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap();

    ctx.services
        .payments
        .record_payment(RecordPaymentRequest {
            invoice_id: invoice.invoice.id,
            amount: dec!(100.00),
            payment_method: PaymentMethod::Cash,
            reference: None,
        })
        .await
        .unwrap();

    let err = ctx
        .services
        .invoicing
        .void_invoice(invoice.invoice.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn overpayment_is_rejected_whole() {
    let ctx = TestContext::new().await;
    let (customer_id, _item, challan_id) = seed_delivered_challan(&ctx, 2, dec!(500.00)).await;

    let invoice = invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap();
    assert_eq!(invoice.invoice.total_amount, dec!(1180.00));

    ctx.services
        .payments
        .record_payment(RecordPaymentRequest {
            invoice_id: invoice.invoice.id,
            amount: dec!(1000.00),
            payment_method: PaymentMethod::Cheque,
            reference: Some("CHQ-0091".to_string()),
        })
        .await
        .unwrap();

    // 200 more than the 180 outstanding.
    let err = ctx
        .services
        .payments
        .record_payment(RecordPaymentRequest {
            invoice_id: invoice.invoice.id,
            amount: dec!(380.00),
            payment_method: PaymentMethod::Cash,
            reference: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::OverpaymentRejected(_)));

    // The rejected payment left nothing behind.
    let current = ctx
        .services
        .invoicing
        .get_invoice(invoice.invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.invoice.outstanding_amount, dec!(180.00));
    let payments = ctx
        .services
        .payments
        .list_for_invoice(invoice.invoice.id)
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
}

#[tokio::test]
async fn deleting_a_payment_restores_outstanding() {
    let ctx = TestContext::new().await;
    let (customer_id, _item, challan_id) = seed_delivered_challan(&ctx, 2, dec!(500.00)).await;

    let invoice = invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap();

    let payment = ctx
        .services
        .payments
        .record_payment(RecordPaymentRequest {
            invoice_id: invoice.invoice.id,
            amount: dec!(700.00),
            payment_method: PaymentMethod::Cheque,
            reference: Some("CHQ-1204".to_string()),
        })
        .await
        .unwrap();

    // Cheque bounced.
    ctx.services
        .payments
        .delete_payment(payment.id)
        .await
        .unwrap();

    let current = ctx
        .services
        .invoicing
        .get_invoice(invoice.invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.invoice.outstanding_amount, dec!(1180.00));
}

#[tokio::test]
async fn adjustment_return_settles_against_outstanding() {
    let ctx = TestContext::new().await;
    let (customer_id, item_id, challan_id) = seed_delivered_challan(&ctx, 4, dec!(250.00)).await;

    // Quantity 4 is fully delivered; bump the ordered quantity so the
    // returns below have conservation headroom.
    ctx.services
        .orders
        .update_order_item(
            item_id,
            UpdateOrderItemRequest {
                quantity: Some(6),
                unit_price: None,
                description: None,
            },
        )
        .await
        .unwrap();

    let invoice = invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap();
    assert_eq!(invoice.invoice.total_amount, dec!(1180.00));

    // One unit comes back; its value is credited against the invoice.
    ctx.services
        .returns
        .record_return(RecordReturnRequest {
            order_item_id: item_id,
            quantity: 1,
            reason: ReturnReason::PrintDefect,
            settlement: ReturnSettlement::Adjustment {
                amount: dec!(250.00),
                invoice_id: invoice.invoice.id,
            },
        })
        .await
        .unwrap();

    let current = ctx
        .services
        .invoicing
        .get_invoice(invoice.invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.invoice.outstanding_amount, dec!(930.00));

    // An adjustment larger than what is left outstanding is rejected.
    let err = ctx
        .services
        .returns
        .record_return(RecordReturnRequest {
            order_item_id: item_id,
            quantity: 1,
            reason: ReturnReason::PrintDefect,
            settlement: ReturnSettlement::Adjustment {
                amount: dec!(1000.00),
                invoice_id: invoice.invoice.id,
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::OverpaymentRejected(_)));
}

#[tokio::test]
async fn issued_invoices_keep_their_snapshot_amounts() {
    let ctx = TestContext::new().await;
    let (customer_id, item_id, challan_id) = seed_delivered_challan(&ctx, 2, dec!(500.00)).await;

    let invoice = invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap();
    assert_eq!(invoice.invoice.subtotal, dec!(1000.00));

    // A later price correction must not disturb the issued invoice.
    ctx.services
        .orders
        .update_order_item(
            item_id,
            UpdateOrderItemRequest {
                quantity: None,
                unit_price: Some(dec!(999.00)),
                description: None,
            },
        )
        .await
        .unwrap();

    let after = ctx
        .services
        .invoicing
        .get_invoice(invoice.invoice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.invoice.subtotal, dec!(1000.00));
    assert_eq!(after.invoice.total_amount, dec!(1180.00));
    assert_eq!(after.links[0].challan_amount, dec!(1000.00));
}

#[tokio::test]
async fn recomputation_is_idempotent() {
    let ctx = TestContext::new().await;
    let (customer_id, _item, challan_id) = seed_delivered_challan(&ctx, 3, dec!(300.00)).await;

    let invoice = invoice_challan(&ctx, customer_id, challan_id, GST_9_9)
        .await
        .unwrap();

    ctx.services
        .payments
        .record_payment(RecordPaymentRequest {
            invoice_id: invoice.invoice.id,
            amount: dec!(500.00),
            payment_method: PaymentMethod::Upi,
            reference: None,
        })
        .await
        .unwrap();

    // Recomputing from current children twice in a row changes nothing.
    let first = billing::recompute_invoice_amounts(&*ctx.db, invoice.invoice.id)
        .await
        .unwrap();
    let second = billing::recompute_invoice_amounts(&*ctx.db, invoice.invoice.id)
        .await
        .unwrap();

    assert_eq!(first.subtotal, second.subtotal);
    assert_eq!(first.total_amount, second.total_amount);
    assert_eq!(first.outstanding_amount, second.outstanding_amount);
    assert_eq!(second.outstanding_amount, dec!(562.00));

    let outstanding_once = billing::recompute_outstanding(&*ctx.db, invoice.invoice.id)
        .await
        .unwrap();
    let outstanding_twice = billing::recompute_outstanding(&*ctx.db, invoice.invoice.id)
        .await
        .unwrap();
    assert_eq!(outstanding_once, outstanding_twice);
}
