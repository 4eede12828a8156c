use crate::{
    entities::{
        invoice::{self, Entity as InvoiceEntity},
        invoice_challan::{self, Entity as InvoiceChallanEntity},
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        payment::{self, Entity as PaymentEntity},
        return_entity::{self, Entity as ReturnEntity, SettlementKind},
    },
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::debug;
use uuid::Uuid;

/// Aggregate recomputation for derived monetary totals.
///
/// Each function re-derives its total in full from current non-deleted
/// children, never patched incrementally from a cached delta, so the
/// stored value cannot drift. Services call these inside the same
/// transaction as the child mutation that made them stale.

/// GST component amount: `subtotal × rate / 100`, rounded to 2 decimal
/// places. Rates are percentages (9 means 9%).
pub fn tax_amount(subtotal: Decimal, rate: Decimal) -> Decimal {
    (subtotal * rate / Decimal::ONE_HUNDRED).round_dp(2)
}

/// Recomputes `orders.total_amount` = Σ(quantity × unit_price) over the
/// order's non-deleted items. Returns the new total.
pub async fn recompute_order_total<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let order = OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .filter(order_item::Column::IsDeleted.eq(false))
        .all(conn)
        .await?;

    let total: Decimal = items
        .iter()
        .map(|item| Decimal::from(item.quantity) * item.unit_price)
        .sum();

    let mut active: order::ActiveModel = order.into();
    active.total_amount = Set(total);
    active.updated_at = Set(Some(Utc::now()));
    active.update(conn).await?;

    debug!(%order_id, %total, "recomputed order total");
    Ok(total)
}

/// Σ non-deleted payment amounts for an invoice.
pub async fn payments_total<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let payments = PaymentEntity::find()
        .filter(payment::Column::InvoiceId.eq(invoice_id))
        .filter(payment::Column::IsDeleted.eq(false))
        .all(conn)
        .await?;

    Ok(payments.iter().map(|p| p.amount).sum())
}

/// Σ non-deleted adjustment-return amounts applied against an invoice.
pub async fn adjustments_total<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let returns = ReturnEntity::find()
        .filter(return_entity::Column::InvoiceId.eq(invoice_id))
        .filter(return_entity::Column::SettlementKind.eq(SettlementKind::Adjustment))
        .filter(return_entity::Column::IsDeleted.eq(false))
        .all(conn)
        .await?;

    Ok(returns.iter().map(|r| r.settlement_amount).sum())
}

fn outstanding_for(
    invoice_id: Uuid,
    total: Decimal,
    paid: Decimal,
    adjusted: Decimal,
) -> Result<Decimal, ServiceError> {
    let outstanding = total - paid - adjusted;
    if outstanding < Decimal::ZERO {
        // Settlements exceeding the invoice total mean an earlier write
        // slipped past validation; abort instead of clamping.
        return Err(ServiceError::OverpaymentRejected(format!(
            "Invoice {} settlements ({} paid, {} adjusted) exceed total {}",
            invoice_id, paid, adjusted, total
        )));
    }
    Ok(outstanding)
}

/// Recomputes an invoice's `subtotal`, tax amounts, `total_amount`, and
/// (cascading) `outstanding_amount` from current non-deleted children.
pub async fn recompute_invoice_amounts<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<invoice::Model, ServiceError> {
    let inv = InvoiceEntity::find_by_id(invoice_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))?;

    let links = InvoiceChallanEntity::find()
        .filter(invoice_challan::Column::InvoiceId.eq(invoice_id))
        .filter(invoice_challan::Column::IsDeleted.eq(false))
        .all(conn)
        .await?;

    let subtotal: Decimal = links.iter().map(|l| l.challan_amount).sum();
    let cgst_amount = tax_amount(subtotal, inv.cgst_rate);
    let sgst_amount = tax_amount(subtotal, inv.sgst_rate);
    let igst_amount = tax_amount(subtotal, inv.igst_rate);
    let total = subtotal + cgst_amount + sgst_amount + igst_amount;

    let paid = payments_total(conn, invoice_id).await?;
    let adjusted = adjustments_total(conn, invoice_id).await?;
    let outstanding = outstanding_for(invoice_id, total, paid, adjusted)?;

    let mut active: invoice::ActiveModel = inv.into();
    active.subtotal = Set(subtotal);
    active.cgst_amount = Set(cgst_amount);
    active.sgst_amount = Set(sgst_amount);
    active.igst_amount = Set(igst_amount);
    active.total_amount = Set(total);
    active.outstanding_amount = Set(outstanding);
    active.updated_at = Set(Some(Utc::now()));
    let updated = active.update(conn).await?;

    debug!(%invoice_id, %subtotal, %total, %outstanding, "recomputed invoice amounts");
    Ok(updated)
}

/// Recomputes `outstanding_amount` = total − payments − adjustments.
/// Returns the new outstanding balance.
pub async fn recompute_outstanding<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let inv = InvoiceEntity::find_by_id(invoice_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))?;

    let paid = payments_total(conn, invoice_id).await?;
    let adjusted = adjustments_total(conn, invoice_id).await?;
    let outstanding = outstanding_for(invoice_id, inv.total_amount, paid, adjusted)?;

    let total_amount = inv.total_amount;
    let mut active: invoice::ActiveModel = inv.into();
    active.outstanding_amount = Set(outstanding);
    active.updated_at = Set(Some(Utc::now()));
    active.update(conn).await?;

    debug!(%invoice_id, %total_amount, %outstanding, "recomputed outstanding");
    Ok(outstanding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tax_amount_applies_percentage() {
        assert_eq!(tax_amount(dec!(1000.00), dec!(9)), dec!(90.00));
        assert_eq!(tax_amount(dec!(1000.00), dec!(18)), dec!(180.00));
        assert_eq!(tax_amount(dec!(1000.00), dec!(0)), dec!(0));
    }

    #[test]
    fn tax_amount_rounds_to_paise() {
        // 333.33 * 9% = 29.9997 -> 30.00
        assert_eq!(tax_amount(dec!(333.33), dec!(9)), dec!(30.00));
        // 100.01 * 2.5% = 2.50025 -> 2.50
        assert_eq!(tax_amount(dec!(100.01), dec!(2.5)), dec!(2.50));
    }

    #[test]
    fn outstanding_never_goes_negative() {
        let id = Uuid::new_v4();
        assert_eq!(
            outstanding_for(id, dec!(1180.00), dec!(600.00), dec!(0)).unwrap(),
            dec!(580.00)
        );
        assert_eq!(
            outstanding_for(id, dec!(1180.00), dec!(1180.00), dec!(0)).unwrap(),
            dec!(0)
        );

        let err = outstanding_for(id, dec!(1180.00), dec!(1200.00), dec!(0)).unwrap_err();
        assert!(matches!(err, ServiceError::OverpaymentRejected(_)));
    }
}
