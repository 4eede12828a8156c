use crate::{
    entities::{
        challan_item::{self, Entity as ChallanItemEntity},
        order_item::{self, Entity as OrderItemEntity},
        return_entity::{self, Entity as ReturnEntity},
    },
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};
use std::collections::HashMap;
use uuid::Uuid;

/// Conservation arithmetic for physical quantity moving through
/// Order Item → Challan Item → Return.
///
/// Every function reads only non-deleted rows and composes into the
/// caller's transaction, so a write path can lock the order item, read
/// the current position, and insert the child row without another
/// transaction sneaking a quantity in between.

/// Fetches an order item and locks its row for the rest of the
/// transaction. All conservation-checked writes go through this.
pub async fn lock_order_item<C: ConnectionTrait>(
    conn: &C,
    order_item_id: Uuid,
) -> Result<order_item::Model, ServiceError> {
    let item = OrderItemEntity::find_by_id(order_item_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .filter(|item| !item.is_deleted)
        .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", order_item_id)))?;

    Ok(item)
}

/// Σ non-deleted challan-item quantities referencing the order item.
pub async fn delivered_quantity<C: ConnectionTrait>(
    conn: &C,
    order_item_id: Uuid,
) -> Result<i32, ServiceError> {
    let items = ChallanItemEntity::find()
        .filter(challan_item::Column::OrderItemId.eq(order_item_id))
        .filter(challan_item::Column::IsDeleted.eq(false))
        .all(conn)
        .await?;

    Ok(items.iter().map(|i| i.quantity).sum())
}

/// Σ non-deleted return quantities referencing the order item.
pub async fn returned_quantity<C: ConnectionTrait>(
    conn: &C,
    order_item_id: Uuid,
) -> Result<i32, ServiceError> {
    let returns = ReturnEntity::find()
        .filter(return_entity::Column::OrderItemId.eq(order_item_id))
        .filter(return_entity::Column::IsDeleted.eq(false))
        .all(conn)
        .await?;

    Ok(returns.iter().map(|r| r.quantity).sum())
}

/// Units of the order item not yet consumed by deliveries or returns.
///
/// `quantity − delivered − returned`; a negative position means the
/// stored data already violates conservation and is surfaced as an
/// error, never clamped.
pub async fn remaining_to_deliver<C: ConnectionTrait>(
    conn: &C,
    order_item: &order_item::Model,
) -> Result<i32, ServiceError> {
    let delivered = delivered_quantity(conn, order_item.id).await?;
    let returned = returned_quantity(conn, order_item.id).await?;

    let remaining = order_item.quantity - delivered - returned;
    if remaining < 0 {
        return Err(ServiceError::ConservationViolation(format!(
            "Order item {} is over-consumed: quantity {}, delivered {}, returned {}",
            order_item.id, order_item.quantity, delivered, returned
        )));
    }

    Ok(remaining)
}

/// Units actually in the customer's hands: delivered minus already
/// returned. The ceiling for any new return.
pub async fn returnable_quantity<C: ConnectionTrait>(
    conn: &C,
    order_item_id: Uuid,
) -> Result<i32, ServiceError> {
    let delivered = delivered_quantity(conn, order_item_id).await?;
    let returned = returned_quantity(conn, order_item_id).await?;

    Ok(delivered - returned)
}

/// Value of a challan: Σ over its non-deleted items of quantity × the
/// referenced order item's unit price. Captured as the invoice-link
/// snapshot at billing time.
pub async fn challan_value<C: ConnectionTrait>(
    conn: &C,
    challan_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let items = ChallanItemEntity::find()
        .filter(challan_item::Column::ChallanId.eq(challan_id))
        .filter(challan_item::Column::IsDeleted.eq(false))
        .all(conn)
        .await?;

    if items.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let order_item_ids: Vec<Uuid> = items.iter().map(|i| i.order_item_id).collect();
    let order_items = OrderItemEntity::find()
        .filter(order_item::Column::Id.is_in(order_item_ids))
        .all(conn)
        .await?;

    let prices: HashMap<Uuid, Decimal> = order_items
        .into_iter()
        .map(|item| (item.id, item.unit_price))
        .collect();

    let mut total = Decimal::ZERO;
    for item in &items {
        let unit_price = prices.get(&item.order_item_id).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Challan item {} references missing order item {}",
                item.id, item.order_item_id
            ))
        })?;
        total += Decimal::from(item.quantity) * *unit_price;
    }

    Ok(total)
}

/// Rejects a delivery of `quantity` units unless the order item has that
/// much left to deliver.
pub async fn ensure_can_deliver<C: ConnectionTrait>(
    conn: &C,
    order_item: &order_item::Model,
    quantity: i32,
) -> Result<(), ServiceError> {
    let remaining = remaining_to_deliver(conn, order_item).await?;
    if quantity > remaining {
        return Err(ServiceError::ConservationViolation(format!(
            "Cannot deliver {} units of order item {}: only {} remaining",
            quantity, order_item.id, remaining
        )));
    }

    Ok(())
}

/// Rejects a return of `quantity` units unless that many units were
/// actually delivered and not yet returned, and the order item still
/// has that much conservation headroom. Returned units count against
/// the ordered quantity the same way deliveries do, so
/// `delivered + returned` can never exceed `quantity`.
pub async fn ensure_can_return<C: ConnectionTrait>(
    conn: &C,
    order_item: &order_item::Model,
    quantity: i32,
) -> Result<(), ServiceError> {
    let returnable = returnable_quantity(conn, order_item.id).await?;
    if quantity > returnable {
        return Err(ServiceError::ConservationViolation(format!(
            "Cannot return {} units of order item {}: only {} delivered and unreturned",
            quantity, order_item.id, returnable
        )));
    }

    let remaining = remaining_to_deliver(conn, order_item).await?;
    if quantity > remaining {
        return Err(ServiceError::ConservationViolation(format!(
            "Cannot return {} units of order item {}: only {} units of headroom remain",
            quantity, order_item.id, remaining
        )));
    }

    Ok(())
}
