use crate::{
    db::DbPool,
    entities::{
        audit_log::AuditAction,
        challan_item::{self, Entity as ChallanItemEntity},
        customer::Entity as CustomerEntity,
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity, MaterialType, ProductionStage},
        return_entity::{self, Entity as ReturnEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{audit, billing, numbering, quantity_ledger},
};
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<CreateOrderItemRequest>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CreateOrderItemRequest {
    pub material_type: MaterialType,
    pub description: Option<String>,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateOrderItemRequest {
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: Option<i32>,
    pub unit_price: Option<Decimal>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for managing orders and their line items.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates an order with its line items: allocates the order number,
    /// inserts every item at `pre_treatment`, and computes the initial
    /// total, all in one transaction.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
            if item.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Unit price cannot be negative".to_string(),
                ));
            }
        }

        let db = &*self.db_pool;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let customer = CustomerEntity::find_by_id(request.customer_id)
            .one(&txn)
            .await?
            .filter(|c| !c.is_deleted);
        if customer.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Customer {} not found",
                request.customer_id
            )));
        }

        let order_number =
            numbering::next_number(&txn, numbering::NumberKind::Order, now.year()).await?;

        let order_active = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(request.customer_id),
            status: Set(OrderStatus::Pending),
            order_date: Set(now),
            total_amount: Set(Decimal::ZERO),
            notes: Set(request.notes),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let saved_order = order_active.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order");
            ServiceError::DatabaseError(e)
        })?;

        let mut saved_items = Vec::with_capacity(request.items.len());
        for item in request.items {
            let item_active = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                material_type: Set(item.material_type),
                description: Set(item.description),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                production_stage: Set(ProductionStage::PreTreatment),
                stage_completed_at: Set(None),
                is_deleted: Set(false),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            };
            saved_items.push(item_active.insert(&txn).await?);
        }

        billing::recompute_order_total(&txn, order_id).await?;

        audit::record(
            &txn,
            "orders",
            order_id,
            AuditAction::Insert,
            None,
            Some(audit::snapshot(&saved_order)?),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, order_number = %order_number, "order created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCreated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order created event");
            }
        }

        // Re-read for the recomputed total.
        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        Ok(OrderWithItems {
            order,
            items: saved_items,
        })
    }

    /// Retrieves an order with its non-deleted items.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        let db = &*self.db_pool;

        let Some(order) = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .filter(|o| !o.is_deleted)
        else {
            return Ok(None);
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::IsDeleted.eq(false))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(Some(OrderWithItems { order, items }))
    }

    /// Lists orders with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;

        let paginator = OrderEntity::find()
            .filter(order::Column::IsDeleted.eq(false))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.max(1) - 1).await?;

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Assigns an order status directly (e.g. cancellation by staff).
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let existing = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .filter(|o| !o.is_deleted)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = existing.status.clone();
        let old_snapshot = audit::snapshot(&existing)?;
        let version = existing.version;

        let mut active: order::ActiveModel = existing.into();
        active.status = Set(status.clone());
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);

        let updated = active.update(&txn).await?;

        audit::record(
            &txn,
            "orders",
            order_id,
            AuditAction::Update,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, old_status = %old_status, new_status = %status, "order status updated");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: status.to_string(),
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "Failed to send status changed event");
            }
        }

        Ok(updated)
    }

    /// Corrects an item's quantity, price, or description. A quantity
    /// reduction below what has already been delivered or returned is a
    /// conservation violation; the order total is recomputed in the same
    /// transaction.
    #[instrument(skip(self, request), fields(order_item_id = %order_item_id))]
    pub async fn update_order_item(
        &self,
        order_item_id: Uuid,
        request: UpdateOrderItemRequest,
    ) -> Result<order_item::Model, ServiceError> {
        request.validate()?;
        if let Some(price) = request.unit_price {
            if price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Unit price cannot be negative".to_string(),
                ));
            }
        }

        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let item = quantity_ledger::lock_order_item(&txn, order_item_id).await?;

        if let Some(new_quantity) = request.quantity {
            let delivered = quantity_ledger::delivered_quantity(&txn, order_item_id).await?;
            let returned = quantity_ledger::returned_quantity(&txn, order_item_id).await?;
            let consumed = delivered + returned;
            if new_quantity < consumed {
                return Err(ServiceError::ConservationViolation(format!(
                    "Cannot reduce order item {} to {} units: {} already delivered or returned",
                    order_item_id, new_quantity, consumed
                )));
            }
        }

        let old_snapshot = audit::snapshot(&item)?;
        let order_id = item.order_id;

        let mut active: order_item::ActiveModel = item.into();
        if let Some(q) = request.quantity {
            active.quantity = Set(q);
        }
        if let Some(p) = request.unit_price {
            active.unit_price = Set(p);
        }
        if let Some(d) = request.description {
            active.description = Set(Some(d));
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(&txn).await?;

        billing::recompute_order_total(&txn, order_id).await?;

        audit::record(
            &txn,
            "order_items",
            order_item_id,
            AuditAction::Update,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_item_id = %order_item_id, "order item updated");
        Ok(updated)
    }

    /// Soft-deletes an order item and recomputes the order total.
    /// Rejected once the item has any active challan items or returns;
    /// those histories must be unwound first.
    #[instrument(skip(self), fields(order_item_id = %order_item_id))]
    pub async fn remove_order_item(&self, order_item_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let item = quantity_ledger::lock_order_item(&txn, order_item_id).await?;

        let challan_refs = ChallanItemEntity::find()
            .filter(challan_item::Column::OrderItemId.eq(order_item_id))
            .filter(challan_item::Column::IsDeleted.eq(false))
            .count(&txn)
            .await?;
        let return_refs = ReturnEntity::find()
            .filter(return_entity::Column::OrderItemId.eq(order_item_id))
            .filter(return_entity::Column::IsDeleted.eq(false))
            .count(&txn)
            .await?;

        if challan_refs > 0 || return_refs > 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Order item {} has {} challan items and {} returns and cannot be removed",
                order_item_id, challan_refs, return_refs
            )));
        }

        let old_snapshot = audit::snapshot(&item)?;
        let order_id = item.order_id;

        let mut active: order_item::ActiveModel = item.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        billing::recompute_order_total(&txn, order_id).await?;

        audit::record(
            &txn,
            "order_items",
            order_item_id,
            AuditAction::SoftDelete,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_item_id = %order_item_id, "order item removed");
        Ok(())
    }
}
