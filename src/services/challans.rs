use crate::{
    db::DbPool,
    entities::{
        audit_log::AuditAction,
        challan::{self, Entity as ChallanEntity},
        challan_item::{self, Entity as ChallanItemEntity},
        customer::Entity as CustomerEntity,
        invoice_challan::{self, Entity as InvoiceChallanEntity},
        order::Entity as OrderEntity,
        order_item::ProductionStage,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{audit, numbering, quantity_ledger},
};
use chrono::{Datelike, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateChallanRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub lines: Vec<ChallanLineRequest>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ChallanLineRequest {
    pub order_item_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallanWithItems {
    pub challan: challan::Model,
    pub items: Vec<challan_item::Model>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallanListResponse {
    pub challans: Vec<challan::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for delivery challans: partial consolidation of completed
/// order items for handover to the customer.
#[derive(Clone)]
pub struct ChallanService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ChallanService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a challan over one or more order items.
    ///
    /// Each line locks its order item, then checks the two gate
    /// conditions: the item has finished production (`post_process`)
    /// and the line quantity fits within the item's remaining-to-deliver
    /// balance. Lines are inserted as they pass, so several lines
    /// against the same item are checked cumulatively. Any failure
    /// rolls the whole challan back.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_challan(
        &self,
        request: CreateChallanRequest,
    ) -> Result<ChallanWithItems, ServiceError> {
        request.validate()?;
        for line in &request.lines {
            line.validate()?;
        }

        let db = &*self.db_pool;
        let now = Utc::now();
        let challan_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for challan creation");
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

        let challan_number =
            numbering::next_number(&txn, numbering::NumberKind::Challan, now.year()).await?;

        let challan_active = challan::ActiveModel {
            id: Set(challan_id),
            challan_number: Set(challan_number.clone()),
            customer_id: Set(request.customer_id),
            is_delivered: Set(false),
            delivered_at: Set(None),
            notes: Set(request.notes),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let saved_challan = challan_active.insert(&txn).await?;

        let mut saved_items = Vec::with_capacity(request.lines.len());
        for line in request.lines {
            let item = quantity_ledger::lock_order_item(&txn, line.order_item_id).await?;

            let order = OrderEntity::find_by_id(item.order_id)
                .one(&txn)
                .await?
                .filter(|o| !o.is_deleted)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Order {} not found", item.order_id))
                })?;
            if order.customer_id != request.customer_id {
                return Err(ServiceError::InvalidOperation(format!(
                    "Order item {} belongs to a different customer",
                    item.id
                )));
            }

            if item.production_stage != ProductionStage::PostProcess {
                return Err(ServiceError::StageNotReady(format!(
                    "Order item {} is in {} and cannot be delivered before post_process",
                    item.id, item.production_stage
                )));
            }

            quantity_ledger::ensure_can_deliver(&txn, &item, line.quantity).await?;

            let item_active = challan_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                challan_id: Set(challan_id),
                order_item_id: Set(line.order_item_id),
                quantity: Set(line.quantity),
                is_deleted: Set(false),
                created_at: Set(now),
            };
            saved_items.push(item_active.insert(&txn).await?);
        }

        audit::record(
            &txn,
            "challans",
            challan_id,
            AuditAction::Insert,
            None,
            Some(audit::snapshot(&saved_challan)?),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, challan_id = %challan_id, "Failed to commit challan creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(challan_id = %challan_id, challan_number = %challan_number, "challan created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::ChallanCreated(challan_id)).await {
                warn!(error = %e, challan_id = %challan_id, "Failed to send challan created event");
            }
        }

        Ok(ChallanWithItems {
            challan: saved_challan,
            items: saved_items,
        })
    }

    /// Marks a challan as handed over to the customer, which makes it
    /// eligible for invoicing.
    #[instrument(skip(self), fields(challan_id = %challan_id))]
    pub async fn mark_delivered(&self, challan_id: Uuid) -> Result<challan::Model, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let existing = find_active(&txn, challan_id).await?;

        if existing.is_delivered {
            return Err(ServiceError::InvalidOperation(format!(
                "Challan {} is already delivered",
                challan_id
            )));
        }

        let old_snapshot = audit::snapshot(&existing)?;

        let mut active: challan::ActiveModel = existing.into();
        active.is_delivered = Set(true);
        active.delivered_at = Set(Some(now));
        active.updated_at = Set(Some(now));

        let updated = active.update(&txn).await?;

        audit::record(
            &txn,
            "challans",
            challan_id,
            AuditAction::Update,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(challan_id = %challan_id, "challan delivered");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::ChallanDelivered(challan_id)).await {
                warn!(error = %e, challan_id = %challan_id, "Failed to send challan delivered event");
            }
        }

        Ok(updated)
    }

    /// Soft-deletes one challan item: the correction path for a
    /// mis-entered line. The referenced order item's delivered count
    /// shrinks immediately; an already-issued invoice keeps its snapshot
    /// amount, which is why this is rejected once the challan is billed.
    #[instrument(skip(self), fields(challan_item_id = %challan_item_id))]
    pub async fn delete_challan_item(&self, challan_item_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let item = ChallanItemEntity::find_by_id(challan_item_id)
            .one(&txn)
            .await?
            .filter(|i| !i.is_deleted)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Challan item {} not found", challan_item_id))
            })?;

        ensure_unbilled(&txn, item.challan_id).await?;

        let old_snapshot = audit::snapshot(&item)?;

        let mut active: challan_item::ActiveModel = item.into();
        active.is_deleted = Set(true);
        let updated = active.update(&txn).await?;

        audit::record(
            &txn,
            "challan_items",
            challan_item_id,
            AuditAction::SoftDelete,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(challan_item_id = %challan_item_id, "challan item removed");
        Ok(())
    }

    /// Soft-deletes a whole challan and its items. Rejected once billed.
    #[instrument(skip(self), fields(challan_id = %challan_id))]
    pub async fn delete_challan(&self, challan_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let existing = find_active(&txn, challan_id).await?;

        ensure_unbilled(&txn, challan_id).await?;

        let old_snapshot = audit::snapshot(&existing)?;

        let items = ChallanItemEntity::find()
            .filter(challan_item::Column::ChallanId.eq(challan_id))
            .filter(challan_item::Column::IsDeleted.eq(false))
            .all(&txn)
            .await?;

        for item in items {
            let item_id = item.id;
            let mut active: challan_item::ActiveModel = item.into();
            active.is_deleted = Set(true);
            active.update(&txn).await?;

            audit::record(
                &txn,
                "challan_items",
                item_id,
                AuditAction::SoftDelete,
                None,
                None,
            )
            .await?;
        }

        let mut active: challan::ActiveModel = existing.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        audit::record(
            &txn,
            "challans",
            challan_id,
            AuditAction::SoftDelete,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(challan_id = %challan_id, "challan removed");
        Ok(())
    }

    /// Retrieves a challan with its non-deleted items.
    #[instrument(skip(self), fields(challan_id = %challan_id))]
    pub async fn get_challan(
        &self,
        challan_id: Uuid,
    ) -> Result<Option<ChallanWithItems>, ServiceError> {
        let db = &*self.db_pool;

        let Some(challan) = ChallanEntity::find_by_id(challan_id)
            .one(db)
            .await?
            .filter(|c| !c.is_deleted)
        else {
            return Ok(None);
        };

        let items = ChallanItemEntity::find()
            .filter(challan_item::Column::ChallanId.eq(challan_id))
            .filter(challan_item::Column::IsDeleted.eq(false))
            .order_by_asc(challan_item::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(Some(ChallanWithItems { challan, items }))
    }

    /// Lists challans with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_challans(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<ChallanListResponse, ServiceError> {
        let db = &*self.db_pool;

        let paginator = ChallanEntity::find()
            .filter(challan::Column::IsDeleted.eq(false))
            .order_by_desc(challan::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let challans = paginator.fetch_page(page.max(1) - 1).await?;

        Ok(ChallanListResponse {
            challans,
            total,
            page,
            per_page,
        })
    }
}

async fn find_active<C: ConnectionTrait>(
    conn: &C,
    challan_id: Uuid,
) -> Result<challan::Model, ServiceError> {
    ChallanEntity::find_by_id(challan_id)
        .one(conn)
        .await?
        .filter(|c| !c.is_deleted)
        .ok_or_else(|| ServiceError::NotFound(format!("Challan {} not found", challan_id)))
}

/// Rejects the operation if the challan is linked to a non-deleted
/// invoice; billed challans are immutable history.
async fn ensure_unbilled<C: ConnectionTrait>(
    conn: &C,
    challan_id: Uuid,
) -> Result<(), ServiceError> {
    let billed = InvoiceChallanEntity::find()
        .filter(invoice_challan::Column::ChallanId.eq(challan_id))
        .filter(invoice_challan::Column::IsDeleted.eq(false))
        .count(conn)
        .await?;

    if billed > 0 {
        return Err(ServiceError::InvalidOperation(format!(
            "Challan {} is linked to an active invoice and cannot be modified",
            challan_id
        )));
    }

    Ok(())
}
