use crate::{
    db::DbPool,
    entities::{
        audit_log::AuditAction,
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, ProductionStage},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{audit, quantity_ledger},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Enforces the ordered, non-skippable progression of each order item
/// through production. There is no backward transition: reverting a
/// stage is not a supported operation.
#[derive(Clone)]
pub struct ProductionService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ProductionService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Advances an order item to `target`, which must be the immediate
    /// successor of its current stage. Entering `post_process` stamps
    /// `stage_completed_at`; the owning order's display status is
    /// refreshed in the same transaction.
    #[instrument(skip(self), fields(order_item_id = %order_item_id, target = %target))]
    pub async fn advance_stage(
        &self,
        order_item_id: Uuid,
        target: ProductionStage,
    ) -> Result<order_item::Model, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for stage advance");
            ServiceError::DatabaseError(e)
        })?;

        let item = quantity_ledger::lock_order_item(&txn, order_item_id).await?;
        let current = item.production_stage;

        if current.successor() != Some(target) {
            warn!(
                order_item_id = %order_item_id,
                current = %current,
                target = %target,
                "rejected production stage transition"
            );
            return Err(ServiceError::InvalidTransition(format!(
                "Order item {} cannot move from {} to {}",
                order_item_id, current, target
            )));
        }

        let old_snapshot = audit::snapshot(&item)?;
        let order_id = item.order_id;

        let mut active: order_item::ActiveModel = item.into();
        active.production_stage = Set(target);
        active.stage_completed_at = Set(target.is_terminal().then_some(now));
        active.updated_at = Set(Some(now));

        let updated = active.update(&txn).await?;

        audit::record(
            &txn,
            "order_items",
            order_item_id,
            AuditAction::Update,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        self.refresh_order_status(&txn, order_id).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_item_id = %order_item_id, "Failed to commit stage advance");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_item_id = %order_item_id,
            stage = %target,
            "production stage advanced"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::ProductionStageAdvanced {
                    order_item_id,
                    stage: target,
                    completed_at: updated.stage_completed_at,
                })
                .await
            {
                warn!(error = %e, order_item_id = %order_item_id, "Failed to send stage advanced event");
            }
        }

        Ok(updated)
    }

    /// Projects the order's display status from its items' stages and
    /// stores it, unless the order was cancelled.
    async fn refresh_order_status<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let Some(order) = OrderEntity::find_by_id(order_id)
            .one(conn)
            .await?
            .filter(|o| !o.is_deleted)
        else {
            return Ok(());
        };

        if order.status == OrderStatus::Cancelled {
            return Ok(());
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::IsDeleted.eq(false))
            .all(conn)
            .await?;

        let derived = derived_status(&items);
        if derived != order.status {
            let mut active: order::ActiveModel = order.into();
            active.status = Set(derived);
            active.updated_at = Set(Some(Utc::now()));
            active.update(conn).await?;
        }

        Ok(())
    }
}

/// Display status derived from item stages: completed once every item
/// has finished production, in progress as soon as any item has moved
/// past pre-treatment, pending otherwise.
pub fn derived_status(items: &[order_item::Model]) -> OrderStatus {
    if items.is_empty() {
        return OrderStatus::Pending;
    }

    if items
        .iter()
        .all(|i| i.production_stage == ProductionStage::PostProcess)
    {
        return OrderStatus::Completed;
    }

    if items
        .iter()
        .any(|i| i.production_stage != ProductionStage::PreTreatment)
    {
        return OrderStatus::InProgress;
    }

    OrderStatus::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order_item::MaterialType;
    use rust_decimal_macros::dec;

    fn item(stage: ProductionStage) -> order_item::Model {
        order_item::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            material_type: MaterialType::Saree,
            description: None,
            quantity: 1,
            unit_price: dec!(100.00),
            production_stage: stage,
            stage_completed_at: None,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn derived_status_follows_item_stages() {
        assert_eq!(derived_status(&[]), OrderStatus::Pending);
        assert_eq!(
            derived_status(&[item(ProductionStage::PreTreatment)]),
            OrderStatus::Pending
        );
        assert_eq!(
            derived_status(&[
                item(ProductionStage::PreTreatment),
                item(ProductionStage::Printing)
            ]),
            OrderStatus::InProgress
        );
        assert_eq!(
            derived_status(&[
                item(ProductionStage::PostProcess),
                item(ProductionStage::PostProcess)
            ]),
            OrderStatus::Completed
        );
        assert_eq!(
            derived_status(&[
                item(ProductionStage::PostProcess),
                item(ProductionStage::PreTreatment)
            ]),
            OrderStatus::InProgress
        );
    }
}
