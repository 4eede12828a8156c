use crate::{
    db::DbPool,
    entities::{
        audit_log::AuditAction,
        return_entity::{self, Entity as ReturnEntity, ReturnReason, SettlementKind},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{audit, billing, payments::lock_invoice, quantity_ledger},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// How a return is settled with the customer: cash back, or credit
/// against a specific invoice's outstanding balance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReturnSettlement {
    Refund { amount: Decimal },
    Adjustment { amount: Decimal, invoice_id: Uuid },
}

impl ReturnSettlement {
    fn amount(&self) -> Decimal {
        match self {
            ReturnSettlement::Refund { amount } => *amount,
            ReturnSettlement::Adjustment { amount, .. } => *amount,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordReturnRequest {
    pub order_item_id: Uuid,
    pub quantity: i32,
    pub reason: ReturnReason,
    pub settlement: ReturnSettlement,
}

/// Service for customer returns against delivered order items.
#[derive(Clone)]
pub struct ReturnService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ReturnService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Records a return.
    ///
    /// The order item is locked, then the quantity is checked against
    /// what was actually shipped and not yet returned. An adjustment
    /// settlement additionally locks the target invoice, verifies the
    /// credit fits within its outstanding balance, and recomputes that
    /// balance before the transaction commits.
    #[instrument(skip(self, request), fields(order_item_id = %request.order_item_id, quantity = request.quantity))]
    pub async fn record_return(
        &self,
        request: RecordReturnRequest,
    ) -> Result<return_entity::Model, ServiceError> {
        if request.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Return quantity must be positive".to_string(),
            ));
        }
        if request.settlement.amount() < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Settlement amount cannot be negative".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let now = Utc::now();
        let return_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for return");
            ServiceError::DatabaseError(e)
        })?;

        let item = quantity_ledger::lock_order_item(&txn, request.order_item_id).await?;
        quantity_ledger::ensure_can_return(&txn, &item, request.quantity).await?;

        let (settlement_kind, settlement_amount, invoice_id) = match request.settlement {
            ReturnSettlement::Refund { amount } => (SettlementKind::Refund, amount, None),
            ReturnSettlement::Adjustment { amount, invoice_id } => {
                let inv = lock_invoice(&txn, invoice_id).await?;
                if amount > inv.outstanding_amount {
                    return Err(ServiceError::OverpaymentRejected(format!(
                        "Adjustment of {} exceeds outstanding balance {} on invoice {}",
                        amount, inv.outstanding_amount, invoice_id
                    )));
                }
                (SettlementKind::Adjustment, amount, Some(invoice_id))
            }
        };

        let active = return_entity::ActiveModel {
            id: Set(return_id),
            order_item_id: Set(request.order_item_id),
            quantity: Set(request.quantity),
            reason: Set(request.reason),
            settlement_kind: Set(settlement_kind),
            settlement_amount: Set(settlement_amount),
            invoice_id: Set(invoice_id),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let saved = active.insert(&txn).await?;

        if let Some(invoice_id) = invoice_id {
            billing::recompute_outstanding(&txn, invoice_id).await?;
        }

        audit::record(
            &txn,
            "returns",
            return_id,
            AuditAction::Insert,
            None,
            Some(audit::snapshot(&saved)?),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, return_id = %return_id, "Failed to commit return");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            return_id = %return_id,
            order_item_id = %request.order_item_id,
            quantity = request.quantity,
            "return recorded"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::ReturnRecorded {
                    order_item_id: request.order_item_id,
                    return_id,
                    quantity: request.quantity,
                })
                .await
            {
                warn!(error = %e, return_id = %return_id, "Failed to send return recorded event");
            }
        }

        Ok(saved)
    }

    /// Soft-deletes a return, releasing its quantity back to the order
    /// item's delivered balance and unwinding any invoice adjustment.
    #[instrument(skip(self), fields(return_id = %return_id))]
    pub async fn delete_return(&self, return_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let existing = ReturnEntity::find_by_id(return_id)
            .one(&txn)
            .await?
            .filter(|r| !r.is_deleted)
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))?;

        let old_snapshot = audit::snapshot(&existing)?;
        let invoice_id = existing.invoice_id;

        let mut active: return_entity::ActiveModel = existing.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        if let Some(invoice_id) = invoice_id {
            lock_invoice(&txn, invoice_id).await?;
            billing::recompute_outstanding(&txn, invoice_id).await?;
        }

        audit::record(
            &txn,
            "returns",
            return_id,
            AuditAction::SoftDelete,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(return_id = %return_id, "return removed");
        Ok(())
    }

    /// Lists non-deleted returns for an order item, oldest first.
    #[instrument(skip(self), fields(order_item_id = %order_item_id))]
    pub async fn list_for_order_item(
        &self,
        order_item_id: Uuid,
    ) -> Result<Vec<return_entity::Model>, ServiceError> {
        let db = &*self.db_pool;

        let returns = ReturnEntity::find()
            .filter(return_entity::Column::OrderItemId.eq(order_item_id))
            .filter(return_entity::Column::IsDeleted.eq(false))
            .order_by_asc(return_entity::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(returns)
    }
}
