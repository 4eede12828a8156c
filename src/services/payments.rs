use crate::{
    db::DbPool,
    entities::{
        audit_log::AuditAction,
        invoice::{self, Entity as InvoiceEntity},
        payment::{self, Entity as PaymentEntity, PaymentMethod},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{audit, billing},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordPaymentRequest {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub reference: Option<String>,
}

/// Service for payments against invoices.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Records a payment against an invoice.
    ///
    /// The invoice row is locked first, so two concurrent payments
    /// cannot both pass the overpayment check; the outstanding balance
    /// is recomputed before the same transaction commits.
    #[instrument(skip(self, request), fields(invoice_id = %request.invoice_id, amount = %request.amount))]
    pub async fn record_payment(
        &self,
        request: RecordPaymentRequest,
    ) -> Result<payment::Model, ServiceError> {
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be positive".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let now = Utc::now();
        let payment_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for payment");
            ServiceError::DatabaseError(e)
        })?;

        let inv = lock_invoice(&txn, request.invoice_id).await?;

        let paid = billing::payments_total(&txn, inv.id).await?;
        let adjusted = billing::adjustments_total(&txn, inv.id).await?;
        let available = inv.total_amount - paid - adjusted;

        if request.amount > available {
            return Err(ServiceError::OverpaymentRejected(format!(
                "Payment of {} exceeds outstanding balance {} on invoice {}",
                request.amount, available, inv.id
            )));
        }

        let active = payment::ActiveModel {
            id: Set(payment_id),
            invoice_id: Set(inv.id),
            amount: Set(request.amount),
            payment_method: Set(request.payment_method),
            reference: Set(request.reference),
            payment_date: Set(now),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let saved = active.insert(&txn).await?;

        billing::recompute_outstanding(&txn, inv.id).await?;

        audit::record(
            &txn,
            "payments",
            payment_id,
            AuditAction::Insert,
            None,
            Some(audit::snapshot(&saved)?),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, payment_id = %payment_id, "Failed to commit payment");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            payment_id = %payment_id,
            invoice_id = %request.invoice_id,
            amount = %request.amount,
            "payment recorded"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::PaymentRecorded {
                    invoice_id: request.invoice_id,
                    payment_id,
                    amount: request.amount,
                })
                .await
            {
                warn!(error = %e, payment_id = %payment_id, "Failed to send payment recorded event");
            }
        }

        Ok(saved)
    }

    /// Soft-deletes a payment (e.g. a bounced cheque) and recomputes the
    /// invoice's outstanding balance in the same transaction.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn delete_payment(&self, payment_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let existing = PaymentEntity::find_by_id(payment_id)
            .one(&txn)
            .await?
            .filter(|p| !p.is_deleted)
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;

        let invoice_id = existing.invoice_id;
        lock_invoice(&txn, invoice_id).await?;

        let old_snapshot = audit::snapshot(&existing)?;

        let mut active: payment::ActiveModel = existing.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        billing::recompute_outstanding(&txn, invoice_id).await?;

        audit::record(
            &txn,
            "payments",
            payment_id,
            AuditAction::SoftDelete,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(payment_id = %payment_id, invoice_id = %invoice_id, "payment removed");
        Ok(())
    }

    /// Lists non-deleted payments for an invoice, oldest first.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn list_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        let db = &*self.db_pool;

        let payments = PaymentEntity::find()
            .filter(payment::Column::InvoiceId.eq(invoice_id))
            .filter(payment::Column::IsDeleted.eq(false))
            .order_by_asc(payment::Column::PaymentDate)
            .all(db)
            .await?;

        Ok(payments)
    }
}

/// Fetches an invoice and locks its row for the rest of the transaction.
pub(crate) async fn lock_invoice<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<invoice::Model, ServiceError> {
    InvoiceEntity::find_by_id(invoice_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .filter(|i| !i.is_deleted)
        .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))
}
