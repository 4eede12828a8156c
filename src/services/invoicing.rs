use crate::{
    db::DbPool,
    entities::{
        audit_log::AuditAction,
        challan::Entity as ChallanEntity,
        customer::Entity as CustomerEntity,
        invoice::{self, Entity as InvoiceEntity},
        invoice_challan::{self, Entity as InvoiceChallanEntity},
        payment::{self, Entity as PaymentEntity},
        return_entity::{self, Entity as ReturnEntity, SettlementKind},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{audit, billing, numbering, quantity_ledger},
};
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct TaxRates {
    pub cgst_rate: Decimal,
    pub sgst_rate: Decimal,
    pub igst_rate: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "At least one challan is required"))]
    pub challan_ids: Vec<Uuid>,
    pub tax_rates: TaxRates,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceWithLinks {
    pub invoice: invoice::Model,
    pub links: Vec<invoice_challan::Model>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<invoice::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for GST invoices over delivered challans.
#[derive(Clone)]
pub struct InvoiceService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl InvoiceService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates an invoice consolidating the given challans.
    ///
    /// Every challan must belong to the customer, be delivered, and be
    /// unbilled (at most one active invoice link per challan, ever).
    /// Each link snapshots the challan's current value so the invoice
    /// stays stable under later price corrections; subtotal, taxes,
    /// total, and outstanding are then derived in the same transaction.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_invoice(
        &self,
        request: CreateInvoiceRequest,
    ) -> Result<InvoiceWithLinks, ServiceError> {
        request.validate()?;
        for rate in [
            request.tax_rates.cgst_rate,
            request.tax_rates.sgst_rate,
            request.tax_rates.igst_rate,
        ] {
            if rate < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Tax rates cannot be negative".to_string(),
                ));
            }
        }

        let db = &*self.db_pool;
        let now = Utc::now();
        let invoice_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for invoice creation");
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

        let invoice_number =
            numbering::next_number(&txn, numbering::NumberKind::Invoice, now.year()).await?;

        let invoice_active = invoice::ActiveModel {
            id: Set(invoice_id),
            invoice_number: Set(invoice_number.clone()),
            customer_id: Set(request.customer_id),
            subtotal: Set(Decimal::ZERO),
            cgst_rate: Set(request.tax_rates.cgst_rate),
            cgst_amount: Set(Decimal::ZERO),
            sgst_rate: Set(request.tax_rates.sgst_rate),
            sgst_amount: Set(Decimal::ZERO),
            igst_rate: Set(request.tax_rates.igst_rate),
            igst_amount: Set(Decimal::ZERO),
            total_amount: Set(Decimal::ZERO),
            outstanding_amount: Set(Decimal::ZERO),
            invoice_date: Set(now),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        invoice_active.insert(&txn).await?;

        let mut links = Vec::with_capacity(request.challan_ids.len());
        for challan_id in &request.challan_ids {
            let challan = ChallanEntity::find_by_id(*challan_id)
                .one(&txn)
                .await?
                .filter(|c| !c.is_deleted)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Challan {} not found", challan_id))
                })?;

            if challan.customer_id != request.customer_id {
                return Err(ServiceError::InvalidOperation(format!(
                    "Challan {} belongs to a different customer",
                    challan_id
                )));
            }

            if !challan.is_delivered {
                return Err(ServiceError::InvalidOperation(format!(
                    "Challan {} has not been delivered and cannot be invoiced",
                    challan_id
                )));
            }

            let existing_link = InvoiceChallanEntity::find()
                .filter(invoice_challan::Column::ChallanId.eq(*challan_id))
                .filter(invoice_challan::Column::IsDeleted.eq(false))
                .count(&txn)
                .await?;
            if existing_link > 0 {
                return Err(ServiceError::DuplicateBilling(format!(
                    "Challan {} is already linked to an invoice",
                    challan_id
                )));
            }

            let challan_amount = quantity_ledger::challan_value(&txn, *challan_id).await?;

            let link_active = invoice_challan::ActiveModel {
                id: Set(Uuid::new_v4()),
                invoice_id: Set(invoice_id),
                challan_id: Set(*challan_id),
                challan_amount: Set(challan_amount),
                is_deleted: Set(false),
                created_at: Set(now),
            };
            links.push(link_active.insert(&txn).await?);
        }

        let recomputed = billing::recompute_invoice_amounts(&txn, invoice_id).await?;

        audit::record(
            &txn,
            "invoices",
            invoice_id,
            AuditAction::Insert,
            None,
            Some(audit::snapshot(&recomputed)?),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, invoice_id = %invoice_id, "Failed to commit invoice creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            invoice_id = %invoice_id,
            invoice_number = %invoice_number,
            total = %recomputed.total_amount,
            "invoice created"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::InvoiceCreated(invoice_id)).await {
                warn!(error = %e, invoice_id = %invoice_id, "Failed to send invoice created event");
            }
        }

        Ok(InvoiceWithLinks {
            invoice: recomputed,
            links,
        })
    }

    /// Voids an invoice: soft-deletes it and its challan links, freeing
    /// the challans for rebilling. Rejected once any payment or
    /// adjustment has been applied; those must be unwound first.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn void_invoice(&self, invoice_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let existing = find_active(&txn, invoice_id).await?;

        let payments = PaymentEntity::find()
            .filter(payment::Column::InvoiceId.eq(invoice_id))
            .filter(payment::Column::IsDeleted.eq(false))
            .count(&txn)
            .await?;
        let adjustments = ReturnEntity::find()
            .filter(return_entity::Column::InvoiceId.eq(invoice_id))
            .filter(return_entity::Column::SettlementKind.eq(SettlementKind::Adjustment))
            .filter(return_entity::Column::IsDeleted.eq(false))
            .count(&txn)
            .await?;

        if payments > 0 || adjustments > 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Invoice {} has {} payments and {} adjustments and cannot be voided",
                invoice_id, payments, adjustments
            )));
        }

        let old_snapshot = audit::snapshot(&existing)?;

        let links = InvoiceChallanEntity::find()
            .filter(invoice_challan::Column::InvoiceId.eq(invoice_id))
            .filter(invoice_challan::Column::IsDeleted.eq(false))
            .all(&txn)
            .await?;

        for link in links {
            let link_id = link.id;
            let mut active: invoice_challan::ActiveModel = link.into();
            active.is_deleted = Set(true);
            active.update(&txn).await?;

            audit::record(
                &txn,
                "invoice_challans",
                link_id,
                AuditAction::SoftDelete,
                None,
                None,
            )
            .await?;
        }

        let mut active: invoice::ActiveModel = existing.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        audit::record(
            &txn,
            "invoices",
            invoice_id,
            AuditAction::SoftDelete,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(invoice_id = %invoice_id, "invoice voided");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::InvoiceVoided(invoice_id)).await {
                warn!(error = %e, invoice_id = %invoice_id, "Failed to send invoice voided event");
            }
        }

        Ok(())
    }

    /// Retrieves an invoice with its non-deleted challan links.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(
        &self,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceWithLinks>, ServiceError> {
        let db = &*self.db_pool;

        let Some(invoice) = InvoiceEntity::find_by_id(invoice_id)
            .one(db)
            .await?
            .filter(|i| !i.is_deleted)
        else {
            return Ok(None);
        };

        let links = InvoiceChallanEntity::find()
            .filter(invoice_challan::Column::InvoiceId.eq(invoice_id))
            .filter(invoice_challan::Column::IsDeleted.eq(false))
            .all(db)
            .await?;

        Ok(Some(InvoiceWithLinks { invoice, links }))
    }

    /// Lists invoices with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_invoices(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<InvoiceListResponse, ServiceError> {
        let db = &*self.db_pool;

        let paginator = InvoiceEntity::find()
            .filter(invoice::Column::IsDeleted.eq(false))
            .order_by_desc(invoice::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let invoices = paginator.fetch_page(page.max(1) - 1).await?;

        Ok(InvoiceListResponse {
            invoices,
            total,
            page,
            per_page,
        })
    }
}

async fn find_active<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<invoice::Model, ServiceError> {
    InvoiceEntity::find_by_id(invoice_id)
        .one(conn)
        .await?
        .filter(|i| !i.is_deleted)
        .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))
}
