use crate::{
    db::DbPool,
    entities::{
        audit_log::AuditAction,
        customer::{self, Entity as CustomerEntity},
        order::{self, Entity as OrderEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit,
};
use chrono::Utc;
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
pub struct CreateCustomerRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(length(min = 6, max = 20, message = "Phone must be between 6 and 20 characters"))]
    pub phone: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub address: Option<String>,
    pub gstin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateCustomerRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 6, max = 20, message = "Phone must be between 6 and 20 characters"))]
    pub phone: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub address: Option<String>,
    pub gstin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CustomerListResponse {
    pub customers: Vec<customer::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for managing customers.
#[derive(Clone)]
pub struct CustomerService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl CustomerService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a customer. Phone and email must be unique among
    /// non-deleted customers.
    #[instrument(skip(self, request), fields(phone = %request.phone))]
    pub async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<customer::Model, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;
        let now = Utc::now();
        let customer_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for customer creation");
            ServiceError::DatabaseError(e)
        })?;

        ensure_identity_available(&txn, &request.phone, &request.email, None).await?;

        let active = customer::ActiveModel {
            id: Set(customer_id),
            name: Set(request.name),
            phone: Set(request.phone),
            email: Set(request.email),
            address: Set(request.address),
            gstin: Set(request.gstin),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let saved = active.insert(&txn).await?;

        audit::record(
            &txn,
            "customers",
            customer_id,
            AuditAction::Insert,
            None,
            Some(audit::snapshot(&saved)?),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, customer_id = %customer_id, "Failed to commit customer creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(customer_id = %customer_id, "customer created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::CustomerCreated(customer_id)).await {
                warn!(error = %e, customer_id = %customer_id, "Failed to send customer created event");
            }
        }

        Ok(saved)
    }

    /// Updates a customer's contact details, re-checking identity
    /// uniqueness when phone or email changes.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn update_customer(
        &self,
        customer_id: Uuid,
        request: UpdateCustomerRequest,
    ) -> Result<customer::Model, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let existing = find_active(&txn, customer_id).await?;

        let phone = request.phone.clone().unwrap_or_else(|| existing.phone.clone());
        let email = request.email.clone().unwrap_or_else(|| existing.email.clone());
        if phone != existing.phone || email != existing.email {
            ensure_identity_available(&txn, &phone, &email, Some(customer_id)).await?;
        }

        let old_snapshot = audit::snapshot(&existing)?;

        let mut active: customer::ActiveModel = existing.into();
        if let Some(name) = request.name {
            active.name = Set(name);
        }
        if let Some(p) = request.phone {
            active.phone = Set(p);
        }
        if let Some(e) = request.email {
            active.email = Set(e);
        }
        if let Some(a) = request.address {
            active.address = Set(Some(a));
        }
        if let Some(g) = request.gstin {
            active.gstin = Set(Some(g));
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(&txn).await?;

        audit::record(
            &txn,
            "customers",
            customer_id,
            AuditAction::Update,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(customer_id = %customer_id, "customer updated");
        Ok(updated)
    }

    /// Soft-deletes a customer. Rejected while any non-deleted order
    /// still references them.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn delete_customer(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let existing = find_active(&txn, customer_id).await?;

        let order_count = OrderEntity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::IsDeleted.eq(false))
            .count(&txn)
            .await?;

        if order_count > 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Customer {} has {} active orders and cannot be deleted",
                customer_id, order_count
            )));
        }

        let old_snapshot = audit::snapshot(&existing)?;

        let mut active: customer::ActiveModel = existing.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        audit::record(
            &txn,
            "customers",
            customer_id,
            AuditAction::SoftDelete,
            Some(old_snapshot),
            Some(audit::snapshot(&updated)?),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(customer_id = %customer_id, "customer soft-deleted");
        Ok(())
    }

    /// Retrieves a customer by ID (non-deleted only).
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<customer::Model>, ServiceError> {
        let db = &*self.db_pool;

        let found = CustomerEntity::find_by_id(customer_id)
            .one(db)
            .await?
            .filter(|c| !c.is_deleted);

        Ok(found)
    }

    /// Lists customers with pagination.
    #[instrument(skip(self))]
    pub async fn list_customers(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<CustomerListResponse, ServiceError> {
        let db = &*self.db_pool;

        let paginator = CustomerEntity::find()
            .filter(customer::Column::IsDeleted.eq(false))
            .order_by_desc(customer::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let customers = paginator.fetch_page(page.max(1) - 1).await?;

        Ok(CustomerListResponse {
            customers,
            total,
            page,
            per_page,
        })
    }
}

async fn find_active<C: sea_orm::ConnectionTrait>(
    conn: &C,
    customer_id: Uuid,
) -> Result<customer::Model, ServiceError> {
    CustomerEntity::find_by_id(customer_id)
        .one(conn)
        .await?
        .filter(|c| !c.is_deleted)
        .ok_or_else(|| ServiceError::NotFound(format!("Customer {} not found", customer_id)))
}

/// Rejects phone/email values already held by another non-deleted
/// customer.
async fn ensure_identity_available<C: sea_orm::ConnectionTrait>(
    conn: &C,
    phone: &str,
    email: &str,
    exclude: Option<Uuid>,
) -> Result<(), ServiceError> {
    let mut query = CustomerEntity::find()
        .filter(customer::Column::IsDeleted.eq(false))
        .filter(
            customer::Column::Phone
                .eq(phone)
                .or(customer::Column::Email.eq(email)),
        );

    if let Some(id) = exclude {
        query = query.filter(customer::Column::Id.ne(id));
    }

    if let Some(existing) = query.one(conn).await? {
        let field = if existing.phone == phone { "phone" } else { "email" };
        return Err(ServiceError::DuplicateIdentity(format!(
            "A customer with this {} already exists",
            field
        )));
    }

    Ok(())
}
