use crate::{
    db::DbPool,
    entities::audit_log::{self, AuditAction, Entity as AuditLogEntity},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Appends an audit row inside the caller's transaction.
///
/// Called from every mutating service operation so the audit trail
/// commits atomically with the change it describes.
pub async fn record<C: ConnectionTrait>(
    conn: &C,
    table_name: &str,
    record_id: Uuid,
    action: AuditAction,
    old_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
) -> Result<(), ServiceError> {
    let entry = audit_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        table_name: Set(table_name.to_string()),
        record_id: Set(record_id),
        action: Set(action),
        old_values: Set(old_values),
        new_values: Set(new_values),
        created_at: Set(Utc::now()),
    };

    entry.insert(conn).await?;
    Ok(())
}

/// Serializes a model for an audit snapshot.
pub fn snapshot<T: serde::Serialize>(model: &T) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(model)
        .map_err(|e| ServiceError::InternalError(format!("Failed to serialize audit snapshot: {}", e)))
}

/// Read side of the audit trail.
#[derive(Clone)]
pub struct AuditService {
    db_pool: Arc<DbPool>,
}

impl AuditService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Returns the mutation history for a record, oldest first.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        table_name: &str,
        record_id: Uuid,
    ) -> Result<Vec<audit_log::Model>, ServiceError> {
        let db = &*self.db_pool;

        let entries = AuditLogEntity::find()
            .filter(audit_log::Column::TableName.eq(table_name))
            .filter(audit_log::Column::RecordId.eq(record_id))
            .order_by_asc(audit_log::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(entries)
    }
}
