use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Link consolidating a delivered challan into an invoice.
///
/// `challan_amount` is a snapshot of the challan's value at link time, so
/// issued invoices stay stable even if upstream prices are corrected
/// later. At most one non-deleted link may exist per challan.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoice_challans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub challan_id: Uuid,
    pub challan_amount: Decimal,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invoice::Entity",
        from = "Column::InvoiceId",
        to = "super::invoice::Column::Id"
    )]
    Invoice,
    #[sea_orm(
        belongs_to = "super::challan::Entity",
        from = "Column::ChallanId",
        to = "super::challan::Column::Id"
    )]
    Challan,
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

impl Related<super::challan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Challan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
