use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A delivery challan: the note that accompanies goods handed over to a
/// customer. Consolidates completed order items, possibly partially.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "challans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub challan_number: String,
    pub customer_id: Uuid,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(has_many = "super::challan_item::Entity")]
    ChallanItems,
    #[sea_orm(has_many = "super::invoice_challan::Entity")]
    InvoiceChallans,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::challan_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChallanItems.def()
    }
}

impl Related<super::invoice_challan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InvoiceChallans.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
