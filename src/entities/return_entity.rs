use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(serialize_all = "snake_case")]
pub enum ReturnReason {
    #[sea_orm(string_value = "damaged")]
    Damaged,
    #[sea_orm(string_value = "print_defect")]
    PrintDefect,
    #[sea_orm(string_value = "color_mismatch")]
    ColorMismatch,
    #[sea_orm(string_value = "wrong_item")]
    WrongItem,
    #[sea_orm(string_value = "other")]
    Other,
}

/// How a return is settled with the customer.
#[derive(
    Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(serialize_all = "snake_case")]
pub enum SettlementKind {
    /// Cash refunded to the customer.
    #[sea_orm(string_value = "refund")]
    Refund,
    /// Credit applied against an invoice's outstanding balance;
    /// `invoice_id` names the target invoice.
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
}

/// A customer return against a delivered order item.
///
/// Return quantity never exceeds what was actually shipped (delivered
/// minus prior returns). Settlement is a tagged choice: a cash refund,
/// or an adjustment applied to a specific invoice's outstanding balance.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "returns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_item_id: Uuid,
    pub quantity: i32,
    pub reason: ReturnReason,
    pub settlement_kind: SettlementKind,
    pub settlement_amount: Decimal,
    /// Set only for `SettlementKind::Adjustment`.
    pub invoice_id: Option<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order_item::Entity",
        from = "Column::OrderItemId",
        to = "super::order_item::Column::Id"
    )]
    OrderItem,
    #[sea_orm(
        belongs_to = "super::invoice::Entity",
        from = "Column::InvoiceId",
        to = "super::invoice::Column::Id"
    )]
    Invoice,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
