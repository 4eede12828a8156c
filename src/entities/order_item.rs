use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Material categories the shop prints on.
#[derive(
    Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(serialize_all = "snake_case")]
pub enum MaterialType {
    #[sea_orm(string_value = "saree")]
    Saree,
    #[sea_orm(string_value = "dupatta")]
    Dupatta,
    #[sea_orm(string_value = "blouse_piece")]
    BlousePiece,
    #[sea_orm(string_value = "dress_material")]
    DressMaterial,
    #[sea_orm(string_value = "fabric_roll")]
    FabricRoll,
    #[sea_orm(string_value = "other")]
    Other,
}

/// Production stages an order item passes through, strictly in order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(serialize_all = "snake_case")]
pub enum ProductionStage {
    #[sea_orm(string_value = "pre_treatment")]
    PreTreatment,
    #[sea_orm(string_value = "printing")]
    Printing,
    #[sea_orm(string_value = "post_process")]
    PostProcess,
}

impl ProductionStage {
    /// The single legal next stage, or `None` from the terminal stage.
    pub fn successor(self) -> Option<ProductionStage> {
        match self {
            ProductionStage::PreTreatment => Some(ProductionStage::Printing),
            ProductionStage::Printing => Some(ProductionStage::PostProcess),
            ProductionStage::PostProcess => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProductionStage::PostProcess)
    }
}

/// One line of a customer order, tracked individually through production.
///
/// Conservation invariant: `quantity` minus the sum of non-deleted
/// challan-item quantities and non-deleted return quantities referencing
/// this row never goes negative. Writes that would break it are rejected
/// before any row is touched.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub material_type: MaterialType,
    pub description: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub production_stage: ProductionStage,
    /// Stamped only on entry into `post_process`.
    pub stage_completed_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    #[sea_orm(has_many = "super::challan_item::Entity")]
    ChallanItems,
    #[sea_orm(has_many = "super::return_entity::Entity")]
    Returns,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::challan_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChallanItems.def()
    }
}

impl Related<super::return_entity::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Returns.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;

        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }

        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(Some(now));
        }

        Ok(active_model)
    }
}
