use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-(kind, year) allocation counter for human-readable document
/// numbers. The row is locked for the duration of the allocating
/// transaction, which is what makes concurrent allocations unique.
/// Counters only ever increase; sequences are never reused, even when
/// the owning document row is later soft-deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sequence_counters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub kind: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub year: i32,
    pub value: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
