use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A customer's vehicle.
///
/// `position` is the order in which the vehicle was added to the customer and is
/// never reassigned; jobs reference vehicles by `id` and keep the position only
/// for display.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vehicles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub position: i32,
    pub make: String,
    pub model: String,
    pub year: String,
    #[sea_orm(indexed)]
    pub plate_number: String,
    pub color: String,
    #[sea_orm(nullable)]
    pub vin: Option<String>,
    #[sea_orm(nullable)]
    pub ppf_category: Option<String>,
    #[sea_orm(nullable)]
    pub ppf_vehicle_type: Option<String>,
    #[sea_orm(nullable)]
    pub ppf_warranty: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// "Make Model" with empty parts dropped
    pub fn display_name(&self) -> String {
        [self.make.trim(), self.model.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
