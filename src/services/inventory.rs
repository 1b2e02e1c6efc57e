use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{db::DbPool, entities::inventory_item, errors::ServiceError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInventoryItem {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[validate(range(min = 0))]
    pub quantity: i32,
    #[validate(length(min = 1, max = 32))]
    pub unit: String,
    #[validate(range(min = 0))]
    pub min_stock: i32,
    pub price: Decimal,
}

/// Stock ledger: item catalogue, direct adjustments and low-stock reporting.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn create_item(
        &self,
        input: CreateInventoryItem,
    ) -> Result<inventory_item::Model, ServiceError> {
        input.validate()?;
        if input.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Price must not be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let item = inventory_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            category: Set(input.category.trim().to_string()),
            quantity: Set(input.quantity),
            unit: Set(input.unit),
            min_stock: Set(input.min_stock),
            price: Set(input.price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(item_id = %item.id, name = %item.name, "Inventory item created");
        Ok(item)
    }

    pub async fn get_item(&self, id: Uuid) -> Result<inventory_item::Model, ServiceError> {
        find_item(&*self.db, id).await
    }

    pub async fn list_items(&self) -> Result<Vec<inventory_item::Model>, ServiceError> {
        let items = inventory_item::Entity::find()
            .order_by_asc(inventory_item::Column::Category)
            .order_by_asc(inventory_item::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Items at or below their minimum stock level.
    #[instrument(skip(self))]
    pub async fn low_stock_items(&self) -> Result<Vec<inventory_item::Model>, ServiceError> {
        let items = inventory_item::Entity::find()
            .filter(
                Expr::col(inventory_item::Column::Quantity)
                    .lte(Expr::col(inventory_item::Column::MinStock)),
            )
            .order_by_asc(inventory_item::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Adds `delta` to the item's quantity in a single statement.
    ///
    /// Negative results are allowed here; callers that need a floor check first.
    #[instrument(skip(self))]
    pub async fn adjust(&self, id: Uuid, delta: i32) -> Result<inventory_item::Model, ServiceError> {
        let db = &*self.db;
        let result = inventory_item::Entity::update_many()
            .col_expr(
                inventory_item::Column::Quantity,
                Expr::col(inventory_item::Column::Quantity).add(delta),
            )
            .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(inventory_item::Column::Id.eq(id))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("Inventory item", id));
        }

        let item = find_item(db, id).await?;
        counter!("garage.inventory.adjustments", 1);
        if item.quantity < 0 {
            warn!(item_id = %id, quantity = item.quantity, "Inventory went negative after adjustment");
        }
        info!(item_id = %id, delta, quantity = item.quantity, "Inventory adjusted");
        Ok(item)
    }
}

pub(crate) async fn find_item<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<inventory_item::Model, ServiceError> {
    inventory_item::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Inventory item", id))
}

/// Takes `quantity` out of stock only if enough is on hand. Returns whether the row changed.
pub(crate) async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let result = inventory_item::Entity::update_many()
        .col_expr(
            inventory_item::Column::Quantity,
            Expr::col(inventory_item::Column::Quantity).sub(quantity),
        )
        .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_item::Column::Id.eq(id))
        .filter(inventory_item::Column::Quantity.gte(quantity))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}
