use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        customer::{self, CustomerStatus},
        vehicle,
    },
    errors::ServiceError,
    services::notifications::NotificationDispatcher,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct NewVehicle {
    #[serde(default)]
    pub make: String,
    #[validate(length(min = 1, max = 100))]
    pub model: String,
    #[serde(default)]
    pub year: String,
    #[validate(length(min = 1, max = 32))]
    pub plate_number: String,
    #[serde(default)]
    pub color: String,
    pub vin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterCustomer {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub vehicles: Vec<NewVehicle>,
}

/// Customer plus its vehicles in position order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerWithVehicles {
    pub customer: customer::Model,
    pub vehicles: Vec<vehicle::Model>,
}

#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DbPool>,
    notifier: Arc<NotificationDispatcher>,
}

impl CustomerService {
    pub fn new(db: Arc<DbPool>, notifier: Arc<NotificationDispatcher>) -> Self {
        Self { db, notifier }
    }

    #[instrument(skip(self, input), fields(phone = %input.phone))]
    pub async fn register_customer(
        &self,
        input: RegisterCustomer,
    ) -> Result<CustomerWithVehicles, ServiceError> {
        input.validate()?;
        for vehicle in &input.vehicles {
            vehicle.validate()?;
        }

        let txn = self.db.begin().await?;
        let created = insert_customer(&txn, input).await?;
        txn.commit().await?;

        info!(customer_id = %created.customer.id, "Customer registered");
        Ok(created)
    }

    pub async fn get_customer(&self, id: Uuid) -> Result<customer::Model, ServiceError> {
        find_customer(&*self.db, id).await
    }

    pub async fn list_vehicles(&self, customer_id: Uuid) -> Result<Vec<vehicle::Model>, ServiceError> {
        find_customer(&*self.db, customer_id).await?;
        vehicles_of(&*self.db, customer_id).await
    }

    /// Appends a vehicle after the customer's existing ones. Earlier positions never move.
    #[instrument(skip(self, input))]
    pub async fn add_vehicle(
        &self,
        customer_id: Uuid,
        input: NewVehicle,
    ) -> Result<vehicle::Model, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        find_customer(&txn, customer_id).await?;
        let vehicle = append_vehicle(&txn, customer_id, input).await?;
        txn.commit().await?;

        info!(vehicle_id = %vehicle.id, position = vehicle.position, "Vehicle added");
        Ok(vehicle)
    }

    /// Case-insensitive substring match on name, phone or any vehicle plate.
    #[instrument(skip(self))]
    pub async fn search_customers(&self, term: &str) -> Result<Vec<customer::Model>, ServiceError> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", term);
        let db = &*self.db;

        let plate_owners: Vec<Uuid> = vehicle::Entity::find()
            .select_only()
            .column(vehicle::Column::CustomerId)
            .filter(Expr::expr(Func::lower(Expr::col(vehicle::Column::PlateNumber))).like(&pattern))
            .into_tuple()
            .all(db)
            .await?;

        let customers = customer::Entity::find()
            .filter(
                Condition::any()
                    .add(Expr::expr(Func::lower(Expr::col(customer::Column::Name))).like(&pattern))
                    .add(customer::Column::Phone.contains(&term))
                    .add(customer::Column::Id.is_in(plate_owners)),
            )
            .order_by_asc(customer::Column::Name)
            .all(db)
            .await?;
        Ok(customers)
    }

    pub async fn find_by_phone(&self, phone: &str) -> Result<Option<customer::Model>, ServiceError> {
        find_customer_by_phone(&*self.db, phone).await
    }

    /// Persists the new status and sends the matching status message.
    #[instrument(skip(self))]
    pub async fn update_customer_status(
        &self,
        id: Uuid,
        status: CustomerStatus,
        service: Option<String>,
    ) -> Result<customer::Model, ServiceError> {
        let current = find_customer(&*self.db, id).await?;
        let mut active: customer::ActiveModel = current.into();
        active.status = Set(status);
        if let Some(service) = service {
            active.service = Set(Some(service));
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(customer_id = %id, status = %status, "Customer status updated");
        self.notifier.notify_customer_status(&updated).await;
        Ok(updated)
    }
}

pub(crate) async fn find_customer<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<customer::Model, ServiceError> {
    customer::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Customer", id))
}

pub(crate) async fn find_customer_by_phone<C: ConnectionTrait>(
    conn: &C,
    phone: &str,
) -> Result<Option<customer::Model>, ServiceError> {
    let found = customer::Entity::find()
        .filter(customer::Column::Phone.eq(phone.trim()))
        .order_by_asc(customer::Column::CreatedAt)
        .one(conn)
        .await?;
    Ok(found)
}

pub(crate) async fn vehicles_of<C: ConnectionTrait>(
    conn: &C,
    customer_id: Uuid,
) -> Result<Vec<vehicle::Model>, ServiceError> {
    let vehicles = vehicle::Entity::find()
        .filter(vehicle::Column::CustomerId.eq(customer_id))
        .order_by_asc(vehicle::Column::Position)
        .all(conn)
        .await?;
    Ok(vehicles)
}

/// How a caller points at one of a customer's vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleRef {
    Id(Uuid),
    Position(i32),
}

pub(crate) async fn resolve_vehicle<C: ConnectionTrait>(
    conn: &C,
    customer_id: Uuid,
    vehicle: VehicleRef,
) -> Result<vehicle::Model, ServiceError> {
    let query = vehicle::Entity::find().filter(vehicle::Column::CustomerId.eq(customer_id));
    let found = match vehicle {
        VehicleRef::Id(id) => query.filter(vehicle::Column::Id.eq(id)).one(conn).await?,
        VehicleRef::Position(position) => {
            query
                .filter(vehicle::Column::Position.eq(position))
                .one(conn)
                .await?
        }
    };
    found.ok_or_else(|| match vehicle {
        VehicleRef::Id(id) => ServiceError::not_found("Vehicle", id),
        VehicleRef::Position(position) => ServiceError::NotFound(format!(
            "Customer {} has no vehicle at position {}",
            customer_id, position
        )),
    })
}

async fn next_vehicle_position<C: ConnectionTrait>(
    conn: &C,
    customer_id: Uuid,
) -> Result<i32, ServiceError> {
    let last: Option<i32> = vehicle::Entity::find()
        .select_only()
        .column(vehicle::Column::Position)
        .filter(vehicle::Column::CustomerId.eq(customer_id))
        .order_by_desc(vehicle::Column::Position)
        .into_tuple()
        .one(conn)
        .await?;
    Ok(last.map_or(0, |p| p + 1))
}

pub(crate) async fn append_vehicle<C: ConnectionTrait>(
    conn: &C,
    customer_id: Uuid,
    input: NewVehicle,
) -> Result<vehicle::Model, ServiceError> {
    let position = next_vehicle_position(conn, customer_id).await?;
    insert_vehicle(conn, customer_id, position, input).await
}

async fn insert_vehicle<C: ConnectionTrait>(
    conn: &C,
    customer_id: Uuid,
    position: i32,
    input: NewVehicle,
) -> Result<vehicle::Model, ServiceError> {
    let vehicle = vehicle::ActiveModel {
        id: Set(Uuid::new_v4()),
        customer_id: Set(customer_id),
        position: Set(position),
        make: Set(input.make.trim().to_string()),
        model: Set(input.model.trim().to_string()),
        year: Set(input.year.trim().to_string()),
        plate_number: Set(input.plate_number.trim().to_uppercase()),
        color: Set(input.color.trim().to_string()),
        vin: Set(input.vin),
        ppf_category: Set(None),
        ppf_vehicle_type: Set(None),
        ppf_warranty: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(vehicle)
}

/// Inserts a customer with status `Inquired` and its vehicles at positions 0, 1, ...
pub(crate) async fn insert_customer<C: ConnectionTrait>(
    conn: &C,
    input: RegisterCustomer,
) -> Result<CustomerWithVehicles, ServiceError> {
    let now = Utc::now();
    let customer = customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(input.name.trim().to_string()),
        phone: Set(input.phone.trim().to_string()),
        email: Set(input.email),
        address: Set(input.address),
        status: Set(CustomerStatus::Inquired),
        service: Set(None),
        service_cost: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut vehicles = Vec::with_capacity(input.vehicles.len());
    for (position, vehicle) in input.vehicles.into_iter().enumerate() {
        vehicles.push(insert_vehicle(conn, customer.id, position as i32, vehicle).await?);
    }

    Ok(CustomerWithVehicles { customer, vehicles })
}

/// Remembers the service sold at intake on the customer record.
pub(crate) async fn cache_service_on_customer<C: ConnectionTrait>(
    conn: &C,
    customer: customer::Model,
    service: String,
    service_cost: Decimal,
) -> Result<customer::Model, ServiceError> {
    let mut active: customer::ActiveModel = customer.into();
    active.service = Set(Some(service));
    active.service_cost = Set(Some(service_cost));
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

/// Remembers the PPF choice on the vehicle so the next intake can prefill it.
pub(crate) async fn cache_ppf_on_vehicle<C: ConnectionTrait>(
    conn: &C,
    vehicle: vehicle::Model,
    category: String,
    vehicle_type: String,
    warranty: String,
) -> Result<vehicle::Model, ServiceError> {
    let mut active: vehicle::ActiveModel = vehicle.into();
    active.ppf_category = Set(Some(category));
    active.ppf_vehicle_type = Set(Some(vehicle_type));
    active.ppf_warranty = Set(Some(warranty));
    Ok(active.update(conn).await?)
}
