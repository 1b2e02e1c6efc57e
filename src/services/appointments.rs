use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        appointment::{self, AppointmentStatus},
        job,
    },
    errors::ServiceError,
    services::{
        customers::{self, NewVehicle, RegisterCustomer, VehicleRef},
        jobs::{self, NewJob},
        notifications::NotificationDispatcher,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAppointment {
    #[validate(length(min = 1, max = 200))]
    pub customer_name: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub vehicle_info: String,
    #[validate(length(min = 1, max = 32))]
    pub plate_number: String,
    #[validate(length(min = 1, max = 100))]
    pub service_type: String,
    pub date: NaiveDate,
    #[validate(length(min = 1, max = 50))]
    pub time_slot: String,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct AppointmentService {
    db: Arc<DbPool>,
    notifier: Arc<NotificationDispatcher>,
}

impl AppointmentService {
    pub fn new(db: Arc<DbPool>, notifier: Arc<NotificationDispatcher>) -> Self {
        Self { db, notifier }
    }

    #[instrument(skip(self, input), fields(date = %input.date))]
    pub async fn create_appointment(
        &self,
        input: CreateAppointment,
    ) -> Result<appointment::Model, ServiceError> {
        input.validate()?;
        let now = Utc::now();
        let appointment = appointment::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_name: Set(input.customer_name.trim().to_string()),
            phone: Set(input.phone.trim().to_string()),
            vehicle_info: Set(input.vehicle_info.trim().to_string()),
            plate_number: Set(input.plate_number.trim().to_uppercase()),
            service_type: Set(input.service_type.trim().to_string()),
            date: Set(input.date),
            time_slot: Set(input.time_slot),
            notes: Set(input.notes),
            status: Set(AppointmentStatus::Scheduled),
            job_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(appointment_id = %appointment.id, "Appointment booked");
        Ok(appointment)
    }

    pub async fn get_appointment(&self, id: Uuid) -> Result<appointment::Model, ServiceError> {
        find_appointment(&*self.db, id).await
    }

    pub async fn list_appointments_on(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<appointment::Model>, ServiceError> {
        let appointments = appointment::Entity::find()
            .filter(appointment::Column::Date.eq(date))
            .order_by_asc(appointment::Column::TimeSlot)
            .all(&*self.db)
            .await?;
        Ok(appointments)
    }

    /// Converted is reached only through [`Self::convert_appointment_to_job`] and never left.
    #[instrument(skip(self))]
    pub async fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<appointment::Model, ServiceError> {
        if status == AppointmentStatus::Converted {
            return Err(ServiceError::ValidationError(
                "Appointments become Converted only through job conversion".to_string(),
            ));
        }
        let current = find_appointment(&*self.db, id).await?;
        if current.status == AppointmentStatus::Converted {
            return Err(ServiceError::Conflict(format!(
                "Appointment {} has already been converted",
                id
            )));
        }

        let mut active: appointment::ActiveModel = current.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Turns a booking into a `New Lead` job on the customer's first vehicle.
    ///
    /// The customer is matched by exact phone number; an unknown phone creates a
    /// customer with one vehicle built from the booking. Customer creation, job
    /// creation and the appointment update commit together.
    #[instrument(skip(self))]
    pub async fn convert_appointment_to_job(
        &self,
        appointment_id: Uuid,
    ) -> Result<job::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let appointment = find_appointment(&txn, appointment_id).await?;
        match appointment.status {
            AppointmentStatus::Converted => {
                return Err(ServiceError::Conflict(format!(
                    "Appointment {} has already been converted",
                    appointment_id
                )))
            }
            AppointmentStatus::Cancelled => {
                return Err(ServiceError::Conflict(format!(
                    "Appointment {} was cancelled",
                    appointment_id
                )))
            }
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed => {}
        }

        let customer = match customers::find_customer_by_phone(&txn, &appointment.phone).await? {
            Some(existing) => existing,
            None => {
                let created = customers::insert_customer(
                    &txn,
                    RegisterCustomer {
                        name: appointment.customer_name.clone(),
                        phone: appointment.phone.clone(),
                        email: None,
                        address: None,
                        vehicles: vec![booked_vehicle(&appointment)],
                    },
                )
                .await?;
                info!(customer_id = %created.customer.id, "Customer created from appointment");
                created.customer
            }
        };
        let vehicle = match customers::resolve_vehicle(&txn, customer.id, VehicleRef::Position(0)).await
        {
            Ok(vehicle) => vehicle,
            Err(ServiceError::NotFound(_)) => {
                customers::append_vehicle(&txn, customer.id, booked_vehicle(&appointment)).await?
            }
            Err(e) => return Err(e),
        };

        let job = jobs::insert_job(
            &txn,
            &customer,
            &vehicle,
            NewJob {
                technician_id: None,
                service_type: Some(appointment.service_type.clone()),
                notes: Some(conversion_notes(&appointment)),
                service_cost: Decimal::ZERO,
                labor_cost: Decimal::ZERO,
                service_items: Vec::new(),
                quoted_items: Vec::new(),
                total_amount: Decimal::ZERO,
            },
        )
        .await?;

        let mut active: appointment::ActiveModel = appointment.into();
        active.status = Set(AppointmentStatus::Converted);
        active.job_id = Set(Some(job.id));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        txn.commit().await?;

        counter!("garage.appointments.converted", 1);
        info!(appointment_id = %appointment_id, job_id = %job.id, "Appointment converted to job");
        self.notifier.notify_job_stage(&job, &customer.phone).await;
        Ok(job)
    }
}

/// Vehicle synthesised from a booking: model and plate only.
fn booked_vehicle(appointment: &appointment::Model) -> NewVehicle {
    NewVehicle {
        model: appointment.vehicle_info.clone(),
        plate_number: appointment.plate_number.clone(),
        ..Default::default()
    }
}

/// `"<service type> - <notes>"`, or just the service type when there are no notes.
fn conversion_notes(appointment: &appointment::Model) -> String {
    match appointment.notes.as_deref().map(str::trim) {
        Some(notes) if !notes.is_empty() => format!("{} - {}", appointment.service_type, notes),
        _ => appointment.service_type.clone(),
    }
}

async fn find_appointment<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<appointment::Model, ServiceError> {
    appointment::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Appointment", id))
}
