use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        customer,
        job::{
            self, JobStage, MaterialLine, MaterialLines, PaymentEntry, PaymentLedger, ServiceItem,
            ServiceItems,
        },
        vehicle,
    },
    errors::ServiceError,
    services::{
        customers::{self, VehicleRef},
        inventory, invoicing,
        notifications::NotificationDispatcher,
        payments,
        pricing::{CostRequest, PricingCatalog, INTAKE_TAX_RATE},
        technicians,
    },
};

const STAGE_LOCKED_BY_INVOICE: &str = "Cannot change stage after invoice has been created";

/// Job opened directly with a known cost breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub customer_id: Uuid,
    pub vehicle: VehicleRef,
    pub technician_id: Option<Uuid>,
    pub service_type: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub service_cost: Decimal,
    #[serde(default)]
    pub labor_cost: Decimal,
    #[serde(default)]
    pub service_items: Vec<ServiceItem>,
}

/// Customer service intake: services are priced from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceIntakeRequest {
    pub customer_id: Uuid,
    pub vehicle: VehicleRef,
    pub technician_id: Option<Uuid>,
    pub notes: Option<String>,
    pub cost: CostRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobPaymentInput {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 50))]
    pub mode: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequest {
    pub inventory_id: Uuid,
    pub quantity: i32,
}

/// Fields written when a job row is created
pub(crate) struct NewJob {
    pub technician_id: Option<Uuid>,
    pub service_type: Option<String>,
    pub notes: Option<String>,
    pub service_cost: Decimal,
    pub labor_cost: Decimal,
    pub service_items: Vec<ServiceItem>,
    pub quoted_items: Vec<ServiceItem>,
    pub total_amount: Decimal,
}

/// Service order pipeline: creation, stage machine, payments and material use.
#[derive(Clone)]
pub struct JobService {
    db: Arc<DbPool>,
    notifier: Arc<NotificationDispatcher>,
    pricing: Arc<PricingCatalog>,
}

impl JobService {
    pub fn new(
        db: Arc<DbPool>,
        notifier: Arc<NotificationDispatcher>,
        pricing: Arc<PricingCatalog>,
    ) -> Self {
        Self {
            db,
            notifier,
            pricing,
        }
    }

    /// Opens a job in `New Lead`. The total is service cost, service items and labour with 18% tax.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_job(&self, input: CreateJob) -> Result<job::Model, ServiceError> {
        if input.service_cost < Decimal::ZERO
            || input.labor_cost < Decimal::ZERO
            || input.service_items.iter().any(|item| item.cost < Decimal::ZERO)
        {
            return Err(ServiceError::ValidationError(
                "Service, item and labor costs must not be negative".to_string(),
            ));
        }
        let items_total: Decimal = input.service_items.iter().map(|item| item.cost).sum();
        let subtotal = input.service_cost + items_total + input.labor_cost;
        let total_amount = subtotal + subtotal * INTAKE_TAX_RATE / dec!(100);

        let txn = self.db.begin().await?;
        let customer = customers::find_customer(&txn, input.customer_id).await?;
        let vehicle = customers::resolve_vehicle(&txn, customer.id, input.vehicle).await?;
        if let Some(technician_id) = input.technician_id {
            technicians::find_technician(&txn, technician_id).await?;
        }
        let job = insert_job(
            &txn,
            &customer,
            &vehicle,
            NewJob {
                technician_id: input.technician_id,
                service_type: input.service_type,
                notes: input.notes,
                service_cost: input.service_cost,
                labor_cost: input.labor_cost,
                service_items: input.service_items,
                quoted_items: Vec::new(),
                total_amount,
            },
        )
        .await?;
        txn.commit().await?;

        counter!("garage.jobs.created", 1);
        self.notifier.notify_job_stage(&job, &customer.phone).await;
        Ok(job)
    }

    /// Prices an intake form from the catalog and opens the job.
    ///
    /// Refuses when neither the discounted services nor the labour cost anything.
    /// The PPF choice is remembered on the vehicle and the service on the customer.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_job_from_intake(
        &self,
        request: ServiceIntakeRequest,
    ) -> Result<job::Model, ServiceError> {
        let breakdown = self
            .pricing
            .compute(&request.cost)
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if !breakdown.is_billable() {
            return Err(ServiceError::ValidationError(
                "Nothing billable: service cost after discount and labor cost are both zero"
                    .to_string(),
            ));
        }

        let service_label = breakdown
            .service_items
            .iter()
            .map(|item| item.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let service_label = if service_label.is_empty() {
            "Labor".to_string()
        } else {
            service_label
        };

        let txn = self.db.begin().await?;
        let customer = customers::find_customer(&txn, request.customer_id).await?;
        let mut vehicle = customers::resolve_vehicle(&txn, customer.id, request.vehicle).await?;
        if let Some(technician_id) = request.technician_id {
            technicians::find_technician(&txn, technician_id).await?;
        }

        if let Some(ppf) = &request.cost.ppf {
            vehicle = customers::cache_ppf_on_vehicle(
                &txn,
                vehicle,
                ppf.category.clone(),
                ppf.vehicle_type.clone(),
                ppf.warranty.clone(),
            )
            .await?;
        }
        let customer = customers::cache_service_on_customer(
            &txn,
            customer,
            service_label.clone(),
            breakdown.discounted_service_cost,
        )
        .await?;

        let job = insert_job(
            &txn,
            &customer,
            &vehicle,
            NewJob {
                technician_id: request.technician_id,
                service_type: Some(service_label),
                notes: request.notes,
                service_cost: breakdown.discounted_service_cost,
                labor_cost: breakdown.labor_cost,
                service_items: Vec::new(),
                quoted_items: breakdown.service_items,
                total_amount: breakdown.total_amount,
            },
        )
        .await?;
        txn.commit().await?;

        counter!("garage.jobs.created", 1);
        info!(job_id = %job.id, total = %job.total_amount, "Job created from intake");
        self.notifier.notify_job_stage(&job, &customer.phone).await;
        Ok(job)
    }

    /// Moves a job to `stage`.
    ///
    /// Refused with a conflict once the job has an invoice, or when the job is
    /// already completed or cancelled. Entering `Completed` generates the invoice
    /// in the same transaction.
    #[instrument(skip(self))]
    pub async fn update_job_stage(
        &self,
        job_id: Uuid,
        stage: JobStage,
    ) -> Result<job::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let current = find_job(&txn, job_id).await?;

        if invoicing::invoice_for_job(&txn, job_id).await?.is_some() {
            warn!(job_id = %job_id, requested = %stage, "Stage change refused, job already invoiced");
            return Err(ServiceError::Conflict(STAGE_LOCKED_BY_INVOICE.to_string()));
        }
        if current.stage.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "Job {} is {} and cannot move to {}",
                job_id, current.stage, stage
            )));
        }
        if current.stage == stage {
            return Ok(current);
        }

        let updated = save_job(
            &txn,
            &current,
            job::ActiveModel {
                stage: Set(stage),
                ..Default::default()
            },
        )
        .await?;

        let invoice = if stage == JobStage::Completed {
            let (invoice, _) = invoicing::generate_for_job(
                &txn,
                &updated,
                invoicing::DEFAULT_TAX_RATE,
                Decimal::ZERO,
            )
            .await?;
            Some(invoice)
        } else {
            None
        };

        let customer = customers::find_customer(&txn, updated.customer_id).await?;
        txn.commit().await?;

        counter!("garage.jobs.stage_changes", 1);
        if let Some(invoice) = invoice {
            counter!("garage.invoices.generated", 1);
            info!(job_id = %job_id, invoice_number = %invoice.invoice_number, "Job completed and invoiced");
        }
        info!(job_id = %job_id, from = %current.stage, to = %stage, "Job stage updated");

        self.notifier.notify_job_stage(&updated, &customer.phone).await;
        Ok(updated)
    }

    /// Applies a payment to the job and mirrors it onto the job's invoice.
    ///
    /// The job side is capped at the job's remaining balance and the invoice side
    /// at the invoice's. A fully paid job is returned unchanged.
    #[instrument(skip(self, payment), fields(amount = %payment.amount))]
    pub async fn add_payment_to_job_with_invoice_sync(
        &self,
        job_id: Uuid,
        payment: JobPaymentInput,
    ) -> Result<job::Model, ServiceError> {
        payments::ensure_positive_amount(payment.amount)?;
        payment.validate()?;

        let txn = self.db.begin().await?;
        let current = find_job(&txn, job_id).await?;
        let applied = payments::capped_amount(payment.amount, current.remaining_balance());
        if applied <= Decimal::ZERO {
            info!(job_id = %job_id, "Job already settled, nothing to apply");
            return Ok(current);
        }

        let updated = apply_job_payment(&txn, &current, applied, payment.mode, payment.notes).await?;

        let mut invoice_applied = Decimal::ZERO;
        if let Some(invoice) = invoicing::invoice_for_job(&txn, job_id).await? {
            invoice_applied = payments::capped_amount(applied, invoice.remaining_balance());
            if invoice_applied > Decimal::ZERO {
                invoicing::apply_invoice_payment(&txn, &invoice, invoice_applied).await?;
            }
        }
        txn.commit().await?;

        counter!("garage.payments.job", 1);
        info!(
            job_id = %job_id,
            %applied,
            %invoice_applied,
            status = %updated.payment_status,
            "Job payment recorded"
        );
        Ok(updated)
    }

    /// Consumes inventory for a job. All lines succeed or nothing changes.
    #[instrument(skip(self, materials), fields(lines = materials.len()))]
    pub async fn add_materials_to_job(
        &self,
        job_id: Uuid,
        materials: Vec<MaterialRequest>,
    ) -> Result<job::Model, ServiceError> {
        if materials.is_empty() {
            return Err(ServiceError::ValidationError(
                "At least one material line is required".to_string(),
            ));
        }
        if let Some(bad) = materials.iter().find(|m| m.quantity <= 0) {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for inventory item {} must be positive",
                bad.inventory_id
            )));
        }

        let txn = self.db.begin().await?;
        let current = find_job(&txn, job_id).await?;
        if current.stage.is_terminal() {
            return Err(ServiceError::ValidationError(format!(
                "Cannot add materials to a {} job",
                current.stage
            )));
        }

        // Repeated items are checked against their combined quantity.
        let mut requested: BTreeMap<Uuid, i32> = BTreeMap::new();
        for line in &materials {
            let entry = requested.entry(line.inventory_id).or_default();
            *entry = entry.checked_add(line.quantity).ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Combined quantity for inventory item {} is too large",
                    line.inventory_id
                ))
            })?;
        }

        let mut lines = Vec::with_capacity(materials.len());
        for line in &materials {
            let item = inventory::find_item(&txn, line.inventory_id).await?;
            let needed = requested.get(&item.id).copied().unwrap_or(line.quantity);
            if item.quantity < needed {
                return Err(ServiceError::InsufficientStock(format!(
                    "{} has {} {} in stock, {} requested",
                    item.name, item.quantity, item.unit, needed
                )));
            }
            lines.push(MaterialLine {
                inventory_id: item.id,
                name: item.name.clone(),
                quantity: line.quantity,
                cost: item.price * Decimal::from(line.quantity),
            });
        }

        let mut all_materials = current.materials.0.clone();
        all_materials.extend(lines);
        let materials = MaterialLines(all_materials);
        let total_amount =
            materials.total() + current.service_items.total() + current.service_cost;
        if total_amount < current.paid_amount {
            return Err(ServiceError::ValidationError(format!(
                "Recomputed total {} would fall below the amount already paid {}",
                total_amount, current.paid_amount
            )));
        }

        let updated = save_job(
            &txn,
            &current,
            job::ActiveModel {
                materials: Set(materials),
                total_amount: Set(total_amount),
                payment_status: Set(payments::payment_status(current.paid_amount, total_amount)),
                ..Default::default()
            },
        )
        .await?;

        for (inventory_id, quantity) in &requested {
            if !inventory::decrement_stock(&txn, *inventory_id, *quantity).await? {
                error!(
                    job_id = %job_id,
                    inventory_id = %inventory_id,
                    quantity,
                    "Stock decrement failed after job update, rolling back"
                );
                counter!("garage.inventory.decrement_failures", 1);
                return Err(ServiceError::InsufficientStock(format!(
                    "Stock for inventory item {} changed while consuming materials",
                    inventory_id
                )));
            }
        }
        txn.commit().await?;

        counter!("garage.jobs.material_batches", 1);
        info!(job_id = %job_id, total = %updated.total_amount, "Materials added to job");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn assign_technician(
        &self,
        job_id: Uuid,
        technician_id: Uuid,
    ) -> Result<job::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let current = find_job(&txn, job_id).await?;
        technicians::find_technician(&txn, technician_id).await?;
        if current.stage.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "Cannot assign a technician to a {} job",
                current.stage
            )));
        }
        let updated = save_job(
            &txn,
            &current,
            job::ActiveModel {
                technician_id: Set(Some(technician_id)),
                ..Default::default()
            },
        )
        .await?;
        txn.commit().await?;
        Ok(updated)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<job::Model, ServiceError> {
        find_job(&*self.db, id).await
    }

    pub async fn list_jobs_by_stage(&self, stage: JobStage) -> Result<Vec<job::Model>, ServiceError> {
        let jobs = job::Entity::find()
            .filter(job::Column::Stage.eq(stage))
            .order_by_asc(job::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(jobs)
    }

    pub async fn list_jobs_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<job::Model>, ServiceError> {
        let jobs = job::Entity::find()
            .filter(job::Column::CustomerId.eq(customer_id))
            .order_by_desc(job::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(jobs)
    }
}

pub(crate) async fn find_job<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<job::Model, ServiceError> {
    job::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Job", id))
}

/// Writes a new job in `New Lead` with denormalised customer and vehicle details.
pub(crate) async fn insert_job<C: ConnectionTrait>(
    conn: &C,
    customer: &customer::Model,
    vehicle: &vehicle::Model,
    new_job: NewJob,
) -> Result<job::Model, ServiceError> {
    let now = Utc::now();
    let job = job::ActiveModel {
        id: Set(Uuid::new_v4()),
        customer_id: Set(customer.id),
        vehicle_id: Set(vehicle.id),
        vehicle_index: Set(vehicle.position),
        customer_name: Set(customer.name.clone()),
        vehicle_name: Set(vehicle.display_name()),
        plate_number: Set(vehicle.plate_number.clone()),
        technician_id: Set(new_job.technician_id),
        stage: Set(JobStage::NewLead),
        service_type: Set(new_job.service_type),
        notes: Set(new_job.notes),
        service_cost: Set(new_job.service_cost),
        labor_cost: Set(new_job.labor_cost),
        service_items: Set(ServiceItems(new_job.service_items)),
        quoted_items: Set(ServiceItems(new_job.quoted_items)),
        materials: Set(MaterialLines::default()),
        total_amount: Set(new_job.total_amount),
        paid_amount: Set(Decimal::ZERO),
        payment_status: Set(payments::payment_status(Decimal::ZERO, new_job.total_amount)),
        payments: Set(PaymentLedger::default()),
        version: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    info!(job_id = %job.id, customer_id = %customer.id, vehicle_id = %vehicle.id, "Job created");
    Ok(job)
}

/// Conditional update on `(id, version)`; bumps the version and timestamp.
async fn save_job<C: ConnectionTrait>(
    conn: &C,
    current: &job::Model,
    mut changes: job::ActiveModel,
) -> Result<job::Model, ServiceError> {
    changes.version = Set(current.version + 1);
    changes.updated_at = Set(Utc::now());

    let result = job::Entity::update_many()
        .set(changes)
        .filter(job::Column::Id.eq(current.id))
        .filter(job::Column::Version.eq(current.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(job_id = %current.id, version = current.version, "Job changed concurrently");
        return Err(ServiceError::ConcurrentModification(current.id));
    }
    find_job(conn, current.id).await
}

/// Adds `amount` to the job's paid amount and appends a ledger entry for it.
pub(crate) async fn apply_job_payment<C: ConnectionTrait>(
    conn: &C,
    current: &job::Model,
    amount: Decimal,
    mode: String,
    notes: Option<String>,
) -> Result<job::Model, ServiceError> {
    let paid_amount = current.paid_amount + amount;
    let mut ledger = current.payments.0.clone();
    ledger.push(PaymentEntry {
        amount,
        mode,
        notes,
        date: Utc::now(),
    });

    save_job(
        conn,
        current,
        job::ActiveModel {
            paid_amount: Set(paid_amount),
            payment_status: Set(payments::payment_status(paid_amount, current.total_amount)),
            payments: Set(PaymentLedger(ledger)),
            ..Default::default()
        },
    )
    .await
}
