use chrono::{Datelike, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        invoice::{self, InvoiceItem, InvoiceItems},
        job, sequence,
    },
    errors::ServiceError,
    services::{jobs, payments},
};

/// Tax rate used when a job completes and no rate is given
pub const DEFAULT_TAX_RATE: Decimal = dec!(18);

const INVOICE_SEQUENCE: &str = "invoice_number";

/// Billing documents derived from completed jobs.
///
/// Only service and labour charges are billed; job materials stay out of the invoice.
#[derive(Clone)]
pub struct InvoiceService {
    db: Arc<DbPool>,
}

impl InvoiceService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Returns the job's invoice, creating it on first call.
    #[instrument(skip(self))]
    pub async fn generate_invoice_for_job(
        &self,
        job_id: Uuid,
        tax_rate: Decimal,
        discount: Decimal,
    ) -> Result<invoice::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let job = jobs::find_job(&txn, job_id).await?;
        let (invoice, created) = generate_for_job(&txn, &job, tax_rate, discount).await?;
        txn.commit().await?;

        if created {
            counter!("garage.invoices.generated", 1);
        }
        Ok(invoice)
    }

    pub async fn get_invoice(&self, id: Uuid) -> Result<invoice::Model, ServiceError> {
        find_invoice(&*self.db, id).await
    }

    pub async fn find_invoice_for_job(
        &self,
        job_id: Uuid,
    ) -> Result<Option<invoice::Model>, ServiceError> {
        invoice_for_job(&*self.db, job_id).await
    }

    pub async fn list_invoices(&self) -> Result<Vec<invoice::Model>, ServiceError> {
        let invoices = invoice::Entity::find()
            .order_by_desc(invoice::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(invoices)
    }

    /// Records a payment against the invoice and mirrors it onto the job ledger.
    ///
    /// `amount` defaults to the invoice's remaining balance. Each side is capped
    /// at its own remaining balance; a fully paid invoice is returned unchanged.
    #[instrument(skip(self))]
    pub async fn mark_invoice_paid(
        &self,
        invoice_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<invoice::Model, ServiceError> {
        if let Some(amount) = amount {
            payments::ensure_positive_amount(amount)?;
        }

        let txn = self.db.begin().await?;
        let invoice = find_invoice(&txn, invoice_id).await?;
        let remaining = invoice.remaining_balance();
        if remaining <= Decimal::ZERO {
            info!(invoice_id = %invoice_id, "Invoice already settled, nothing to apply");
            return Ok(invoice);
        }

        let applied = amount.map_or(remaining, |a| payments::capped_amount(a, remaining));
        let updated = apply_invoice_payment(&txn, &invoice, applied).await?;

        let job = jobs::find_job(&txn, invoice.job_id).await.map_err(|e| {
            error!(invoice_id = %invoice_id, job_id = %invoice.job_id, "Invoice references a missing job");
            e
        })?;
        let job_applied = payments::capped_amount(applied, job.remaining_balance());
        if job_applied > Decimal::ZERO {
            jobs::apply_job_payment(
                &txn,
                &job,
                job_applied,
                payments::INVOICE_MIRROR_MODE.to_string(),
                Some(format!("Invoice {} payment", invoice.invoice_number)),
            )
            .await?;
        }

        txn.commit().await?;

        counter!("garage.payments.invoice", 1);
        info!(
            invoice_id = %invoice_id,
            %applied,
            %job_applied,
            status = %updated.payment_status,
            "Invoice payment recorded"
        );
        Ok(updated)
    }
}

pub(crate) async fn find_invoice<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<invoice::Model, ServiceError> {
    invoice::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Invoice", id))
}

pub(crate) async fn invoice_for_job<C: ConnectionTrait>(
    conn: &C,
    job_id: Uuid,
) -> Result<Option<invoice::Model>, ServiceError> {
    let found = invoice::Entity::find()
        .filter(invoice::Column::JobId.eq(job_id))
        .one(conn)
        .await?;
    Ok(found)
}

/// Billable lines of a job: service charge and labour charge, each only when non-zero.
pub fn invoice_items_for(job: &job::Model) -> InvoiceItems {
    let mut items = Vec::with_capacity(2);
    for (description, amount) in [
        ("Service Charge", job.service_cost),
        ("Labor Charge", job.labor_cost),
    ] {
        if amount > Decimal::ZERO {
            items.push(InvoiceItem {
                description: description.to_string(),
                quantity: 1,
                rate: amount,
                total: amount,
            });
        }
    }
    InvoiceItems(items)
}

/// Creates the invoice for `job` unless one already exists.
/// The flag is `true` when a new invoice was written.
pub(crate) async fn generate_for_job<C: ConnectionTrait>(
    conn: &C,
    job: &job::Model,
    tax_rate: Decimal,
    discount: Decimal,
) -> Result<(invoice::Model, bool), ServiceError> {
    if let Some(existing) = invoice_for_job(conn, job.id).await? {
        return Ok((existing, false));
    }

    if tax_rate < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Tax rate must not be negative".to_string(),
        ));
    }
    if discount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Discount must not be negative".to_string(),
        ));
    }

    let items = invoice_items_for(job);
    let subtotal = items.subtotal();
    let tax = subtotal * tax_rate / dec!(100);
    if discount > subtotal + tax {
        return Err(ServiceError::ValidationError(format!(
            "Discount {} exceeds invoice amount {}",
            discount,
            subtotal + tax
        )));
    }
    let total_amount = subtotal + tax - discount;
    let paid_amount = job.paid_amount.min(total_amount);

    let sequence = next_sequence_value(conn, INVOICE_SEQUENCE).await?;
    let invoice_number = format_invoice_number(Utc::now().year(), sequence);

    let now = Utc::now();
    let invoice = invoice::ActiveModel {
        id: Set(Uuid::new_v4()),
        invoice_number: Set(invoice_number),
        job_id: Set(job.id),
        customer_id: Set(job.customer_id),
        customer_name: Set(job.customer_name.clone()),
        vehicle_name: Set(job.vehicle_name.clone()),
        plate_number: Set(job.plate_number.clone()),
        items: Set(items),
        subtotal: Set(subtotal),
        tax_rate: Set(tax_rate),
        tax: Set(tax),
        discount: Set(discount),
        total_amount: Set(total_amount),
        paid_amount: Set(paid_amount),
        payment_status: Set(payments::payment_status(paid_amount, total_amount)),
        version: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    info!(
        invoice_id = %invoice.id,
        invoice_number = %invoice.invoice_number,
        job_id = %job.id,
        total = %invoice.total_amount,
        "Invoice generated"
    );
    Ok((invoice, true))
}

pub fn format_invoice_number(year: i32, sequence: i64) -> String {
    format!("INV-{}-{:05}", year, sequence)
}

/// Increments the named counter and returns the new value.
///
/// A missing counter is seeded from the number of existing invoices so that
/// numbering continues where count-based numbering left off.
async fn next_sequence_value<C: ConnectionTrait>(conn: &C, name: &str) -> Result<i64, ServiceError> {
    let bumped = sequence::Entity::update_many()
        .col_expr(
            sequence::Column::Value,
            Expr::col(sequence::Column::Value).add(1),
        )
        .filter(sequence::Column::Name.eq(name))
        .exec(conn)
        .await?;

    if bumped.rows_affected == 0 {
        let existing = invoice::Entity::find().count(conn).await?;
        let value = existing as i64 + 1;
        sequence::ActiveModel {
            name: Set(name.to_string()),
            value: Set(value),
        }
        .insert(conn)
        .await?;
        return Ok(value);
    }

    let row = sequence::Entity::find_by_id(name.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError(format!("sequence {} disappeared", name)))?;
    Ok(row.value)
}

/// Adds `amount` to the invoice's paid amount under its version check.
pub(crate) async fn apply_invoice_payment<C: ConnectionTrait>(
    conn: &C,
    invoice: &invoice::Model,
    amount: Decimal,
) -> Result<invoice::Model, ServiceError> {
    let paid_amount = invoice.paid_amount + amount;
    let result = invoice::Entity::update_many()
        .set(invoice::ActiveModel {
            paid_amount: Set(paid_amount),
            payment_status: Set(payments::payment_status(paid_amount, invoice.total_amount)),
            version: Set(invoice.version + 1),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(invoice::Column::Id.eq(invoice.id))
        .filter(invoice::Column::Version.eq(invoice.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(invoice.id));
    }
    find_invoice(conn, invoice.id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_numbers_are_zero_padded() {
        assert_eq!(format_invoice_number(2024, 7), "INV-2024-00007");
        assert_eq!(format_invoice_number(2025, 123456), "INV-2025-123456");
    }
}
