mod common;

use assert_matches::assert_matches;
use chrono::{Datelike, Utc};
use common::TestContext;
use garage_crm::{
    entities::job::{JobStage, PaymentStatus, ServiceItem},
    errors::ServiceError,
    services::{
        customers::VehicleRef,
        invoicing::DEFAULT_TAX_RATE,
        jobs::{CreateJob, MaterialRequest, ServiceIntakeRequest},
        pricing::{CostRequest, OtherServiceSelection, PpfSelection},
        technicians::CreateTechnician,
    },
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn completing_a_job_generates_its_invoice() {
    let ctx = TestContext::new().await;
    let job = ctx.job_with_costs(dec!(1000), dec!(500)).await;
    assert_eq!(job.stage, JobStage::NewLead);
    assert_eq!(job.total_amount, dec!(1770));
    assert_eq!(job.payment_status, PaymentStatus::Pending);

    let completed = ctx
        .services
        .jobs
        .update_job_stage(job.id, JobStage::Completed)
        .await
        .unwrap();
    assert_eq!(completed.stage, JobStage::Completed);

    let invoice = ctx
        .services
        .invoices
        .find_invoice_for_job(job.id)
        .await
        .unwrap()
        .expect("invoice generated on completion");

    let items: Vec<(String, Decimal)> = invoice
        .items
        .0
        .iter()
        .map(|item| (item.description.clone(), item.total))
        .collect();
    assert_eq!(
        items,
        vec![
            ("Service Charge".to_string(), dec!(1000)),
            ("Labor Charge".to_string(), dec!(500)),
        ]
    );
    assert_eq!(invoice.subtotal, dec!(1500));
    assert_eq!(invoice.tax_rate, DEFAULT_TAX_RATE);
    assert_eq!(invoice.tax, dec!(270));
    assert_eq!(invoice.discount, Decimal::ZERO);
    assert_eq!(invoice.total_amount, dec!(1770));
    assert_eq!(
        invoice.invoice_number,
        format!("INV-{}-00001", Utc::now().year())
    );
}

#[tokio::test]
async fn stage_is_frozen_once_invoiced() {
    let ctx = TestContext::new().await;
    let job = ctx.job_with_costs(dec!(1000), dec!(500)).await;
    ctx.services
        .invoices
        .generate_invoice_for_job(job.id, DEFAULT_TAX_RATE, Decimal::ZERO)
        .await
        .unwrap();

    for stage in [JobStage::InspectionDone, JobStage::Cancelled, JobStage::Completed] {
        let err = ctx
            .services
            .jobs
            .update_job_stage(job.id, stage)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Conflict(ref msg) if msg == "Cannot change stage after invoice has been created");
    }

    let unchanged = ctx.services.jobs.get_job(job.id).await.unwrap();
    assert_eq!(unchanged.stage, JobStage::NewLead);
}

#[tokio::test]
async fn invoice_generation_is_idempotent() {
    let ctx = TestContext::new().await;
    let job = ctx.job_with_costs(dec!(1000), dec!(500)).await;

    let first = ctx
        .services
        .invoices
        .generate_invoice_for_job(job.id, DEFAULT_TAX_RATE, Decimal::ZERO)
        .await
        .unwrap();
    let second = ctx
        .services
        .invoices
        .generate_invoice_for_job(job.id, dec!(5), dec!(100))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(ctx.services.invoices.list_invoices().await.unwrap().len(), 1);
}

#[tokio::test]
async fn invoice_numbers_increase_per_invoice() {
    let ctx = TestContext::new().await;
    let first_job = ctx.job_with_costs(dec!(100), dec!(0)).await;
    let second_job = ctx.job_with_costs(dec!(0), dec!(200)).await;

    let first = ctx
        .services
        .invoices
        .generate_invoice_for_job(first_job.id, DEFAULT_TAX_RATE, Decimal::ZERO)
        .await
        .unwrap();
    let second = ctx
        .services
        .invoices
        .generate_invoice_for_job(second_job.id, DEFAULT_TAX_RATE, Decimal::ZERO)
        .await
        .unwrap();

    let year = Utc::now().year();
    assert_eq!(first.invoice_number, format!("INV-{}-00001", year));
    assert_eq!(second.invoice_number, format!("INV-{}-00002", year));
    assert_eq!(first.items.0.len(), 1);
    assert_eq!(second.items.0[0].description, "Labor Charge");
}

#[tokio::test]
async fn oversized_discount_is_rejected() {
    let ctx = TestContext::new().await;
    let job = ctx.job_with_costs(dec!(100), dec!(0)).await;
    let err = ctx
        .services
        .invoices
        .generate_invoice_for_job(job.id, DEFAULT_TAX_RATE, dec!(500))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert!(ctx
        .services
        .invoices
        .find_invoice_for_job(job.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn cancelled_jobs_accept_no_further_transitions() {
    let ctx = TestContext::new().await;
    let job = ctx.job_with_costs(dec!(1000), dec!(0)).await;
    ctx.services
        .jobs
        .update_job_stage(job.id, JobStage::Cancelled)
        .await
        .unwrap();

    let err = ctx
        .services
        .jobs
        .update_job_stage(job.id, JobStage::WorkInProgress)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn stage_change_sends_rendered_template() {
    let ctx = TestContext::new().await;
    ctx.services
        .notifications
        .upsert_template(
            JobStage::InspectionDone,
            "Inspection of your {{vehicle}} ({{plate}}) is done.".to_string(),
            true,
        )
        .await
        .unwrap();
    let job = ctx.job_with_costs(dec!(1000), dec!(500)).await;

    ctx.services
        .jobs
        .update_job_stage(job.id, JobStage::InspectionDone)
        .await
        .unwrap();

    assert_eq!(
        ctx.transport.messages(),
        vec![(
            "9876543210".to_string(),
            "Inspection of your Honda City (KA01AB1234) is done.".to_string()
        )]
    );
}

#[tokio::test]
async fn inactive_template_sends_nothing() {
    let ctx = TestContext::new().await;
    ctx.services
        .notifications
        .upsert_template(JobStage::NewLead, "Welcome {{vehicle}}".to_string(), true)
        .await
        .unwrap();
    ctx.services
        .notifications
        .upsert_template(JobStage::NewLead, "Welcome {{vehicle}}".to_string(), false)
        .await
        .unwrap();

    ctx.job_with_costs(dec!(1000), dec!(500)).await;
    assert!(ctx.transport.messages().is_empty());
}

#[tokio::test]
async fn rejected_notification_does_not_fail_the_transition() {
    let ctx = TestContext::new().await;
    ctx.transport.reject_all();
    ctx.services
        .notifications
        .upsert_template(JobStage::WorkInProgress, "Work started on {{plate}}".to_string(), true)
        .await
        .unwrap();
    let job = ctx.job_with_costs(dec!(1000), dec!(500)).await;

    let updated = ctx
        .services
        .jobs
        .update_job_stage(job.id, JobStage::WorkInProgress)
        .await
        .unwrap();

    assert_eq!(updated.stage, JobStage::WorkInProgress);
    assert_eq!(updated.version, job.version + 1);
    assert_eq!(ctx.transport.messages().len(), 1);
}

#[tokio::test]
async fn intake_prices_from_catalog_and_caches_choices() {
    let ctx = TestContext::new().await;
    let (customer, vehicle) = ctx.customer("9000000001").await;

    let job = ctx
        .services
        .jobs
        .create_job_from_intake(ServiceIntakeRequest {
            customer_id: customer.id,
            vehicle: VehicleRef::Id(vehicle.id),
            technician_id: None,
            notes: Some("Customer wants it by Friday".to_string()),
            cost: CostRequest {
                ppf: Some(PpfSelection {
                    category: "Gloss".to_string(),
                    vehicle_type: "Hatchback".to_string(),
                    warranty: "3 Years".to_string(),
                }),
                other_services: vec![OtherServiceSelection {
                    name: "Ceramic Coating".to_string(),
                    vehicle_type: "Hatchback".to_string(),
                }],
                discount_percent: dec!(10),
                labor_cost: dec!(2000),
            },
        })
        .await
        .unwrap();

    assert!(job.service_items.0.is_empty());
    assert_eq!(job.quoted_items.0.len(), 2);
    assert_eq!(job.quoted_items.total(), dec!(63000));
    assert_eq!(job.service_cost, dec!(56700));
    assert_eq!(job.labor_cost, dec!(2000));
    assert_eq!(job.total_amount, dec!(69266));
    assert_eq!(job.vehicle_id, vehicle.id);
    assert_eq!(job.vehicle_index, 0);

    let vehicles = ctx.services.customers.list_vehicles(customer.id).await.unwrap();
    assert_eq!(vehicles[0].ppf_category.as_deref(), Some("Gloss"));
    assert_eq!(vehicles[0].ppf_warranty.as_deref(), Some("3 Years"));

    let customer = ctx.services.customers.get_customer(customer.id).await.unwrap();
    assert_eq!(customer.service_cost, Some(dec!(56700)));
    assert!(customer.service.unwrap().contains("Ceramic Coating"));
}

#[tokio::test]
async fn intake_with_nothing_billable_is_refused() {
    let ctx = TestContext::new().await;
    let (customer, _) = ctx.customer("9000000002").await;

    let err = ctx
        .services
        .jobs
        .create_job_from_intake(ServiceIntakeRequest {
            customer_id: customer.id,
            vehicle: VehicleRef::Position(0),
            technician_id: None,
            notes: None,
            cost: CostRequest {
                ppf: Some(PpfSelection {
                    category: "Matte".to_string(),
                    vehicle_type: "SUV".to_string(),
                    warranty: "5 Years".to_string(),
                }),
                other_services: vec![],
                discount_percent: dec!(100),
                labor_cost: Decimal::ZERO,
            },
        })
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(_));
    assert!(ctx
        .services
        .jobs
        .list_jobs_for_customer(customer.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn workload_counts_only_open_jobs() {
    let ctx = TestContext::new().await;
    let technician = ctx
        .services
        .technicians
        .create_technician(CreateTechnician {
            name: "Ravi".to_string(),
            specialty: "PPF".to_string(),
            phone: None,
        })
        .await
        .unwrap();

    let open = ctx.job_with_costs(dec!(1000), dec!(0)).await;
    let done = ctx.job_with_costs(dec!(1000), dec!(0)).await;
    let dropped = ctx.job_with_costs(dec!(1000), dec!(0)).await;
    for job in [&open, &done, &dropped] {
        ctx.services
            .jobs
            .assign_technician(job.id, technician.id)
            .await
            .unwrap();
    }
    ctx.services
        .jobs
        .update_job_stage(done.id, JobStage::Completed)
        .await
        .unwrap();
    ctx.services
        .jobs
        .update_job_stage(dropped.id, JobStage::Cancelled)
        .await
        .unwrap();

    assert_eq!(ctx.services.technicians.workload(technician.id).await.unwrap(), 1);
    let roster = ctx.services.technicians.roster_with_workload().await.unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].open_jobs, 1);
}

#[tokio::test]
async fn each_stage_change_bumps_the_version() {
    let ctx = TestContext::new().await;
    let job = ctx.job_with_costs(dec!(1000), dec!(500)).await;

    ctx.services
        .jobs
        .update_job_stage(job.id, JobStage::InspectionDone)
        .await
        .unwrap();
    let latest = ctx
        .services
        .jobs
        .update_job_stage(job.id, JobStage::WorkInProgress)
        .await
        .unwrap();
    assert_eq!(latest.version, job.version + 2);
    assert_eq!(
        ctx.services
            .jobs
            .list_jobs_by_stage(JobStage::WorkInProgress)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn new_job_sends_the_new_lead_template() {
    let ctx = TestContext::new().await;
    ctx.services
        .notifications
        .upsert_template(
            JobStage::NewLead,
            "Thanks for bringing in your {{vehicle}} ({{plate}}).".to_string(),
            true,
        )
        .await
        .unwrap();

    ctx.job_with_costs(dec!(1000), dec!(500)).await;

    assert_eq!(
        ctx.transport.messages(),
        vec![(
            "9876543210".to_string(),
            "Thanks for bringing in your Honda City (KA01AB1234).".to_string()
        )]
    );
}

#[tokio::test]
async fn intake_services_are_counted_once_when_materials_are_added() {
    let ctx = TestContext::new().await;
    let (customer, _) = ctx.customer("9000000005").await;
    let film_cutter = ctx.item("Film Blade", 10, 2, dec!(100)).await;

    let job = ctx
        .services
        .jobs
        .create_job_from_intake(ServiceIntakeRequest {
            customer_id: customer.id,
            vehicle: VehicleRef::Position(0),
            technician_id: None,
            notes: None,
            cost: CostRequest {
                ppf: Some(PpfSelection {
                    category: "Gloss".to_string(),
                    vehicle_type: "Hatchback".to_string(),
                    warranty: "3 Years".to_string(),
                }),
                other_services: vec![],
                discount_percent: Decimal::ZERO,
                labor_cost: Decimal::ZERO,
            },
        })
        .await
        .unwrap();
    assert_eq!(job.service_cost, dec!(45000));
    assert_eq!(job.total_amount, dec!(53100));

    let updated = ctx
        .services
        .jobs
        .add_materials_to_job(
            job.id,
            vec![MaterialRequest {
                inventory_id: film_cutter.id,
                quantity: 1,
            }],
        )
        .await
        .unwrap();
    assert_eq!(updated.total_amount, dec!(45100));
    assert_eq!(updated.quoted_items.total(), dec!(45000));
}

#[tokio::test]
async fn service_items_count_toward_both_totals() {
    let ctx = TestContext::new().await;
    let (customer, _) = ctx.customer("9000000006").await;
    let wax = ctx.item("Wax", 10, 2, dec!(10)).await;

    let job = ctx
        .services
        .jobs
        .create_job(CreateJob {
            customer_id: customer.id,
            vehicle: VehicleRef::Position(0),
            technician_id: None,
            service_type: Some("Detailing".to_string()),
            notes: None,
            service_cost: dec!(1000),
            labor_cost: Decimal::ZERO,
            service_items: vec![ServiceItem {
                name: "Headlight Restoration".to_string(),
                cost: dec!(100),
            }],
        })
        .await
        .unwrap();
    assert_eq!(job.total_amount, dec!(1298));

    let updated = ctx
        .services
        .jobs
        .add_materials_to_job(
            job.id,
            vec![MaterialRequest {
                inventory_id: wax.id,
                quantity: 1,
            }],
        )
        .await
        .unwrap();
    assert_eq!(updated.total_amount, dec!(1110));
}

#[tokio::test]
async fn zero_totals_are_settled_from_the_start() {
    let ctx = TestContext::new().await;
    let free = ctx.job_with_costs(Decimal::ZERO, Decimal::ZERO).await;
    assert_eq!(free.total_amount, Decimal::ZERO);
    assert_eq!(free.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn fully_discounted_invoice_is_paid() {
    let ctx = TestContext::new().await;
    let job = ctx.job_with_costs(dec!(1000), Decimal::ZERO).await;

    let invoice = ctx
        .services
        .invoices
        .generate_invoice_for_job(job.id, DEFAULT_TAX_RATE, dec!(1180))
        .await
        .unwrap();
    assert_eq!(invoice.total_amount, Decimal::ZERO);
    assert_eq!(invoice.payment_status, PaymentStatus::Paid);

    let after = ctx
        .services
        .invoices
        .mark_invoice_paid(invoice.id, None)
        .await
        .unwrap();
    assert_eq!(after.payment_status, PaymentStatus::Paid);
    assert_eq!(after.paid_amount, Decimal::ZERO);
}
