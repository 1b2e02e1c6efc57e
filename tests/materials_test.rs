mod common;

use assert_matches::assert_matches;
use common::TestContext;
use garage_crm::{
    entities::job::JobStage,
    errors::ServiceError,
    services::jobs::{JobPaymentInput, MaterialRequest},
};
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn consumption_records_lines_and_decrements_stock() {
    let ctx = TestContext::new().await;
    let polish = ctx.item("Polish", 20, 5, dec!(150)).await;
    let cloth = ctx.item("Microfiber Cloth", 40, 10, dec!(25)).await;
    let job = ctx.job_with_costs(dec!(1000), dec!(500)).await;

    let updated = ctx
        .services
        .jobs
        .add_materials_to_job(
            job.id,
            vec![
                MaterialRequest {
                    inventory_id: polish.id,
                    quantity: 2,
                },
                MaterialRequest {
                    inventory_id: cloth.id,
                    quantity: 4,
                },
            ],
        )
        .await
        .unwrap();

    assert_eq!(updated.materials.0.len(), 2);
    assert_eq!(updated.materials.0[0].cost, dec!(300));
    assert_eq!(updated.materials.0[1].cost, dec!(100));
    // Labour is not re-added when materials are appended.
    assert_eq!(updated.total_amount, dec!(1400));

    assert_eq!(ctx.services.inventory.get_item(polish.id).await.unwrap().quantity, 18);
    assert_eq!(ctx.services.inventory.get_item(cloth.id).await.unwrap().quantity, 36);
}

#[tokio::test]
async fn one_short_line_leaves_everything_untouched() {
    let ctx = TestContext::new().await;
    let plenty = ctx.item("Shampoo", 10, 2, dec!(90)).await;
    let scarce = ctx.item("Clay Bar", 1, 2, dec!(400)).await;
    let job = ctx.job_with_costs(dec!(1000), dec!(500)).await;

    let err = ctx
        .services
        .jobs
        .add_materials_to_job(
            job.id,
            vec![
                MaterialRequest {
                    inventory_id: plenty.id,
                    quantity: 3,
                },
                MaterialRequest {
                    inventory_id: scarce.id,
                    quantity: 2,
                },
            ],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let job_after = ctx.services.jobs.get_job(job.id).await.unwrap();
    assert!(job_after.materials.0.is_empty());
    assert_eq!(job_after.total_amount, job.total_amount);
    assert_eq!(job_after.version, job.version);
    assert_eq!(ctx.services.inventory.get_item(plenty.id).await.unwrap().quantity, 10);
    assert_eq!(ctx.services.inventory.get_item(scarce.id).await.unwrap().quantity, 1);
}

#[tokio::test]
async fn repeated_item_is_checked_against_combined_quantity() {
    let ctx = TestContext::new().await;
    let wax = ctx.item("Wax", 5, 1, dec!(100)).await;
    let job = ctx.job_with_costs(dec!(1000), dec!(0)).await;

    let err = ctx
        .services
        .jobs
        .add_materials_to_job(
            job.id,
            vec![
                MaterialRequest {
                    inventory_id: wax.id,
                    quantity: 3,
                },
                MaterialRequest {
                    inventory_id: wax.id,
                    quantity: 3,
                },
            ],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(ctx.services.inventory.get_item(wax.id).await.unwrap().quantity, 5);
}

#[tokio::test]
async fn unknown_item_fails_the_batch() {
    let ctx = TestContext::new().await;
    let wax = ctx.item("Wax", 5, 1, dec!(100)).await;
    let job = ctx.job_with_costs(dec!(1000), dec!(0)).await;

    let err = ctx
        .services
        .jobs
        .add_materials_to_job(
            job.id,
            vec![
                MaterialRequest {
                    inventory_id: wax.id,
                    quantity: 1,
                },
                MaterialRequest {
                    inventory_id: Uuid::new_v4(),
                    quantity: 1,
                },
            ],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
    assert_eq!(ctx.services.inventory.get_item(wax.id).await.unwrap().quantity, 5);
}

#[tokio::test]
async fn closed_jobs_refuse_materials() {
    let ctx = TestContext::new().await;
    let wax = ctx.item("Wax", 5, 1, dec!(100)).await;
    let job = ctx.job_with_costs(dec!(1000), dec!(0)).await;
    ctx.services
        .jobs
        .update_job_stage(job.id, JobStage::Completed)
        .await
        .unwrap();

    let err = ctx
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
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn empty_or_non_positive_requests_are_invalid() {
    let ctx = TestContext::new().await;
    let wax = ctx.item("Wax", 5, 1, dec!(100)).await;
    let job = ctx.job_with_costs(dec!(1000), dec!(0)).await;

    let err = ctx
        .services
        .jobs
        .add_materials_to_job(job.id, vec![])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = ctx
        .services
        .jobs
        .add_materials_to_job(
            job.id,
            vec![MaterialRequest {
                inventory_id: wax.id,
                quantity: 0,
            }],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn total_may_not_drop_below_amount_paid() {
    let ctx = TestContext::new().await;
    let wax = ctx.item("Wax", 5, 1, dec!(10)).await;
    let job = ctx.job_with_costs(dec!(1000), dec!(500)).await;
    ctx.services
        .jobs
        .add_payment_to_job_with_invoice_sync(
            job.id,
            JobPaymentInput {
                amount: dec!(1500),
                mode: "UPI".to_string(),
                notes: None,
            },
        )
        .await
        .unwrap();

    // 10 for the wax plus 1000 service cost is below the 1500 already paid.
    let err = ctx
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
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("already paid"));

    let job_after = ctx.services.jobs.get_job(job.id).await.unwrap();
    assert!(job_after.materials.0.is_empty());
    assert_eq!(job_after.total_amount, dec!(1770));
    assert_eq!(ctx.services.inventory.get_item(wax.id).await.unwrap().quantity, 5);
}

#[tokio::test]
async fn oversized_combined_quantity_is_invalid() {
    let ctx = TestContext::new().await;
    let wax = ctx.item("Wax", 5, 1, dec!(10)).await;
    let job = ctx.job_with_costs(dec!(1000), dec!(0)).await;

    let line = MaterialRequest {
        inventory_id: wax.id,
        quantity: i32::MAX,
    };
    let err = ctx
        .services
        .jobs
        .add_materials_to_job(job.id, vec![line, line])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(ctx.services.inventory.get_item(wax.id).await.unwrap().quantity, 5);
}
