mod common;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use common::TestContext;
use garage_crm::{
    entities::{
        appointment::AppointmentStatus,
        job::{JobStage, PaymentStatus},
    },
    errors::ServiceError,
    services::appointments::CreateAppointment,
};
use rust_decimal::Decimal;

fn booking(phone: &str, notes: Option<&str>) -> CreateAppointment {
    CreateAppointment {
        customer_name: "Vikram Shah".to_string(),
        phone: phone.to_string(),
        vehicle_info: "Hyundai Creta".to_string(),
        plate_number: "mh12xy9876".to_string(),
        service_type: "Ceramic Coating".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 6, 14).unwrap(),
        time_slot: "10:00-11:00".to_string(),
        notes: notes.map(str::to_string),
    }
}

#[tokio::test]
async fn converting_for_unknown_phone_creates_customer_and_job() {
    let ctx = TestContext::new().await;
    ctx.services
        .notifications
        .upsert_template(
            JobStage::NewLead,
            "We have booked your {{vehicle}} ({{plate}}).".to_string(),
            true,
        )
        .await
        .unwrap();
    let appointment = ctx
        .services
        .appointments
        .create_appointment(booking("9123456780", Some("Prefers morning pickup")))
        .await
        .unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);

    let job = ctx
        .services
        .appointments
        .convert_appointment_to_job(appointment.id)
        .await
        .unwrap();

    assert_eq!(job.stage, JobStage::NewLead);
    assert_eq!(job.vehicle_index, 0);
    assert_eq!(job.total_amount, Decimal::ZERO);
    assert_eq!(job.payment_status, PaymentStatus::Paid);
    assert_eq!(
        ctx.transport.messages(),
        vec![(
            "9123456780".to_string(),
            "We have booked your Hyundai Creta (MH12XY9876).".to_string()
        )]
    );
    assert_eq!(
        job.notes.as_deref(),
        Some("Ceramic Coating - Prefers morning pickup")
    );

    let customer = ctx
        .services
        .customers
        .find_by_phone("9123456780")
        .await
        .unwrap()
        .expect("customer created from booking");
    assert_eq!(customer.id, job.customer_id);
    assert_eq!(customer.name, "Vikram Shah");

    let vehicles = ctx.services.customers.list_vehicles(customer.id).await.unwrap();
    assert_eq!(vehicles.len(), 1);
    assert_eq!(vehicles[0].model, "Hyundai Creta");
    assert_eq!(vehicles[0].plate_number, "MH12XY9876");
    assert_eq!(vehicles[0].make, "");
    assert_eq!(vehicles[0].year, "");
    assert_eq!(vehicles[0].id, job.vehicle_id);

    let appointment = ctx
        .services
        .appointments
        .get_appointment(appointment.id)
        .await
        .unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Converted);
    assert_eq!(appointment.job_id, Some(job.id));
}

#[tokio::test]
async fn existing_customer_is_reused_by_phone() {
    let ctx = TestContext::new().await;
    let (customer, vehicle) = ctx.customer("9988776655").await;
    let appointment = ctx
        .services
        .appointments
        .create_appointment(booking("9988776655", None))
        .await
        .unwrap();

    let job = ctx
        .services
        .appointments
        .convert_appointment_to_job(appointment.id)
        .await
        .unwrap();

    assert_eq!(job.customer_id, customer.id);
    assert_eq!(job.vehicle_id, vehicle.id);
    assert_eq!(job.plate_number, "KA01AB1234");
    assert_eq!(job.notes.as_deref(), Some("Ceramic Coating"));
    assert_eq!(
        ctx.services.customers.list_vehicles(customer.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn conversion_happens_once() {
    let ctx = TestContext::new().await;
    let appointment = ctx
        .services
        .appointments
        .create_appointment(booking("9123456781", None))
        .await
        .unwrap();
    ctx.services
        .appointments
        .convert_appointment_to_job(appointment.id)
        .await
        .unwrap();

    let err = ctx
        .services
        .appointments
        .convert_appointment_to_job(appointment.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let err = ctx
        .services
        .appointments
        .update_appointment_status(appointment.id, AppointmentStatus::Scheduled)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn cancelled_or_missing_appointments_are_not_converted() {
    let ctx = TestContext::new().await;
    let err = ctx
        .services
        .appointments
        .convert_appointment_to_job(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let appointment = ctx
        .services
        .appointments
        .create_appointment(booking("9123456782", None))
        .await
        .unwrap();
    ctx.services
        .appointments
        .update_appointment_status(appointment.id, AppointmentStatus::Cancelled)
        .await
        .unwrap();
    let err = ctx
        .services
        .appointments
        .convert_appointment_to_job(appointment.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert!(ctx
        .services
        .customers
        .find_by_phone("9123456782")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn converted_status_cannot_be_set_directly() {
    let ctx = TestContext::new().await;
    let appointment = ctx
        .services
        .appointments
        .create_appointment(booking("9123456783", None))
        .await
        .unwrap();
    let err = ctx
        .services
        .appointments
        .update_appointment_status(appointment.id, AppointmentStatus::Converted)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let confirmed = ctx
        .services
        .appointments
        .update_appointment_status(appointment.id, AppointmentStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    let day = ctx
        .services
        .appointments
        .list_appointments_on(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap())
        .await
        .unwrap();
    assert_eq!(day.len(), 1);
}
