#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use garage_crm::{
    config::AppConfig,
    db,
    entities::{customer, inventory_item, job, vehicle},
    notifications::MessageTransport,
    services::{
        customers::{NewVehicle, RegisterCustomer, VehicleRef},
        inventory::CreateInventoryItem,
        jobs::CreateJob,
        pricing::PricingCatalog,
    },
    GarageServices,
};
use rust_decimal::Decimal;
use tempfile::TempDir;

/// Transport that records every message and answers with a configurable result.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    reject: AtomicBool,
}

impl RecordingTransport {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn dispatch(&self, phone: &str, message: &str) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), message.to_string()));
        !self.reject.load(Ordering::SeqCst)
    }
}

/// Services backed by a fresh SQLite file that lives as long as the context.
pub struct TestContext {
    pub services: GarageServices,
    pub transport: Arc<RecordingTransport>,
    _dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("garage.db").display());

        let mut cfg = AppConfig::new(url, "test".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("migrations");

        let transport = Arc::new(RecordingTransport::default());
        let services = GarageServices::new(
            Arc::new(pool),
            transport.clone(),
            Arc::new(PricingCatalog::builtin()),
        );

        Self {
            services,
            transport,
            _dir: dir,
        }
    }

    /// Customer with a single Honda City at position 0.
    pub async fn customer(&self, phone: &str) -> (customer::Model, vehicle::Model) {
        let created = self
            .services
            .customers
            .register_customer(RegisterCustomer {
                name: "Asha Rao".to_string(),
                phone: phone.to_string(),
                email: Some("asha@example.com".to_string()),
                address: None,
                vehicles: vec![NewVehicle {
                    make: "Honda".to_string(),
                    model: "City".to_string(),
                    year: "2021".to_string(),
                    plate_number: "KA01AB1234".to_string(),
                    color: "White".to_string(),
                    vin: None,
                }],
            })
            .await
            .expect("register customer");
        let vehicle = created.vehicles[0].clone();
        (created.customer, vehicle)
    }

    pub async fn job_with_costs(&self, service_cost: Decimal, labor_cost: Decimal) -> job::Model {
        let (customer, _) = self.customer("9876543210").await;
        self.services
            .jobs
            .create_job(CreateJob {
                customer_id: customer.id,
                vehicle: VehicleRef::Position(0),
                technician_id: None,
                service_type: Some("General Service".to_string()),
                notes: None,
                service_cost,
                labor_cost,
                service_items: vec![],
            })
            .await
            .expect("create job")
    }

    pub async fn item(&self, name: &str, quantity: i32, min_stock: i32, price: Decimal) -> inventory_item::Model {
        self.services
            .inventory
            .create_item(CreateInventoryItem {
                name: name.to_string(),
                category: "Consumables".to_string(),
                quantity,
                unit: "pcs".to_string(),
                min_stock,
                price,
            })
            .await
            .expect("create item")
    }
}
