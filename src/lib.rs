//! Garage CRM core
//!
//! Customer intake, the service job pipeline, invoicing with job/invoice payment
//! reconciliation, inventory consumption, appointments and stage notifications.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod migrator;
pub mod notifications;
pub mod services;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::notifications::{DisabledTransport, MessageTransport, WhatsAppTransport};
use crate::services::{
    appointments::AppointmentService, customers::CustomerService, inventory::InventoryService,
    invoicing::InvoiceService, jobs::JobService, notifications::NotificationDispatcher,
    pricing::PricingCatalog, technicians::TechnicianService,
};

/// Every service wired against one pool, transport and pricing catalog.
#[derive(Clone)]
pub struct GarageServices {
    pub db: Arc<DbPool>,
    pub notifications: Arc<NotificationDispatcher>,
    pub customers: CustomerService,
    pub technicians: TechnicianService,
    pub inventory: InventoryService,
    pub jobs: JobService,
    pub invoices: InvoiceService,
    pub appointments: AppointmentService,
}

impl GarageServices {
    pub fn new(
        db: Arc<DbPool>,
        transport: Arc<dyn MessageTransport>,
        pricing: Arc<PricingCatalog>,
    ) -> Self {
        let notifications = Arc::new(NotificationDispatcher::new(db.clone(), transport));
        Self {
            customers: CustomerService::new(db.clone(), notifications.clone()),
            technicians: TechnicianService::new(db.clone()),
            inventory: InventoryService::new(db.clone()),
            jobs: JobService::new(db.clone(), notifications.clone(), pricing),
            invoices: InvoiceService::new(db.clone()),
            appointments: AppointmentService::new(db.clone(), notifications.clone()),
            notifications,
            db,
        }
    }

    /// Builds the services from configuration: pricing file (if any) and the WhatsApp transport.
    pub fn from_config(db: Arc<DbPool>, cfg: &AppConfig) -> anyhow::Result<Self> {
        let pricing = Arc::new(cfg.pricing_catalog()?);
        let transport: Arc<dyn MessageTransport> = if cfg.whatsapp.is_configured() {
            Arc::new(WhatsAppTransport::new(cfg.whatsapp.clone())?)
        } else {
            tracing::warn!("WhatsApp is not configured, notifications are disabled");
            Arc::new(DisabledTransport)
        };
        Ok(Self::new(db, transport, pricing))
    }
}
