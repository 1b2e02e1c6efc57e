pub mod appointments;
pub mod customers;
pub mod inventory;
pub mod invoicing;
pub mod jobs;
pub mod notifications;
pub mod payments;
pub mod pricing;
pub mod technicians;
