pub mod appointment;
pub mod customer;
pub mod inventory_item;
pub mod invoice;
pub mod job;
pub mod sequence;
pub mod technician;
pub mod vehicle;
pub mod whatsapp_template;
