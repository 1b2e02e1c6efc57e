//! Intake cost computation.
//!
//! The catalog holds two lookup tables: paint protection film prices keyed by
//! `(category, vehicle type, warranty)` and other service prices keyed by
//! `(service name, vehicle type)`. It is built once at startup and shared
//! read-only; lookups are case-insensitive.

use config::{Config, ConfigError, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::entities::job::ServiceItem;

/// GST applied at intake. Not configurable.
pub const INTAKE_TAX_RATE: Decimal = dec!(18);

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("Failed to load pricing catalog: {0}")]
    Load(#[from] ConfigError),

    #[error("No PPF price for category '{category}', vehicle type '{vehicle_type}', warranty '{warranty}'")]
    UnknownPpf {
        category: String,
        vehicle_type: String,
        warranty: String,
    },

    #[error("No price for service '{service}' on vehicle type '{vehicle_type}'")]
    UnknownService {
        service: String,
        vehicle_type: String,
    },

    #[error("Discount percentage must be between 0 and 100, got {0}")]
    InvalidDiscount(Decimal),

    #[error("Labor cost must not be negative, got {0}")]
    NegativeLabor(Decimal),

    #[error("Invalid catalog entry: {0}")]
    InvalidEntry(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpfPriceEntry {
    pub category: String,
    pub vehicle_type: String,
    pub warranty: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePriceEntry {
    pub name: String,
    pub vehicle_type: String,
    pub price: Decimal,
}

/// File layout accepted by [`PricingCatalog::from_file`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTables {
    #[serde(default)]
    pub ppf: Vec<PpfPriceEntry>,
    #[serde(default)]
    pub other_services: Vec<ServicePriceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpfSelection {
    pub category: String,
    pub vehicle_type: String,
    pub warranty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherServiceSelection {
    pub name: String,
    pub vehicle_type: String,
}

/// Everything the cost computation needs from an intake form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CostRequest {
    pub ppf: Option<PpfSelection>,
    #[serde(default)]
    pub other_services: Vec<OtherServiceSelection>,
    #[serde(default)]
    pub discount_percent: Decimal,
    #[serde(default)]
    pub labor_cost: Decimal,
}

/// Full-precision result of an intake cost computation. Nothing is rounded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// PPF line first (when selected), then other services in request order, at list price
    pub service_items: Vec<ServiceItem>,
    pub total_service_cost: Decimal,
    pub discounted_service_cost: Decimal,
    pub labor_cost: Decimal,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total_amount: Decimal,
}

impl CostBreakdown {
    /// A job is only worth opening when either the services or the labour cost something.
    pub fn is_billable(&self) -> bool {
        self.discounted_service_cost > Decimal::ZERO || self.labor_cost > Decimal::ZERO
    }
}

type PpfKey = (String, String, String);
type ServiceKey = (String, String);

#[derive(Debug, Clone, Default)]
pub struct PricingCatalog {
    ppf: HashMap<PpfKey, Decimal>,
    services: HashMap<ServiceKey, Decimal>,
}

fn norm(value: &str) -> String {
    value.trim().to_lowercase()
}

impl PricingCatalog {
    pub fn from_tables(tables: PricingTables) -> Result<Self, PricingError> {
        let mut catalog = Self::default();

        for entry in tables.ppf {
            if entry.price < Decimal::ZERO {
                return Err(PricingError::InvalidEntry(format!(
                    "negative PPF price for {} / {} / {}",
                    entry.category, entry.vehicle_type, entry.warranty
                )));
            }
            let key = (
                norm(&entry.category),
                norm(&entry.vehicle_type),
                norm(&entry.warranty),
            );
            if catalog.ppf.insert(key, entry.price).is_some() {
                return Err(PricingError::InvalidEntry(format!(
                    "duplicate PPF price for {} / {} / {}",
                    entry.category, entry.vehicle_type, entry.warranty
                )));
            }
        }

        for entry in tables.other_services {
            if entry.price < Decimal::ZERO {
                return Err(PricingError::InvalidEntry(format!(
                    "negative price for service {} / {}",
                    entry.name, entry.vehicle_type
                )));
            }
            let key = (norm(&entry.name), norm(&entry.vehicle_type));
            if catalog.services.insert(key, entry.price).is_some() {
                return Err(PricingError::InvalidEntry(format!(
                    "duplicate price for service {} / {}",
                    entry.name, entry.vehicle_type
                )));
            }
        }

        Ok(catalog)
    }

    /// Loads a catalog from a TOML/JSON/YAML file with `[[ppf]]` and `[[other_services]]` tables.
    pub fn from_file(path: &str) -> Result<Self, PricingError> {
        let tables: PricingTables = Config::builder()
            .add_source(File::with_name(path))
            .build()?
            .try_deserialize()?;
        Self::from_tables(tables)
    }

    /// Shop price list used when no pricing file is configured.
    pub fn builtin() -> Self {
        const VEHICLE_TYPES: [(&str, Decimal); 3] = [
            ("Hatchback", dec!(1.0)),
            ("Sedan", dec!(1.2)),
            ("SUV", dec!(1.5)),
        ];
        const PPF_BASE: [(&str, &str, Decimal); 6] = [
            ("Gloss", "3 Years", dec!(45000)),
            ("Gloss", "5 Years", dec!(60000)),
            ("Matte", "3 Years", dec!(55000)),
            ("Matte", "5 Years", dec!(70000)),
            ("Colored", "3 Years", dec!(65000)),
            ("Colored", "5 Years", dec!(85000)),
        ];
        const SERVICE_BASE: [(&str, Decimal); 5] = [
            ("Ceramic Coating", dec!(18000)),
            ("Graphene Coating", dec!(25000)),
            ("Interior Detailing", dec!(4000)),
            ("Paint Correction", dec!(8000)),
            ("Full Body Wash", dec!(800)),
        ];

        let mut catalog = Self::default();
        for (vehicle_type, factor) in VEHICLE_TYPES {
            for (category, warranty, base) in PPF_BASE {
                catalog.ppf.insert(
                    (norm(category), norm(vehicle_type), norm(warranty)),
                    base * factor,
                );
            }
            for (name, base) in SERVICE_BASE {
                catalog
                    .services
                    .insert((norm(name), norm(vehicle_type)), base * factor);
            }
        }
        catalog
    }

    pub fn ppf_price(&self, selection: &PpfSelection) -> Result<Decimal, PricingError> {
        let key = (
            norm(&selection.category),
            norm(&selection.vehicle_type),
            norm(&selection.warranty),
        );
        self.ppf
            .get(&key)
            .copied()
            .ok_or_else(|| PricingError::UnknownPpf {
                category: selection.category.clone(),
                vehicle_type: selection.vehicle_type.clone(),
                warranty: selection.warranty.clone(),
            })
    }

    pub fn service_price(&self, selection: &OtherServiceSelection) -> Result<Decimal, PricingError> {
        let key = (norm(&selection.name), norm(&selection.vehicle_type));
        self.services
            .get(&key)
            .copied()
            .ok_or_else(|| PricingError::UnknownService {
                service: selection.name.clone(),
                vehicle_type: selection.vehicle_type.clone(),
            })
    }

    /// Prices an intake request.
    ///
    /// ```text
    /// total_service_cost      = ppf + sum(other services)
    /// discounted_service_cost = total_service_cost * (1 - discount% / 100)
    /// subtotal                = discounted_service_cost + labor
    /// total_amount            = subtotal + subtotal * 18%
    /// ```
    pub fn compute(&self, request: &CostRequest) -> Result<CostBreakdown, PricingError> {
        if request.discount_percent < Decimal::ZERO || request.discount_percent > dec!(100) {
            return Err(PricingError::InvalidDiscount(request.discount_percent));
        }
        if request.labor_cost < Decimal::ZERO {
            return Err(PricingError::NegativeLabor(request.labor_cost));
        }

        let mut service_items = Vec::with_capacity(request.other_services.len() + 1);

        if let Some(ppf) = &request.ppf {
            let price = self.ppf_price(ppf)?;
            service_items.push(ServiceItem {
                name: format!("PPF {} ({})", ppf.category.trim(), ppf.warranty.trim()),
                cost: price,
            });
        }

        for service in &request.other_services {
            let price = self.service_price(service)?;
            service_items.push(ServiceItem {
                name: service.name.trim().to_string(),
                cost: price,
            });
        }

        let total_service_cost: Decimal = service_items.iter().map(|item| item.cost).sum();
        let discounted_service_cost =
            total_service_cost * (Decimal::ONE - request.discount_percent / dec!(100));
        let subtotal = discounted_service_cost + request.labor_cost;
        let tax = subtotal * INTAKE_TAX_RATE / dec!(100);

        Ok(CostBreakdown {
            service_items,
            total_service_cost,
            discounted_service_cost,
            labor_cost: request.labor_cost,
            subtotal,
            tax,
            total_amount: subtotal + tax,
        })
    }
}
