use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Service order moving through the garage pipeline.
///
/// Customer name, vehicle name and plate are copied at creation so that later
/// edits to the customer record do not rewrite job history.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub vehicle_id: Uuid,
    /// Position of the vehicle in the customer's list when the job was opened
    pub vehicle_index: i32,
    pub customer_name: String,
    pub vehicle_name: String,
    pub plate_number: String,
    #[sea_orm(nullable)]
    pub technician_id: Option<Uuid>,
    pub stage: JobStage,
    #[sea_orm(nullable)]
    pub service_type: Option<String>,
    #[sea_orm(nullable)]
    pub notes: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub service_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub labor_cost: Decimal,
    /// Extra billable lines; counted in the total on top of `service_cost`
    #[sea_orm(column_type = "Json")]
    pub service_items: ServiceItems,
    /// Catalog lines at list price behind an intake quote. Display only, never summed:
    /// their discounted sum is already `service_cost`.
    #[sea_orm(column_type = "Json")]
    pub quoted_items: ServiceItems,
    #[sea_orm(column_type = "Json")]
    pub materials: MaterialLines,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub paid_amount: Decimal,
    pub payment_status: PaymentStatus,
    #[sea_orm(column_type = "Json")]
    pub payments: PaymentLedger,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn remaining_balance(&self) -> Decimal {
        (self.total_amount - self.paid_amount).max(Decimal::ZERO)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(has_one = "super::invoice::Entity")]
    Invoice,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceItem {
    pub name: String,
    pub cost: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ServiceItems(pub Vec<ServiceItem>);

impl ServiceItems {
    pub fn total(&self) -> Decimal {
        self.0.iter().map(|item| item.cost).sum()
    }
}

/// Inventory consumed by a job. Tracked for stock purposes and never billed on the invoice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialLine {
    pub inventory_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub cost: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct MaterialLines(pub Vec<MaterialLine>);

impl MaterialLines {
    pub fn total(&self) -> Decimal {
        self.0.iter().map(|line| line.cost).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub amount: Decimal,
    pub mode: String,
    pub notes: Option<String>,
    pub date: DateTime<Utc>,
}

/// Append-only payment history of a job
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct PaymentLedger(pub Vec<PaymentEntry>);

impl PaymentLedger {
    pub fn total(&self) -> Decimal {
        self.0.iter().map(|entry| entry.amount).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum JobStage {
    #[sea_orm(string_value = "New Lead")]
    #[serde(rename = "New Lead")]
    NewLead,
    #[sea_orm(string_value = "Inspection Done")]
    #[serde(rename = "Inspection Done")]
    InspectionDone,
    #[sea_orm(string_value = "Work In Progress")]
    #[serde(rename = "Work In Progress")]
    WorkInProgress,
    #[sea_orm(string_value = "Ready for Delivery")]
    #[serde(rename = "Ready for Delivery")]
    ReadyForDelivery,
    #[sea_orm(string_value = "Completed")]
    Completed,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewLead => "New Lead",
            Self::InspectionDone => "Inspection Done",
            Self::WorkInProgress => "Work In Progress",
            Self::ReadyForDelivery => "Ready for Delivery",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Completed and Cancelled accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "newlead" => Ok(Self::NewLead),
            "inspectiondone" => Ok(Self::InspectionDone),
            "workinprogress" => Ok(Self::WorkInProgress),
            "readyfordelivery" => Ok(Self::ReadyForDelivery),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown job stage '{}'", s)),
        }
    }
}

/// Shared by jobs and invoices; always derived from paid vs total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Partially Paid")]
    #[serde(rename = "Partially Paid")]
    PartiallyPaid,
    #[sea_orm(string_value = "Paid")]
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::PartiallyPaid => "Partially Paid",
            Self::Paid => "Paid",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
