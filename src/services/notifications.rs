use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        customer::{self, CustomerStatus},
        job::{self, JobStage},
        whatsapp_template,
    },
    errors::ServiceError,
    notifications::MessageTransport,
};

/// Fills `{{vehicle}}` and `{{plate}}` in a stage template.
pub fn render_stage_message(template: &str, vehicle: &str, plate: &str) -> String {
    template
        .replace("{{vehicle}}", vehicle)
        .replace("{{plate}}", plate)
}

/// Built-in customer status messages, keyed by `{{service}}`.
pub fn render_status_message(status: CustomerStatus, service: &str) -> String {
    let template = match status {
        CustomerStatus::Inquired => {
            "Thank you for your enquiry about {{service}}. Our team will get back to you shortly."
        }
        CustomerStatus::Working => "Work on your {{service}} has started. We will keep you posted.",
        CustomerStatus::Waiting => {
            "Your {{service}} is waiting on parts or approval. We will update you as soon as it moves."
        }
        CustomerStatus::Completed => {
            "Your {{service}} is complete. Thank you for choosing us!"
        }
    };
    let service = if service.trim().is_empty() {
        "service"
    } else {
        service.trim()
    };
    template.replace("{{service}}", service)
}

/// Renders templates and hands them to the outbound transport.
///
/// Nothing here fails the calling operation: lookup errors and transport
/// refusals are logged and reported as `false`.
#[derive(Clone)]
pub struct NotificationDispatcher {
    db: Arc<DbPool>,
    transport: Arc<dyn MessageTransport>,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<DbPool>, transport: Arc<dyn MessageTransport>) -> Self {
        Self { db, transport }
    }

    /// Creates or replaces the template for `stage`.
    #[instrument(skip(self, message))]
    pub async fn upsert_template(
        &self,
        stage: JobStage,
        message: String,
        is_active: bool,
    ) -> Result<whatsapp_template::Model, ServiceError> {
        let db = &*self.db;
        let existing = whatsapp_template::Entity::find()
            .filter(whatsapp_template::Column::Stage.eq(stage))
            .one(db)
            .await?;

        let saved = match existing {
            Some(template) => {
                let mut active: whatsapp_template::ActiveModel = template.into();
                active.message = Set(message);
                active.is_active = Set(is_active);
                active.updated_at = Set(Utc::now());
                active.update(db).await?
            }
            None => {
                whatsapp_template::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    stage: Set(stage),
                    message: Set(message),
                    is_active: Set(is_active),
                    updated_at: Set(Utc::now()),
                }
                .insert(db)
                .await?
            }
        };

        info!(stage = %stage, is_active, "Stage template saved");
        Ok(saved)
    }

    /// The template for `stage`, if one exists and is switched on.
    pub async fn find_active_template(
        &self,
        stage: JobStage,
    ) -> Result<Option<whatsapp_template::Model>, ServiceError> {
        let template = whatsapp_template::Entity::find()
            .filter(whatsapp_template::Column::Stage.eq(stage))
            .filter(whatsapp_template::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;
        Ok(template)
    }

    /// Sends the template for the job's current stage to `phone`.
    #[instrument(skip(self, job), fields(job_id = %job.id, stage = %job.stage))]
    pub async fn notify_job_stage(&self, job: &job::Model, phone: &str) -> bool {
        let template = match self.find_active_template(job.stage).await {
            Ok(Some(template)) => template,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Template lookup failed, skipping notification");
                return false;
            }
        };

        let message = render_stage_message(&template.message, &job.vehicle_name, &job.plate_number);
        self.send(phone, &message).await
    }

    /// Sends the built-in status message for the customer's current status.
    #[instrument(skip(self, customer), fields(customer_id = %customer.id, status = %customer.status))]
    pub async fn notify_customer_status(&self, customer: &customer::Model) -> bool {
        let message = render_status_message(
            customer.status,
            customer.service.as_deref().unwrap_or_default(),
        );
        self.send(&customer.phone, &message).await
    }

    async fn send(&self, phone: &str, message: &str) -> bool {
        if self.transport.dispatch(phone, message).await {
            counter!("garage.notifications.sent", 1);
            true
        } else {
            let failure = ServiceError::ExternalDispatchFailure(format!(
                "transport did not accept message for {}",
                phone
            ));
            warn!(error = %failure, "Notification not delivered");
            counter!("garage.notifications.failed", 1);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_placeholders_are_replaced_everywhere() {
        let rendered = render_stage_message(
            "Your {{vehicle}} ({{plate}}) is ready. {{plate}} can be collected today.",
            "Honda City",
            "KA01AB1234",
        );
        assert_eq!(
            rendered,
            "Your Honda City (KA01AB1234) is ready. KA01AB1234 can be collected today."
        );
    }

    #[test]
    fn status_message_falls_back_to_generic_service() {
        assert_eq!(
            render_status_message(CustomerStatus::Completed, "  "),
            "Your service is complete. Thank you for choosing us!"
        );
        assert!(render_status_message(CustomerStatus::Working, "Ceramic Coating")
            .contains("Ceramic Coating"));
    }
}
