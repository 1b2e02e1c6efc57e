use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        job::{self, JobStage},
        technician::{self, TechnicianStatus},
    },
    errors::ServiceError,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTechnician {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub specialty: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicianWorkload {
    pub technician: technician::Model,
    pub open_jobs: u64,
}

#[derive(Clone)]
pub struct TechnicianService {
    db: Arc<DbPool>,
}

impl TechnicianService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn create_technician(
        &self,
        input: CreateTechnician,
    ) -> Result<technician::Model, ServiceError> {
        input.validate()?;
        let now = Utc::now();
        let technician = technician::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            specialty: Set(input.specialty.trim().to_string()),
            phone: Set(input.phone),
            status: Set(TechnicianStatus::Available),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(technician_id = %technician.id, "Technician created");
        Ok(technician)
    }

    pub async fn get_technician(&self, id: Uuid) -> Result<technician::Model, ServiceError> {
        find_technician(&*self.db, id).await
    }

    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        id: Uuid,
        status: TechnicianStatus,
    ) -> Result<technician::Model, ServiceError> {
        let mut active: technician::ActiveModel = find_technician(&*self.db, id).await?.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Number of assigned jobs that are neither completed nor cancelled. Always recomputed.
    pub async fn workload(&self, id: Uuid) -> Result<u64, ServiceError> {
        find_technician(&*self.db, id).await?;
        open_job_count(&*self.db, id).await
    }

    #[instrument(skip(self))]
    pub async fn roster_with_workload(&self) -> Result<Vec<TechnicianWorkload>, ServiceError> {
        let db = &*self.db;
        let technicians = technician::Entity::find()
            .order_by_asc(technician::Column::Name)
            .all(db)
            .await?;

        let mut roster = Vec::with_capacity(technicians.len());
        for technician in technicians {
            let open_jobs = open_job_count(db, technician.id).await?;
            roster.push(TechnicianWorkload {
                technician,
                open_jobs,
            });
        }
        Ok(roster)
    }
}

pub(crate) async fn find_technician<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<technician::Model, ServiceError> {
    technician::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Technician", id))
}

async fn open_job_count<C: ConnectionTrait>(conn: &C, technician_id: Uuid) -> Result<u64, ServiceError> {
    let count = job::Entity::find()
        .filter(job::Column::TechnicianId.eq(technician_id))
        .filter(job::Column::Stage.is_not_in([JobStage::Completed, JobStage::Cancelled]))
        .count(conn)
        .await?;
    Ok(count)
}
