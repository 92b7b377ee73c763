//! # Installation Repository
//!
//! Cache of GitHub App installation tokens. Minted tokens are short-lived;
//! the cache avoids re-minting on every labeling pass.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::installation::{ActiveModel, Column, Entity, Model};

/// Repository for installation-token cache operations
pub struct InstallationRepository {
    db: DatabaseConnection,
}

impl InstallationRepository {
    /// Create a new InstallationRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        installation_id: i64,
    ) -> Result<Option<Model>, OrchestratorError> {
        let row = Entity::find()
            .filter(Column::InstallationId.eq(installation_id))
            .one(&self.db)
            .await?;
        Ok(row)
    }

    /// Store a freshly minted token for an installation.
    pub async fn store_token(
        &self,
        installation_id: i64,
        login: &str,
        token: &str,
        expires_at: DateTimeWithTimeZone,
    ) -> Result<Model, OrchestratorError> {
        let now = Utc::now().fixed_offset();

        if let Some(existing) = self.find(installation_id).await? {
            let mut active: ActiveModel = existing.into();
            active.login = Set(login.to_string());
            active.token = Set(token.to_string());
            active.expires_at = Set(expires_at);
            active.updated_at = Set(now);
            return Ok(active.update(&self.db).await?);
        }

        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            installation_id: Set(installation_id),
            login: Set(login.to_string()),
            token: Set(token.to_string()),
            expires_at: Set(expires_at),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(row.insert(&self.db).await?)
    }
}
