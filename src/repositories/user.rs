//! # User Repository
//!
//! Repository operations for the users table. The credential pool draws its
//! dynamic tokens from here.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::user::{ActiveModel, Column, Entity, Model};

/// Repository for user database operations
pub struct UserRepository {
    db: DatabaseConnection,
}

impl UserRepository {
    /// Create a new UserRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_login(&self, login: &str) -> Result<Option<Model>, OrchestratorError> {
        let user = Entity::find()
            .filter(Column::Login.eq(login))
            .one(&self.db)
            .await?;
        Ok(user)
    }

    /// Register a user or refresh their OAuth token.
    pub async fn upsert(
        &self,
        login: &str,
        oauth_token: Option<&str>,
        name: Option<&str>,
        email: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Model, OrchestratorError> {
        let now = Utc::now().fixed_offset();

        if let Some(existing) = self.find_by_login(login).await? {
            let mut active: ActiveModel = existing.into();
            if oauth_token.is_some() {
                active.oauth_token = Set(oauth_token.map(str::to_string));
            }
            if name.is_some() {
                active.name = Set(name.map(str::to_string));
            }
            if email.is_some() {
                active.email = Set(email.map(str::to_string));
            }
            if avatar_url.is_some() {
                active.avatar_url = Set(avatar_url.map(str::to_string));
            }
            active.updated_at = Set(now);
            return Ok(active.update(&self.db).await?);
        }

        let user = ActiveModel {
            id: Set(Uuid::new_v4()),
            login: Set(login.to_string()),
            name: Set(name.map(str::to_string)),
            oauth_token: Set(oauth_token.map(str::to_string)),
            email: Set(email.map(str::to_string)),
            avatar_url: Set(avatar_url.map(str::to_string)),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(user.insert(&self.db).await?)
    }

    /// All OAuth tokens users have contributed to the pool.
    pub async fn list_oauth_tokens(&self) -> Result<Vec<String>, OrchestratorError> {
        let users = Entity::find()
            .filter(Column::OauthToken.is_not_null())
            .all(&self.db)
            .await?;
        Ok(users.into_iter().filter_map(|u| u.oauth_token).collect())
    }
}
