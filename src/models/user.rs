//! User entity model
//!
//! Registered users whose OAuth tokens are contributed to the credential pool.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// User entity representing a registered user and their OAuth token
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// GitHub login (unique)
    pub login: String,

    /// Display name
    pub name: Option<String>,

    /// OAuth token contributed to the credential pool, if granted
    pub oauth_token: Option<String>,

    /// Contact email
    pub email: Option<String>,

    /// Avatar URL
    pub avatar_url: Option<String>,

    /// Timestamp when the user registered
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the user was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
