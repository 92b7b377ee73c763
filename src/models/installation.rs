//! Installation entity model
//!
//! Cached GitHub App installation tokens. A cached token is reused until it
//! nears expiry, then re-minted through the installation token collaborator.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Installation entity caching a write-scoped App installation token
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "installations")]
pub struct Model {
    /// Unique identifier for the cache row (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// GitHub App installation identifier (unique)
    pub installation_id: i64,

    /// Account login the installation is bound to
    pub login: String,

    /// Current installation access token
    pub token: String,

    /// Expiry of the current token
    pub expires_at: DateTimeWithTimeZone,

    /// Timestamp when the cache row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the token was last refreshed
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
