//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ProfileStore` port from the `core` crate. It talks to the hosted
//! PostgreSQL database directly using `sqlx`.
//!
//! Identifiers stay opaque strings on the Rust side and are cast to `uuid` in SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plantai_core::domain::{AnalysisRecord, Profile, UserId, PLACEHOLDER_IMAGE_URL};
use plantai_core::ports::{PortError, PortResult, ProfileStore};
use sqlx::{FromRow, PgPool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ProfileStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps a driver error onto the port taxonomy by SQLSTATE.
pub fn classify(e: sqlx::Error, relation: &str) -> PortError {
    match &e {
        sqlx::Error::RowNotFound => PortError::NotFound(relation.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("42P01") => PortError::MissingRelation(relation.to_string()),
            Some("23505") => PortError::Conflict(db.message().to_string()),
            Some("42501") => PortError::PermissionDenied(db.message().to_string()),
            Some("23503") => PortError::MissingReference(db.message().to_string()),
            _ => PortError::Unexpected(e.to_string()),
        },
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProfileRecord {
    id: String,
    email: Option<String>,
    is_premium: Option<bool>,
}
impl ProfileRecord {
    fn to_domain(self) -> Profile {
        Profile {
            id: UserId::new(self.id),
            email: self.email,
            is_premium: self.is_premium.unwrap_or(false),
        }
    }
}

#[derive(FromRow)]
struct AnalysisRow {
    id: String,
    raw_text: Option<String>,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
}
impl AnalysisRow {
    fn to_domain(self) -> AnalysisRecord {
        AnalysisRecord {
            id: self.id,
            image_url: self
                .image_url
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| PLACEHOLDER_IMAGE_URL.to_string()),
            raw_text: self.raw_text.unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// `ProfileStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProfileStore for DbAdapter {
    async fn get_profile(&self, user_id: &UserId) -> PortResult<Option<Profile>> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT id::text AS id, email, is_premium FROM profiles WHERE id = $1::uuid",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, "profiles"))?;

        Ok(record.map(ProfileRecord::to_domain))
    }

    async fn create_profile(&self, profile: &Profile) -> PortResult<()> {
        sqlx::query("INSERT INTO profiles (id, email, is_premium) VALUES ($1::uuid, $2, $3)")
            .bind(profile.id.as_str())
            .bind(profile.email.as_deref())
            .bind(profile.is_premium)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "profiles"))?;
        Ok(())
    }

    async fn set_premium(&self, user_id: &UserId, is_premium: bool) -> PortResult<()> {
        sqlx::query("UPDATE profiles SET is_premium = $1 WHERE id = $2::uuid")
            .bind(is_premium)
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "profiles"))?;
        Ok(())
    }

    async fn list_analyses(&self, user_id: &UserId) -> PortResult<Vec<AnalysisRecord>> {
        let records = sqlx::query_as::<_, AnalysisRow>(
            "SELECT id::text AS id, raw_text, image_url, created_at FROM analyses WHERE user_id = $1::uuid ORDER BY created_at DESC",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, "analyses"))?;

        Ok(records.into_iter().map(AnalysisRow::to_domain).collect())
    }

    async fn save_analysis(&self, user_id: &UserId, record: &AnalysisRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO analyses (id, user_id, raw_text, image_url, created_at) VALUES ($1::uuid, $2::uuid, $3, $4, $5)",
        )
        .bind(record.id.as_str())
        .bind(user_id.as_str())
        .bind(record.raw_text.as_str())
        .bind(record.image_url.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "analyses"))?;
        Ok(())
    }
}
