//! API Key model for authentication.
//!
//! Each worker or manager calls the API with their own key. Keys are stored
//! as SHA-256 hashes.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `key_hash`: SHA-256 hash of the actual API key
/// - `user_id`: The worker or manager the key authenticates
/// - `display_name`: Name shown in logs
/// - `created_at`: When the key was created
/// - `is_active`: Whether the key is currently valid
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,

    /// SHA-256 hash of the actual API key (64 hex characters)
    pub key_hash: String,

    /// User this key acts as
    pub user_id: Uuid,

    pub display_name: String,

    pub created_at: DateTime<Utc>,

    /// Inactive keys are rejected during authentication
    pub is_active: bool,
}
