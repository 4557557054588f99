//! A durable grant linking one file to one recipient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row of the `shares` table.
///
/// Identity is the `(file_id, recipient)` pair; the table's primary key
/// rejects a second grant for the same pair.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Share {
    /// The shared file.
    pub file_id: Uuid,

    /// Recipient identifier (usually an email address).
    pub recipient: String,

    /// Owner id of the user who granted the share.
    pub shared_by: String,

    /// When the grant was first created. Never updated.
    pub shared_at: DateTime<Utc>,
}
