use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use parley_core::domain::agent::WorkspaceId;
use parley_core::domain::contact::{ContactId, ContactRecord};

use super::decode::{parse_json, to_json};
use super::{ContactRepository, RepositoryError};
use crate::DbPool;

pub struct SqlContactRepository {
    pool: DbPool,
}

impl SqlContactRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ContactRepository for SqlContactRepository {
    async fn find_contact(&self, id: &ContactId) -> Result<Option<ContactRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, email, phone, data_json FROM contact WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let data_json: String = row.try_get("data_json")?;
            Ok(ContactRecord {
                id: ContactId(row.try_get("id")?),
                workspace_id: WorkspaceId(row.try_get("workspace_id")?),
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
                data: parse_json::<BTreeMap<String, Value>>("data_json", &data_json)?,
            })
        })
        .transpose()
    }

    async fn save_contact(&self, contact: ContactRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO contact (id, workspace_id, name, email, phone, data_json, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                phone = excluded.phone,
                data_json = excluded.data_json,
                updated_at = excluded.updated_at",
        )
        .bind(&contact.id.0)
        .bind(&contact.workspace_id.0)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(to_json("data_json", &contact.data)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
