//! Service record repository.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::models::{ServiceRecord, ServiceStatus};

const SELECT_COLUMNS: &str = r#"
    SELECT session_id, control_plane_app_id, service_url, status, error_message,
           volume_name, worker_node, editor_mount_id, session_mount_id, uses_volumes,
           created_at, updated_at
    FROM service_records
"#;

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Repository for service record persistence.
#[derive(Debug, Clone)]
pub struct ServiceRepository {
    pool: SqlitePool,
}

impl ServiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a record by session ID.
    pub async fn get(&self, session_id: &str) -> Result<Option<ServiceRecord>> {
        let record = sqlx::query_as::<_, ServiceRecord>(&format!(
            "{} WHERE session_id = ?",
            SELECT_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching service record")?;

        Ok(record)
    }

    /// List all records, newest first.
    pub async fn list(&self) -> Result<Vec<ServiceRecord>> {
        let records = sqlx::query_as::<_, ServiceRecord>(&format!(
            "{} ORDER BY created_at DESC, session_id",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing service records")?;

        Ok(records)
    }

    /// Every session ID with a record, whatever its status.
    pub async fn list_session_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT session_id FROM service_records ORDER BY session_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("listing session ids")?;

        Ok(ids)
    }

    /// Start a provisioning attempt: insert the record, or reset an existing
    /// one to `creating` with every external reference cleared.
    pub async fn begin_attempt(&self, session_id: &str) -> Result<()> {
        let now = now();
        sqlx::query(
            r#"
            INSERT INTO service_records (
                session_id, control_plane_app_id, service_url, status, error_message,
                volume_name, worker_node, editor_mount_id, session_mount_id, uses_volumes,
                created_at, updated_at
            ) VALUES (?, NULL, NULL, 'creating', NULL, NULL, NULL, NULL, NULL, 0, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                control_plane_app_id = NULL,
                service_url = NULL,
                status = 'creating',
                error_message = NULL,
                volume_name = NULL,
                worker_node = NULL,
                editor_mount_id = NULL,
                session_mount_id = NULL,
                uses_volumes = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("recording provisioning intent")?;

        Ok(())
    }

    pub async fn set_app_id(&self, session_id: &str, app_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE service_records SET control_plane_app_id = ?, updated_at = ? WHERE session_id = ?",
        )
        .bind(app_id)
        .bind(now())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("saving control plane application id")?;

        Ok(())
    }

    /// Record where the session volume lives. Both columns change in one statement.
    pub async fn set_volume_placement(
        &self,
        session_id: &str,
        volume_name: &str,
        worker_node: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE service_records SET volume_name = ?, worker_node = ?, updated_at = ? WHERE session_id = ?",
        )
        .bind(volume_name)
        .bind(worker_node)
        .bind(now())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("saving volume placement")?;

        Ok(())
    }

    pub async fn set_mounts(
        &self,
        session_id: &str,
        editor_mount_id: &str,
        session_mount_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE service_records
            SET editor_mount_id = ?, session_mount_id = ?, uses_volumes = 1, updated_at = ?
            WHERE session_id = ?
            "#,
        )
        .bind(editor_mount_id)
        .bind(session_mount_id)
        .bind(now())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("saving mount ids")?;

        Ok(())
    }

    /// Mark the service running at `url`.
    pub async fn mark_running(&self, session_id: &str, url: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE service_records
            SET status = 'running', service_url = ?, error_message = NULL, updated_at = ?
            WHERE session_id = ?
            "#,
        )
        .bind(url)
        .bind(now())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("marking service running")?;

        Ok(())
    }

    /// Mark the service failed with error message.
    pub async fn mark_failed(&self, session_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE service_records SET status = 'error', error_message = ?, updated_at = ? WHERE session_id = ?",
        )
        .bind(error)
        .bind(now())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("marking service failed")?;

        Ok(())
    }

    pub async fn update_status(&self, session_id: &str, status: ServiceStatus) -> Result<()> {
        sqlx::query("UPDATE service_records SET status = ?, updated_at = ? WHERE session_id = ?")
            .bind(status.to_string())
            .bind(now())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("updating service status")?;

        Ok(())
    }

    /// Delete a record. Returns whether a row was removed.
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM service_records WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("deleting service record")?;

        Ok(result.rows_affected() > 0)
    }
}
