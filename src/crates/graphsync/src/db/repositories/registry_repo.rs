//! Cluster registry repository
//!
//! The registry table is the only cross-process coordination point; writes
//! are small and idempotent.

use chrono::{DateTime, Duration, Utc};

use crate::db::connection::DatabasePool;
use crate::db::models::ClusterNodeRow;
use crate::db::StoreResult;

/// Cluster registry repository
pub struct RegistryRepository;

impl RegistryRepository {
    /// Upsert the local process row as online
    pub async fn register(pool: &DatabasePool, row: &ClusterNodeRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO cluster_registry (peer_id, host, port, status, last_refresh)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(peer_id) DO UPDATE SET
               host = excluded.host,
               port = excluded.port,
               status = excluded.status,
               last_refresh = excluded.last_refresh",
        )
        .bind(&row.peer_id)
        .bind(&row.host)
        .bind(row.port)
        .bind(&row.status)
        .bind(&row.last_refresh)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Refresh the heartbeat timestamp
    pub async fn refresh(pool: &DatabasePool, peer_id: &str) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE cluster_registry SET last_refresh = ? WHERE peer_id = ?")
            .bind(&now)
            .bind(peer_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Set the status column (graceful shutdown writes "offline")
    pub async fn set_status(pool: &DatabasePool, peer_id: &str, status: &str) -> StoreResult<()> {
        sqlx::query("UPDATE cluster_registry SET status = ? WHERE peer_id = ?")
            .bind(status)
            .bind(peer_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// List live peers other than the caller
    ///
    /// A row counts as live when it is online and refreshed within
    /// `staleness` (twice the heartbeat interval in the caller).
    pub async fn list_online(
        pool: &DatabasePool,
        self_peer_id: &str,
        staleness: Duration,
    ) -> StoreResult<Vec<ClusterNodeRow>> {
        let rows = sqlx::query_as::<_, ClusterNodeRow>(
            "SELECT * FROM cluster_registry WHERE status = ? AND peer_id != ?",
        )
        .bind(ClusterNodeRow::ONLINE)
        .bind(self_peer_id)
        .fetch_all(pool)
        .await?;

        let cutoff = Utc::now() - staleness;
        Ok(rows
            .into_iter()
            .filter(|row| {
                DateTime::parse_from_rfc3339(&row.last_refresh)
                    .map(|t| t.with_timezone(&Utc) > cutoff)
                    .unwrap_or(false)
            })
            .collect())
    }
}
