//! Undo/redo history repository

use crate::db::connection::DatabasePool;
use crate::db::models::HistoryRow;
use crate::db::StoreResult;

/// Append-only history batch repository
pub struct HistoryRepository;

impl HistoryRepository {
    /// Append a batch
    pub async fn append(pool: &DatabasePool, row: &HistoryRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO graph_history (key, graph_key, created_at, entries) VALUES (?, ?, ?, ?)",
        )
        .bind(&row.key)
        .bind(&row.graph_key)
        .bind(&row.created_at)
        .bind(&row.entries)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// List batches for a graph, oldest first
    pub async fn list_by_graph(pool: &DatabasePool, graph_key: &str) -> StoreResult<Vec<HistoryRow>> {
        Ok(sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM graph_history WHERE graph_key = ? ORDER BY created_at ASC",
        )
        .bind(graph_key)
        .fetch_all(pool)
        .await?)
    }
}
