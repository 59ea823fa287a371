//! Edge repository for database operations

use crate::db::connection::DatabasePool;
use crate::db::models::EdgeRow;
use crate::db::{composite_key, StoreResult};

/// Edge repository for managing edge documents
pub struct EdgeRepository;

impl EdgeRepository {
    /// List every edge of a graph
    pub async fn list_by_graph(pool: &DatabasePool, graph_key: &str) -> StoreResult<Vec<EdgeRow>> {
        Ok(
            sqlx::query_as::<_, EdgeRow>("SELECT * FROM edges WHERE graph_key = ?")
                .bind(graph_key)
                .fetch_all(pool)
                .await?,
        )
    }

    /// Create an edge
    pub async fn create(pool: &DatabasePool, row: &EdgeRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO edges (key, graph_key, local_key, sheet_id, source_key, target_key, doc)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.key)
        .bind(&row.graph_key)
        .bind(&row.local_key)
        .bind(&row.sheet_id)
        .bind(&row.source_key)
        .bind(&row.target_key)
        .bind(&row.doc)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Replace an edge document (endpoints may have changed)
    pub async fn replace(pool: &DatabasePool, row: &EdgeRow) -> StoreResult<()> {
        sqlx::query(
            "UPDATE edges SET sheet_id = ?, source_key = ?, target_key = ?, doc = ? WHERE key = ?",
        )
        .bind(&row.sheet_id)
        .bind(&row.source_key)
        .bind(&row.target_key)
        .bind(&row.doc)
        .bind(&row.key)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Remove an edge by localKey
    pub async fn remove(pool: &DatabasePool, graph_key: &str, local_key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM edges WHERE key = ?")
            .bind(composite_key(graph_key, local_key))
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Remove every edge on a sheet
    pub async fn remove_by_sheet(
        pool: &DatabasePool,
        graph_key: &str,
        sheet_id: &str,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM edges WHERE graph_key = ? AND sheet_id = ?")
            .bind(graph_key)
            .bind(sheet_id)
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseConnection;
    use serde_json::json;

    async fn test_pool() -> DatabaseConnection {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let db = test_pool().await;
        let doc = json!({"key": "e1", "source": "a", "target": "b"});
        let row = EdgeRow::from_doc("g1", "e1", "0", "a", "b", &doc).unwrap();
        EdgeRepository::create(db.pool(), &row).await.unwrap();

        let listed = EdgeRepository::list_by_graph(db.pool(), "g1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].source_key, "g1-a");
        assert_eq!(listed[0].target_key, "g1-b");
    }

    #[tokio::test]
    async fn test_remove() {
        let db = test_pool().await;
        let doc = json!({"key": "e1", "source": "a", "target": "b"});
        let row = EdgeRow::from_doc("g1", "e1", "0", "a", "b", &doc).unwrap();
        EdgeRepository::create(db.pool(), &row).await.unwrap();

        EdgeRepository::remove(db.pool(), "g1", "e1").await.unwrap();
        assert!(EdgeRepository::list_by_graph(db.pool(), "g1")
            .await
            .unwrap()
            .is_empty());
    }
}
