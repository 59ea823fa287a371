//! Graph repository for database operations

use chrono::Utc;

use crate::db::connection::DatabasePool;
use crate::db::models::GraphRow;
use crate::db::StoreResult;

/// Graph repository for managing graph metadata
pub struct GraphRepository;

impl GraphRepository {
    /// Get a graph by key
    pub async fn get(pool: &DatabasePool, key: &str) -> StoreResult<Option<GraphRow>> {
        Ok(
            sqlx::query_as::<_, GraphRow>("SELECT * FROM graphs WHERE key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await?,
        )
    }

    /// Create a graph
    pub async fn create(pool: &DatabasePool, graph: &GraphRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO graphs (key, name, description, workspace, sheet_list, no_multiple_sheet, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&graph.key)
        .bind(&graph.name)
        .bind(&graph.description)
        .bind(&graph.workspace)
        .bind(&graph.sheet_list)
        .bind(graph.no_multiple_sheet)
        .bind(&graph.metadata)
        .bind(&graph.created_at)
        .bind(&graph.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Replace the sheet list and touch the update timestamp
    pub async fn update_sheet_list(
        pool: &DatabasePool,
        key: &str,
        sheet_list: &str,
    ) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE graphs SET sheet_list = ?, updated_at = ? WHERE key = ?")
            .bind(sheet_list)
            .bind(&now)
            .bind(key)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Touch the update timestamp (called after every successful flush)
    pub async fn touch_updated(pool: &DatabasePool, key: &str) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE graphs SET updated_at = ? WHERE key = ?")
            .bind(&now)
            .bind(key)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Remove a graph together with its nodes, edges and history
    ///
    /// One transaction; this is the compound query behind sub-workflow
    /// cascade deletion.
    pub async fn delete_cascade(pool: &DatabasePool, key: &str) -> StoreResult<()> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM edges WHERE graph_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nodes WHERE graph_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM graph_history WHERE graph_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM graphs WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseConnection;

    async fn test_pool() -> DatabaseConnection {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = test_pool().await;
        let row = GraphRow::new("g1".to_string(), "Pipeline".to_string());
        GraphRepository::create(db.pool(), &row).await.unwrap();

        let loaded = GraphRepository::get(db.pool(), "g1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Pipeline");
        assert!(GraphRepository::get(db.pool(), "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_sheet_list() {
        let db = test_pool().await;
        let row = GraphRow::new("g1".to_string(), "Pipeline".to_string());
        GraphRepository::create(db.pool(), &row).await.unwrap();

        GraphRepository::update_sheet_list(db.pool(), "g1", r#"{"0":"Main","1":"Detail"}"#)
            .await
            .unwrap();
        let loaded = GraphRepository::get(db.pool(), "g1").await.unwrap().unwrap();
        assert_eq!(loaded.sheets().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_cascade() {
        use crate::db::models::{EdgeRow, HistoryRow, NodeRow};
        use crate::db::repositories::{EdgeRepository, HistoryRepository, NodeRepository};
        use serde_json::json;

        let db = test_pool().await;
        let row = GraphRow::new("g1".to_string(), "Sub".to_string());
        GraphRepository::create(db.pool(), &row).await.unwrap();

        for key in ["a", "b"] {
            let doc = json!({"key": key, "graphKey": "g1", "sheet": "0"});
            let row = NodeRow::from_doc("g1", key, "0", &doc).unwrap();
            NodeRepository::create(db.pool(), &row).await.unwrap();
        }
        let doc = json!({"key": "e", "graphKey": "g1", "sheet": "0", "source": "a", "target": "b"});
        let edge = EdgeRow::from_doc("g1", "e", "0", "a", "b", &doc).unwrap();
        EdgeRepository::create(db.pool(), &edge).await.unwrap();
        let history = HistoryRow::new("g1", "[]".to_string());
        HistoryRepository::append(db.pool(), &history).await.unwrap();

        GraphRepository::delete_cascade(db.pool(), "g1").await.unwrap();

        assert!(GraphRepository::get(db.pool(), "g1").await.unwrap().is_none());
        assert!(NodeRepository::list_by_graph(db.pool(), "g1")
            .await
            .unwrap()
            .is_empty());
        assert!(EdgeRepository::list_by_graph(db.pool(), "g1")
            .await
            .unwrap()
            .is_empty());
        assert!(HistoryRepository::list_by_graph(db.pool(), "g1")
            .await
            .unwrap()
            .is_empty());
    }
}
